//! Error taxonomy. Only the kinds that change `main`'s exit code
//! get their own variant; everything else propagates as `anyhow::Error`.

use thiserror::Error;

/// Errors that `main`/`Controller::run` inspect to choose an exit code.
#[derive(Debug, Error)]
pub enum JabsError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(i32),

    #[error("cannot open pid file: {0}")]
    LockIo(String),
}

impl JabsError {
    pub fn exit_code(&self) -> u8 {
        match self {
            JabsError::Config(_) => 2,
            JabsError::AlreadyRunning(_) => 12,
            JabsError::LockIo(_) => 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec_taxonomy() {
        assert_eq!(JabsError::Config("x".into()).exit_code(), 2);
        assert_eq!(JabsError::AlreadyRunning(123).exit_code(), 12);
        assert_eq!(JabsError::LockIo("x".into()).exit_code(), 15);
    }
}
