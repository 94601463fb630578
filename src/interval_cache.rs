//! persistent per-set last-run timestamps.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub struct IntervalCache {
    dir: PathBuf,
}

impl IntervalCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        IntervalCache { dir: dir.into() }
    }

    /// `<cachedir>/<setname-with-separators-replaced-by-underscore>`.
    fn entry_path(&self, set_name: &str) -> PathBuf {
        let slug = set_name.replace(std::path::MAIN_SEPARATOR, "_");
        self.dir.join(slug)
    }

    /// Missing or unparseable entries are treated as epoch zero, with a
    /// warning for the unparseable case.
    pub fn last_run(&self, set_name: &str) -> SystemTime {
        let path = self.entry_path(set_name);
        match fs::read_to_string(&path) {
            Ok(contents) => match contents.trim().parse::<u64>() {
                Ok(secs) => UNIX_EPOCH + std::time::Duration::from_secs(secs),
                Err(_) => {
                    warn!(set = set_name, path = %path.display(), "unparseable interval cache entry, treating as epoch zero");
                    UNIX_EPOCH
                }
            },
            Err(_) => UNIX_EPOCH,
        }
    }

    /// Writes `now` as the last-run timestamp. Creates the cache directory
    /// (mode 0700) on demand.
    pub fn record_run(&self, set_name: &str, now: SystemTime) -> Result<()> {
        self.ensure_dir()?;
        let path = self.entry_path(set_name);
        let secs = now
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the unix epoch")?
            .as_secs();
        fs::write(&path, secs.to_string())
            .with_context(|| format!("failed to write interval cache entry {}", path.display()))
    }

    fn ensure_dir(&self) -> Result<()> {
        if self.dir.exists() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create cache directory {}", self.dir.display()))?;
        set_mode_0700(&self.dir)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_mode_0700(dir: &Path) -> Result<()> {
    let mut perms = fs::metadata(dir)?.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(dir, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode_0700(_dir: &Path) -> Result<()> {
    Ok(())
}
