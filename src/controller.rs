//! Top-level orchestration: load config, acquire lock,
//! run selected sets in priority order, release the lock on every exit
//! path.

use crate::cli::Cli;
use crate::config::{self, SetSpec};
use crate::error::JabsError;
use crate::executor::SetExecutor;
use crate::interval_cache::IntervalCache;
use crate::lock::{LockError, LockFile};
use crate::reporter::{LettreTransport, MailTransport, NullTransport};
use crate::scheduler::{self, ScheduleOptions};
use anyhow::Result;
use chrono::Local;
use tracing::{error, info};

pub struct ExitRequest {
    pub code: u8,
}

impl From<&JabsError> for ExitRequest {
    fn from(err: &JabsError) -> Self {
        ExitRequest { code: err.exit_code() }
    }
}

pub async fn run(cli: Cli) -> Result<ExitRequest> {
    let ini = match config::load_ini(&cli.config) {
        Ok(ini) => ini,
        Err(err) => {
            let jabs_err = JabsError::Config(format!("{err:#}"));
            error!("{jabs_err}");
            return Ok((&jabs_err).into());
        }
    };

    let sets = match config::load_all(&ini) {
        Ok(sets) => sets,
        Err(err) => {
            let jabs_err = JabsError::Config(format!("{err:#}"));
            error!("{jabs_err}");
            return Ok((&jabs_err).into());
        }
    };

    let pidfile = match cli.pidfile.clone().or_else(|| {
        ini.section(Some(config::GLOBAL_SECTION))
            .and_then(|s| s.get("PIDFILE"))
            .map(Into::into)
    }) {
        Some(p) => p,
        None => {
            let jabs_err = JabsError::Config("no PIDFILE configured (CLI or [Global])".into());
            error!("{jabs_err}");
            return Ok((&jabs_err).into());
        }
    };

    let mut lock = LockFile::new(pidfile);
    match lock.acquire() {
        Ok(()) => {}
        Err(LockError::AlreadyRunning(pid)) => {
            if cli.batch {
                info!(pid, "another instance is running; exiting quietly (--batch)");
                return Ok(ExitRequest { code: 0 });
            }
            let jabs_err = JabsError::AlreadyRunning(pid);
            error!("{jabs_err}");
            return Ok((&jabs_err).into());
        }
        Err(err @ LockError::Io { .. }) => {
            let jabs_err = JabsError::LockIo(err.to_string());
            error!("{jabs_err}");
            return Ok((&jabs_err).into());
        }
    }

    let code = run_sets(&cli, &sets).await;
    lock.release();
    Ok(ExitRequest { code })
}

async fn run_sets(cli: &Cli, sets: &[SetSpec]) -> u8 {
    let cache = IntervalCache::new(&cli.cache_dir);
    let opts = ScheduleOptions {
        now: Local::now(),
        force: cli.force,
        selected: if cli.sets.is_empty() { None } else { Some(&cli.sets) },
    };

    let queue = scheduler::select(sets, &cache, &opts).await;
    if queue.is_empty() {
        info!("no sets eligible to run");
        return 0;
    }

    let mut any_set_errored = false;

    for set in queue {
        info!(set = %set.name, "running set");
        let executor = SetExecutor {
            set,
            cache: &cache,
            safe: cli.safe,
        };

        let transport: Box<dyn MailTransport> = if cli.safe {
            Box::new(NullTransport)
        } else {
            let host = set.smtp_host.clone().unwrap_or_else(|| "localhost".to_string());
            Box::new(LettreTransport::new(host, set.smtp_user.clone(), set.smtp_pass.clone()))
        };

        if let Err(err) = executor.run(transport.as_ref()).await {
            error!(set = %set.name, %err, "set execution errored");
            any_set_errored = true;
        }
    }

    if any_set_errored {
        1
    } else {
        0
    }
}
