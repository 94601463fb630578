//! Runs one set end-to-end. Mount -> pre -> transfer loop
//! -> rotate symlink -> delete list -> update cache -> umount -> report.

use crate::ancestor;
use crate::config::{Program, SetSpec};
use crate::hanoi;
use crate::interval_cache::IntervalCache;
use crate::pathref::PathRef;
use crate::reporter::{LogAttachment, MailTransport, Report, Reporter};
use crate::subprocess::{self, Outcome};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct SetExecutor<'a> {
    pub set: &'a SetSpec,
    pub cache: &'a IntervalCache,
    pub safe: bool,
}

#[derive(Default)]
struct RunState {
    success: bool,
    log_lines: Vec<String>,
    attachments: Vec<LogAttachment>,
}

impl RunState {
    fn note(&mut self, line: impl Into<String>) {
        self.log_lines.push(line.into());
    }
}

impl<'a> SetExecutor<'a> {
    pub async fn run(&self, transport: &dyn MailTransport) -> Result<()> {
        let now = Local::now();
        let tmp_dir = tempfile::Builder::new()
            .prefix(&format!("jabs-{}-", slug(&self.set.name)))
            .tempdir()
            .context("failed to create per-run temp directory")?;

        let mut state = RunState {
            success: true,
            ..Default::default()
        };

        self.phase_mount().await;

        let pre_failed = self.phase_pre(&mut state).await;
        if pre_failed && self.set.skip_on_pre_error {
            state.note("pre-command failed; skipping transfer (SKIPONPREERROR=true)");
            info!(set = %self.set.name, "aborting set after pre-command failure");
        } else if self.phase_check_dst().await {
            if let Err(err) = self.phase_transfer(tmp_dir.path(), now, &mut state).await {
                state.success = false;
                state.note(format!("transfer phase failed: {err:#}"));
                warn!(set = %self.set.name, %err, "transfer phase failed");
            }
        } else {
            // Destination check failure skips the rest of this set entirely,
            // including the mail report: no log text has been assembled yet
            // worth sending, and the original behaves the same way.
            warn!(set = %self.set.name, "checkDst failed, skipping set");
            return Ok(());
        }

        self.phase_umount().await;
        self.phase_notify(transport, now, &state)?;
        self.phase_cleanup(&state);

        Ok(())
    }

    async fn phase_mount(&self) {
        let Some(mount) = &self.set.mount else { return };
        if is_mountpoint(Path::new(mount)) {
            return;
        }
        if self.safe {
            info!(set = %self.set.name, %mount, "safe mode: would mount");
            return;
        }
        let status = Command::new("mount").arg(mount).status().await;
        match status {
            Ok(s) if s.success() => debug!(set = %self.set.name, %mount, "mounted"),
            Ok(s) => warn!(set = %self.set.name, %mount, code = ?s.code(), "mount returned non-zero, continuing"),
            Err(err) => warn!(set = %self.set.name, %mount, %err, "failed to spawn mount, continuing"),
        }
    }

    async fn phase_umount(&self) {
        let Some(umount) = &self.set.umount else { return };
        if !is_mountpoint(Path::new(umount)) {
            return;
        }
        if self.safe {
            info!(set = %self.set.name, %umount, "safe mode: would umount");
            return;
        }
        let status = Command::new("umount").arg(umount).status().await;
        match status {
            Ok(s) if s.success() => debug!(set = %self.set.name, %umount, "unmounted"),
            Ok(s) => warn!(set = %self.set.name, %umount, code = ?s.code(), "umount returned non-zero"),
            Err(err) => warn!(set = %self.set.name, %umount, %err, "failed to spawn umount"),
        }
    }

    /// Returns `true` if a pre-command failed.
    async fn phase_pre(&self, state: &mut RunState) -> bool {
        let mut failed = false;
        for cmd in &self.set.pre {
            if self.safe {
                info!(set = %self.set.name, command = %cmd, "safe mode: would run pre-command");
                continue;
            }
            let status = Command::new("/bin/sh").arg("-c").arg(cmd).status().await;
            match status {
                Ok(s) if s.success() => debug!(set = %self.set.name, command = %cmd, "pre-command ok"),
                Ok(s) => {
                    warn!(set = %self.set.name, command = %cmd, code = ?s.code(), "pre-command failed");
                    state.note(format!("pre-command failed ({cmd}): exit {:?}", s.code()));
                    state.success = false;
                    failed = true;
                }
                Err(err) => {
                    warn!(set = %self.set.name, command = %cmd, %err, "failed to spawn pre-command");
                    state.note(format!("pre-command failed to spawn ({cmd}): {err}"));
                    state.success = false;
                    failed = true;
                }
            }
        }
        failed
    }

    async fn phase_check_dst(&self) -> bool {
        if !self.set.check_dst {
            return true;
        }
        if self.set.dst.is_remote {
            let Some(target) = self.set.dst.user_at_host() else { return false };
            let Some(path) = self.set.dst.remote_path.as_deref() else { return false };
            let status = Command::new("ssh")
                .args(["-o", "BatchMode=true", &target, "test", "-d", path])
                .status()
                .await;
            matches!(status, Ok(s) if s.success())
        } else {
            Path::new(&self.set.dst.raw).is_dir()
        }
    }

    async fn phase_transfer(
        &self,
        tmp_dir: &Path,
        now: DateTime<Local>,
        state: &mut RunState,
    ) -> Result<()> {
        let suffix = self.current_suffix(now);

        let mut entries = self.set.backup_list.clone();
        let datefile_path = self.write_datefile(tmp_dir, now)?;
        if let Some(path) = &datefile_path {
            entries.push(path.to_string_lossy().to_string());
        }

        let link_dests = self.resolve_link_dests(&suffix).await;

        for entry in &entries {
            let is_datefile = datefile_path
                .as_ref()
                .map(|p| p.to_string_lossy() == entry.as_str())
                .unwrap_or(false);
            let argv = build_argv(self.set, entry, &link_dests, &suffix, is_datefile);

            let log_name = format!(
                "{}.log{}",
                slug(&format!("{}-{}", self.set.name, entry)),
                if self.set.compress_log { ".gz" } else { "" }
            );
            let log_path = tmp_dir.join(&log_name);

            if self.safe {
                info!(set = %self.set.name, cmd = %argv.join(" "), "safe mode: would run transfer");
                continue;
            }

            let result = subprocess::run(&argv, &log_path, self.set.compress_log)
                .await
                .with_context(|| format!("failed to run transfer for {entry}"))?;

            state.attachments.push(LogAttachment {
                dir_label: entry.clone(),
                path: log_path,
                compressed: self.set.compress_log,
            });

            match result.outcome {
                Outcome::Success => {
                    state.note(format!("{entry}: ok"));
                }
                Outcome::Warning => {
                    state.note(format!("{entry}: warning (retryable rsync errors)"));
                    warn!(set = %self.set.name, %entry, "transfer reported retryable warnings");
                }
                Outcome::Failure => {
                    state.note(format!(
                        "{entry}: FAILED (exit {:?}): {}",
                        result.exit_code, result.stderr.trim()
                    ));
                    state.success = false;
                    warn!(set = %self.set.name, %entry, exit_code = ?result.exit_code, "transfer failed");
                }
            }

            if self.set.sleep > 0 {
                tokio::time::sleep(Duration::from_secs(self.set.sleep)).await;
            }
        }

        if !suffix.is_empty() && !self.set.dst.is_remote {
            self.phase_rotate_symlink(&suffix);
        }
        self.phase_delete_list(&suffix);
        self.phase_cache_update(now)?;

        Ok(())
    }

    fn current_suffix(&self, now: DateTime<Local>) -> String {
        if self.set.hanoi == 0 {
            return String::new();
        }
        let first_day = self
            .set
            .hanoi_day
            .expect("validated at load time: hanoi>0 implies hanoi_day is set");
        hanoi::rotate(first_day, self.set.hanoi, now.date_naive())
            .suffix
            .to_string()
    }

    fn write_datefile(&self, tmp_dir: &Path, now: DateTime<Local>) -> Result<Option<PathBuf>> {
        let Some(name) = &self.set.date_file else { return Ok(None) };
        let path = tmp_dir.join(name);
        if self.safe {
            info!(set = %self.set.name, path = %path.display(), "safe mode: would write datefile");
            return Ok(Some(path));
        }
        std::fs::write(&path, now.timestamp().to_string())
            .with_context(|| format!("failed to write datefile {}", path.display()))?;
        Ok(Some(path))
    }

    async fn resolve_link_dests(&self, suffix: &str) -> Vec<String> {
        if !self.set.hard_link {
            return Vec::new();
        }
        match self.set.program {
            Program::Rclone => {
                warn!(
                    set = %self.set.name,
                    "HARDLINK is set but PROGRAM=rclone does not support --link-dest; ignoring"
                );
                Vec::new()
            }
            Program::Rsync => {
                let base = dst_base(&self.set.dst);
                ancestor::find(&self.set.dst, &base, &self.set.sep, suffix).await
            }
        }
    }

    fn phase_rotate_symlink(&self, suffix: &str) {
        let dst = Path::new(&self.set.dst.raw);
        let target = format!("{}{}{}", self.set.dst.raw, self.set.sep, suffix);

        if self.safe {
            info!(set = %self.set.name, dst = %dst.display(), %target, "safe mode: would rotate symlink");
            return;
        }

        match dst.symlink_metadata() {
            Ok(meta) if meta.file_type().is_symlink() => {
                if let Err(err) = std::fs::remove_file(dst) {
                    warn!(set = %self.set.name, %err, "failed to remove existing symlink");
                    return;
                }
                if let Err(err) = symlink(&target, dst) {
                    warn!(set = %self.set.name, %err, "failed to recreate symlink");
                }
            }
            Ok(_) => {
                warn!(set = %self.set.name, dst = %dst.display(), "destination exists and is not a symlink; leaving as-is");
            }
            Err(_) => {
                if let Err(err) = symlink(&target, dst) {
                    warn!(set = %self.set.name, %err, "failed to create symlink");
                }
            }
        }
    }

    fn phase_delete_list(&self, suffix: &str) {
        if self.set.delete_list.is_empty() {
            return;
        }
        let root = if suffix.is_empty() {
            self.set.dst.raw.clone()
        } else {
            format!("{}{}{}", self.set.dst.raw, self.set.sep, suffix)
        };
        for rel in &self.set.delete_list {
            let target = Path::new(&root).join(rel);
            if self.safe {
                info!(set = %self.set.name, target = %target.display(), "safe mode: would delete");
                continue;
            }
            if target.is_dir() {
                if let Err(err) = std::fs::remove_dir_all(&target) {
                    warn!(set = %self.set.name, target = %target.display(), %err, "failed to remove delete-list entry");
                }
            }
        }
    }

    fn phase_cache_update(&self, now: DateTime<Local>) -> Result<()> {
        let Some(interval) = self.set.interval else { return Ok(()) };
        if interval.is_zero() {
            return Ok(());
        }
        if self.safe {
            info!(set = %self.set.name, "safe mode: would update interval cache");
            return Ok(());
        }
        self.cache.record_run(&self.set.name, std::time::SystemTime::from(now))
    }

    fn phase_notify(&self, transport: &dyn MailTransport, now: DateTime<Local>, state: &RunState) -> Result<()> {
        if self.set.mail_to.is_empty() {
            return Ok(());
        }
        let mut body = format!("Backup of set '{}' at {}\n\n", self.set.name, now.to_rfc2822());
        for line in &state.log_lines {
            body.push_str(line);
            body.push('\n');
        }
        if self.safe {
            info!(set = %self.set.name, "safe mode: would send mail report");
            return Ok(());
        }

        let reporter = Reporter::new(transport);
        let report = Report {
            set_name: self.set.name.clone(),
            success: state.success,
            body,
            attachments: state
                .attachments
                .iter()
                .map(|a| LogAttachment {
                    dir_label: a.dir_label.clone(),
                    path: a.path.clone(),
                    compressed: a.compressed,
                })
                .collect(),
        };
        reporter.report(self.set, report)
    }

    fn phase_cleanup(&self, _state: &RunState) {
        // `tmp_dir` removes itself (and every per-directory log, and the
        // datefile it contains) when dropped at the end of `run`.
    }
}

#[cfg(unix)]
fn symlink(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &str, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "symlinks require unix"))
}

#[cfg(unix)]
fn is_mountpoint(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let Ok(meta) = std::fs::metadata(path) else { return false };
    let Some(parent) = path.parent() else { return false };
    let Ok(parent_meta) = std::fs::metadata(parent) else { return false };
    meta.dev() != parent_meta.dev()
}

#[cfg(not(unix))]
fn is_mountpoint(_path: &Path) -> bool {
    false
}

fn dst_base(dst: &PathRef) -> String {
    let raw_path = if dst.is_remote {
        dst.remote_path.clone().unwrap_or_default()
    } else {
        dst.raw.clone()
    };
    Path::new(&raw_path)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Replace `{setname}` (lower-cased) and `{dirname}` tokens.
fn substitute(template: &str, setname_lower: &str, dirname: &str) -> String {
    template.replace("{setname}", setname_lower).replace("{dirname}", dirname)
}

fn build_argv(
    set: &SetSpec,
    entry: &str,
    link_dests: &[String],
    suffix: &str,
    is_datefile: bool,
) -> Vec<String> {
    let setname_lower = set.name.to_ascii_lowercase();
    let mut argv = Vec::new();

    if let Some(n) = set.io_nice {
        argv.push("ionice".to_string());
        argv.push("-c".to_string());
        argv.push(n.to_string());
    }
    if let Some(n) = set.nice {
        argv.push("nice".to_string());
        argv.push("-n".to_string());
        argv.push(n.to_string());
    }

    argv.push(set.program.binary_name().to_string());

    for opt in set.options_for(set.program) {
        argv.push(substitute(opt, &setname_lower, entry));
    }

    for link_dest in link_dests {
        argv.push(format!("--link-dest={link_dest}"));
    }

    let source = if is_datefile {
        entry.to_string()
    } else {
        substitute(&set.src.raw, &setname_lower, entry)
    };
    argv.push(source);

    let destination = if suffix.is_empty() {
        set.dst.raw.clone()
    } else {
        format!("{}{}{}", set.dst.raw, set.sep, suffix)
    };
    argv.push(destination);

    argv
}

fn slug(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::set_spec::load_all;
    use ini::Ini;

    fn sample_set() -> SetSpec {
        let ini = Ini::load_from_str(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[Home]
SRC = /home/{setname}/{dirname}
DST = /backup/home
BACKUPLIST = docs,photos
RSYNCOPTS_01 = -a
RSYNCOPTS_02 = --stats
"#,
        )
        .unwrap();
        load_all(&ini).unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn substitution_replaces_both_tokens() {
        let s = substitute("/home/{setname}/{dirname}", "home", "docs");
        assert_eq!(s, "/home/home/docs");
        assert!(!s.contains('{'));
    }

    #[test]
    fn build_argv_includes_program_and_destination() {
        let set = sample_set();
        let argv = build_argv(&set, "docs", &[], "", false);
        assert_eq!(argv[0], "rsync");
        assert!(argv.contains(&"-a".to_string()));
        assert!(argv.contains(&"--stats".to_string()));
        assert_eq!(argv.last().unwrap(), "/backup/home");
        assert!(argv[argv.len() - 2].ends_with("/home/docs"));
    }

    #[test]
    fn build_argv_with_suffix_appends_to_destination() {
        let set = sample_set();
        let argv = build_argv(&set, "docs", &[], "A", false);
        assert_eq!(argv.last().unwrap(), "/backup/home.A");
    }

    #[test]
    fn build_argv_includes_link_dest_args() {
        let set = sample_set();
        let argv = build_argv(&set, "docs", &["/backup/home.A".to_string()], "B", false);
        assert!(argv.contains(&"--link-dest=/backup/home.A".to_string()));
    }

    #[test]
    fn datefile_entry_uses_raw_path_not_substituted_source() {
        let set = sample_set();
        let argv = build_argv(&set, "/tmp/jabs-x/DATE", &[], "", true);
        assert_eq!(argv[argv.len() - 2], "/tmp/jabs-x/DATE");
    }

    #[test]
    fn slug_replaces_unsafe_characters() {
        assert_eq!(slug("home-docs"), "home-docs");
        assert_eq!(slug("home docs/x"), "home_docs_x");
    }

    #[test]
    fn dst_base_uses_final_path_component() {
        let dst = PathRef::parse("/backup/home");
        assert_eq!(dst_base(&dst), "home");
    }

    #[test]
    fn no_template_tokens_remain_after_substitution() {
        for template in ["{setname}-{dirname}", "plain", "{dirname}"] {
            let out = substitute(template, "myset", "docs");
            assert!(!out.contains("{setname}"));
            assert!(!out.contains("{dirname}"));
        }
    }
}
