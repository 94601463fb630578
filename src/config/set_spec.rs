//! immutable, validated description of one backup set.

use super::view::{ConfigView, TimeRange};
use crate::pathref::PathRef;
use anyhow::{anyhow, ensure, Context, Result};
use chrono::NaiveDate;
use ini::Ini;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    Rsync,
    Rclone,
}

impl Program {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RSYNC" => Ok(Program::Rsync),
            "RCLONE" => Ok(Program::Rclone),
            other => Err(anyhow!("unknown PROGRAM '{other}', expected RSYNC or RCLONE")),
        }
    }

    pub fn binary_name(self) -> &'static str {
        match self {
            Program::Rsync => "rsync",
            Program::Rclone => "rclone",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SetSpec {
    pub name: String,
    pub program: Program,
    pub backup_list: Vec<String>,
    pub delete_list: Vec<String>,
    pub rsync_opts: Vec<String>,
    pub rclone_opts: Vec<String>,
    pub src: PathRef,
    pub dst: PathRef,
    pub io_nice: Option<i64>,
    pub nice: Option<i64>,
    pub sleep: u64,
    pub hanoi: u32,
    pub hanoi_day: Option<NaiveDate>,
    pub hard_link: bool,
    pub check_dst: bool,
    pub sep: String,
    pub pri: i64,
    pub date_file: Option<String>,
    pub interval: Option<Duration>,
    pub ping: bool,
    pub run_time: TimeRange,
    pub mount: Option<String>,
    pub umount: Option<String>,
    pub disabled: bool,
    pub pre: Vec<String>,
    pub skip_on_pre_error: bool,
    pub mail_to: Vec<String>,
    pub mail_from: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub compress_log: bool,
}

impl SetSpec {
    /// Build and validate one set from its section of the loaded INI file.
    pub fn from_config(ini: &Ini, section_name: &str) -> Result<SetSpec> {
        let view = ConfigView::new(ini, section_name);

        let program = match view.str_opt("PROGRAM") {
            Some(p) => Program::parse(&p)?,
            None => Program::Rsync,
        };

        let hanoi = view.int("HANOI", 0)?;
        let hanoi: u32 = hanoi
            .try_into()
            .map_err(|_| anyhow!("HANOI must be >= 0 in [{section_name}]"))?;
        let hanoi_day = view.date("HANOIDAY")?;
        ensure!(
            hanoi == 0 || hanoi_day.is_some(),
            "HANOIDAY is required in [{section_name}] when HANOI > 0"
        );

        let sep = view.str("SEP", ".");
        ensure!(!sep.is_empty(), "SEP must not be empty in [{section_name}]");

        let src = PathRef::parse(&view.required_str("SRC").or_else(|_| {
            // some sets express SRC as a multi-key list; take the first
            // as the canonical src for ping/hard-link purposes if a bare
            // SRC key is absent.
            view.multi("SRC")
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("missing SRC in [{section_name}]"))
        })?);
        let dst = PathRef::parse(&view.required_str("DST")?);

        let ping = view.bool("PING", false);
        if ping {
            ensure!(
                !(src.is_remote && dst.is_remote),
                "PING is set in [{section_name}] but both SRC and DST are remote"
            );
        }

        let backup_list = view.multi("BACKUPLIST");
        ensure!(
            !backup_list.is_empty(),
            "BACKUPLIST is empty in [{section_name}]"
        );

        Ok(SetSpec {
            name: section_name.to_string(),
            program,
            backup_list,
            delete_list: view.list("DELETELIST"),
            rsync_opts: view.multi("RSYNCOPTS"),
            rclone_opts: view.multi("RCLONEOPTS"),
            src,
            dst,
            io_nice: view.int_opt("IONICE")?,
            nice: view.int_opt("NICE")?,
            sleep: view.int("SLEEP", 0)?.max(0) as u64,
            hanoi,
            hanoi_day,
            hard_link: view.bool("HARDLINK", false),
            check_dst: view.bool("CHECKDST", false),
            sep,
            pri: view.int("PRI", 100)?,
            date_file: view.str_opt("DATEFILE"),
            interval: view.duration("INTERVAL")?,
            ping,
            run_time: view
                .time_range("RUNTIME", TimeRange::whole_day())
                .context("RUNTIME")?,
            mount: view.str_opt("MOUNT"),
            umount: view.str_opt("UMOUNT"),
            disabled: view.bool("DISABLED", false),
            pre: view.multi("PRE"),
            skip_on_pre_error: view.bool("SKIPONPREERROR", true),
            mail_to: view.list("MAILTO"),
            mail_from: view.str_opt("MAILFROM"),
            smtp_host: view.str_opt("SMTPHOST"),
            smtp_user: view.str_opt("SMTPUSER"),
            smtp_pass: view.str_opt("SMTPPASS"),
            compress_log: view.bool("COMPRESSLOG", false),
        })
    }

    /// Resolve the remote host to `ping`: exactly one of src/dst must be
    /// remote.
    pub fn ping_host(&self) -> Result<Option<String>> {
        if !self.ping {
            return Ok(None);
        }
        match (self.src.is_remote, self.dst.is_remote) {
            (true, false) => Ok(self.src.user_at_host()),
            (false, true) => Ok(self.dst.user_at_host()),
            (false, false) => Ok(None),
            (true, true) => Err(anyhow!(
                "set '{}' has PING set but both SRC and DST are remote",
                self.name
            )),
        }
    }

    pub fn options_for(&self, program: Program) -> &[String] {
        match program {
            Program::Rsync => &self.rsync_opts,
            Program::Rclone => &self.rclone_opts,
        }
    }
}

/// Load the full ordered, validated list of sets from a parsed config file.
/// Sorted by `pri` ascending; ties keep file order (INI preserves insertion
/// order, so a stable sort is sufficient).
pub fn load_all(ini: &Ini) -> Result<Vec<SetSpec>> {
    ini.section(Some(super::view::GLOBAL_SECTION))
        .ok_or_else(|| anyhow!("config file has no [Global] section"))?
        .get("PIDFILE")
        .ok_or_else(|| anyhow!("[Global] section is missing required key PIDFILE"))?;

    let mut sets = Vec::new();
    for (section, _) in ini.iter() {
        let Some(name) = section else { continue };
        if name == super::view::GLOBAL_SECTION {
            continue;
        }
        sets.push(SetSpec::from_config(ini, name).with_context(|| format!("set '{name}'"))?);
    }

    let mut seen = std::collections::HashSet::new();
    for s in &sets {
        ensure!(
            seen.insert(s.name.to_ascii_lowercase()),
            "duplicate set name '{}' (set names are case-insensitive)",
            s.name
        );
    }

    sets.sort_by_key(|s| s.pri);
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Ini {
        Ini::load_from_str(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[home]
SRC = /home/user
DST = /backup/home
BACKUPLIST = /home/user/docs,/home/user/photos
HANOI = 3
HANOIDAY = 2024-01-01
PRI = 10

[var]
SRC = backup@remote.example.com:/var
DST = /backup/var
BACKUPLIST = /var/lib
PRI = 5
"#,
        )
        .unwrap()
    }

    #[test]
    fn loads_and_sorts_by_priority() {
        let ini = fixture();
        let sets = load_all(&ini).unwrap();
        assert_eq!(sets.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["var", "home"]);
    }

    #[test]
    fn hanoi_requires_hanoi_day() {
        let ini = Ini::load_from_str(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[broken]
SRC = /a
DST = /b
BACKUPLIST = /a
HANOI = 2
"#,
        )
        .unwrap();
        assert!(load_all(&ini).is_err());
    }

    #[test]
    fn ping_with_both_remote_is_an_error() {
        let ini = Ini::load_from_str(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[bothremote]
SRC = a@h1:/a
DST = b@h2:/b
BACKUPLIST = /a
PING = true
"#,
        )
        .unwrap();
        let set = SetSpec::from_config(&ini, "bothremote").unwrap();
        assert!(set.ping_host().is_err());
    }

    #[test]
    fn missing_pidfile_is_config_error() {
        let ini = Ini::load_from_str("[Global]\nFOO = bar\n").unwrap();
        assert!(load_all(&ini).is_err());
    }

    #[test]
    fn plain_comma_list_backuplist_and_rsyncopts_split_with_no_suffixes() {
        let ini = Ini::load_from_str(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[home]
SRC = /home/user
DST = /backup/home
BACKUPLIST = /home/user/docs,/home/user/photos
RSYNCOPTS = -a,--stats
"#,
        )
        .unwrap();
        let set = SetSpec::from_config(&ini, "home").unwrap();
        assert_eq!(set.backup_list, vec!["/home/user/docs", "/home/user/photos"]);
        assert_eq!(set.rsync_opts, vec!["-a", "--stats"]);
    }
}
