//! enumerates candidate previous-generation directories to pass as
//! `--link-dest` hard-link sources.

use crate::pathref::PathRef;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;
use tokio::process::Command;
use tracing::warn;

/// Finds hard-link ancestor directories for `dst`, most-recent first,
/// excluding the directory we are about to overwrite (`base + sep +
/// current_suffix`). Remote discovery is best-effort: any failure (ssh
/// exits non-zero, output is unparseable) logs a warning and yields an
/// empty list — hard-linking must never abort the backup.
pub async fn find(dst: &PathRef, base: &str, sep: &str, current_suffix: &str) -> Vec<String> {
    let exclude = format!("{base}{sep}{current_suffix}");
    if dst.is_remote {
        find_remote(dst, base, sep, &exclude).await
    } else {
        find_local(Path::new(&dst.raw), base, sep, &exclude)
    }
}

fn matches_base(name: &str, base: &str, sep: &str) -> bool {
    name == base || name.starts_with(&format!("{base}{sep}"))
}

fn find_local(dst_path: &Path, base: &str, sep: &str, exclude: &str) -> Vec<String> {
    let parent = match dst_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let entries = match std::fs::read_dir(parent) {
        Ok(e) => e,
        Err(err) => {
            warn!(%err, parent = %parent.display(), "cannot list directory for ancestor discovery");
            return Vec::new();
        }
    };

    let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !matches_base(name, base, sep) {
            continue;
        }
        if name == exclude {
            continue;
        }
        // stat the path itself, not a potential symlink target: a
        // symlink pointing at a directory must not be treated as a
        // hard-link ancestor.
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !meta.is_dir() {
            continue;
        }
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push((mtime, entry.path()));
    }

    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates
        .into_iter()
        .map(|(_, p)| p.to_string_lossy().to_string())
        .collect()
}

async fn find_remote(dst: &PathRef, base: &str, sep: &str, exclude: &str) -> Vec<String> {
    let Some(target) = dst.user_at_host() else {
        return Vec::new();
    };
    let Some(remote_path) = dst.remote_path.as_deref() else {
        return Vec::new();
    };
    let parent = match Path::new(remote_path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().to_string(),
        _ => ".".to_string(),
    };

    let remote_cmd = format!("ls -l --color=never --time-style=long-iso -t -1 '{parent}'");
    let output = Command::new("ssh")
        .args(["-o", "BatchMode=true", &target, &remote_cmd])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    let output = match output {
        Ok(o) => o,
        Err(err) => {
            warn!(%err, %target, "failed to spawn ssh for ancestor discovery");
            return Vec::new();
        }
    };

    if !output.status.success() {
        warn!(
            %target,
            status = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "ssh ls failed during ancestor discovery"
        );
        return Vec::new();
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut result = Vec::new();
    for line in stdout.lines() {
        let Some(name) = parse_ls_line(line) else { continue };
        if !matches_base(&name, base, sep) || name == exclude {
            continue;
        }
        result.push(format!("{parent}/{name}"));
    }
    // `-t` already orders by mtime descending; preserve that order.
    result
}

/// Parse one `ls -l --time-style=long-iso` line: mode, link-count, user,
/// group, size, `YYYY-MM-DD HH:MM`, name. Only directory entries (mode
/// starting with `d`) are returned.
fn parse_ls_line(line: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    let mode = parts.next()?;
    if !mode.starts_with('d') {
        return None;
    }
    let _links = parts.next()?;
    let _user = parts.next()?;
    let _group = parts.next()?;
    let _size = parts.next()?;
    let _date = parts.next()?;
    let _time = parts.next()?;

    // The name may itself contain spaces, so reconstruct it by finding the
    // 7th whitespace-run boundary instead of splitting further.
    let mut idx = 0usize;
    let mut seen_fields = 0;
    let bytes = line.as_bytes();
    let mut in_field = false;
    while idx < bytes.len() {
        let is_space = bytes[idx].is_ascii_whitespace();
        if !is_space && !in_field {
            in_field = true;
        } else if is_space && in_field {
            in_field = false;
            seen_fields += 1;
            if seen_fields == 7 {
                break;
            }
        }
        idx += 1;
    }
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    if idx >= bytes.len() {
        return None;
    }
    Some(line[idx..].to_string())
}
