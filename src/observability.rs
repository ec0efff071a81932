// SPDX-License-Identifier: Apache-2.0

//! Process logging: JSON lines into a daily rolling file, with panics routed
//! through tracing. Stdout carries the response stream, so nothing is ever
//! written there.

use std::any::Any;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const FILE_PREFIX: &str = "sqlgate.log";
const RETENTION: Duration = Duration::from_secs(14 * 24 * 60 * 60);
const DEFAULT_FILTER: &str = "sqlgate=info,sqlgate_lib=info,sqlgate_drivers=info";

/// Where logs go and which events pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub filter: String,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::resolve(|key| std::env::var_os(key))
    }

    /// `SQLGATE_LOG_DIR` wins; otherwise `.sqlgate/logs` under the home directory
    fn resolve<G>(get: G) -> Self
    where
        G: Fn(&str) -> Option<OsString>,
    {
        let non_empty = |key: &str| get(key).filter(|value| !value.is_empty());

        let dir = match non_empty("SQLGATE_LOG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = non_empty("HOME")
                    .or_else(|| non_empty("USERPROFILE"))
                    .unwrap_or_default();
                PathBuf::from(home).join(".sqlgate").join("logs")
            }
        };
        let filter = non_empty("RUST_LOG")
            .and_then(|value| value.into_string().ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());

        Self { dir, filter }
    }
}

/// Installs the global subscriber and the panic hook
///
/// The returned guard flushes buffered lines on drop; keep it alive until
/// shutdown. When the log directory is unusable, events go to stderr and no
/// guard is returned. A second call leaves the first subscriber in place.
pub fn init_tracing() -> Option<WorkerGuard> {
    let settings = LogSettings::from_env();
    let filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let appender = fs::create_dir_all(&settings.dir)
        .map_err(|e| e.to_string())
        .and_then(|()| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(FILE_PREFIX)
                .build(&settings.dir)
                .map_err(|e| e.to_string())
        });

    let guard = match appender {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .json()
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(true)
                .with_span_list(true)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .try_init();
            Some(guard)
        }
        Err(reason) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .try_init();
            tracing::warn!(dir = %settings.dir.display(), reason = %reason, "Log directory unusable, logging to stderr");
            None
        }
    };

    match prune_logs(&settings.dir, RETENTION, SystemTime::now()) {
        Ok(removed) if !removed.is_empty() => {
            tracing::debug!(removed = removed.len(), "Pruned expired log files");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Could not prune expired log files"),
    }

    install_panic_hook();
    tracing::info!(dir = %settings.dir.display(), filter = %settings.filter, "Logging initialized");
    guard
}

/// Deletes rotated `sqlgate.log*` files last modified before `now - retention`
///
/// Other files in the directory are never touched. Returns the removed paths.
pub fn prune_logs(dir: &Path, retention: Duration, now: SystemTime) -> std::io::Result<Vec<PathBuf>> {
    let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let ours = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(FILE_PREFIX));
        if !ours || !path.is_file() {
            continue;
        }

        let Ok(modified) = fs::metadata(&path).and_then(|meta| meta.modified()) else {
            continue;
        };
        if modified < cutoff {
            fs::remove_file(&path)?;
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Logs panics as `error` events, then hands over to the previous hook
fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(
            target: "panic",
            location = %location,
            payload = panic_message(info.payload()),
            "Gateway task panicked"
        );
        previous(info);
    }));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        LogSettings::resolve(|key| vars.get(key).cloned())
    }

    #[test]
    fn log_dir_prefers_explicit_setting() {
        let resolved = settings(&[("SQLGATE_LOG_DIR", "/var/log/sqlgate"), ("HOME", "/home/op")]);
        assert_eq!(resolved.dir, PathBuf::from("/var/log/sqlgate"));
        assert_eq!(resolved.filter, DEFAULT_FILTER);
    }

    #[test]
    fn log_dir_falls_back_to_home() {
        let resolved = settings(&[("SQLGATE_LOG_DIR", ""), ("HOME", "/home/op"), ("RUST_LOG", "debug")]);
        assert_eq!(resolved.dir, PathBuf::from("/home/op/.sqlgate/logs"));
        assert_eq!(resolved.filter, "debug");
    }

    #[test]
    fn prune_spares_recent_and_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sqlgate.log.2026-01-01"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let removed = prune_logs(dir.path(), RETENTION, SystemTime::now()).unwrap();

        assert!(removed.is_empty());
        assert!(dir.path().join("sqlgate.log.2026-01-01").exists());
    }

    #[test]
    fn prune_removes_only_expired_gateway_logs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sqlgate.log.2026-01-01"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let later = SystemTime::now() + RETENTION + Duration::from_secs(60);
        let removed = prune_logs(dir.path(), RETENTION, later).unwrap();

        assert_eq!(removed, vec![dir.path().join("sqlgate.log.2026-01-01")]);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("pool gone"));
        let opaque: Box<dyn Any + Send> = Box::new(7u8);

        assert_eq!(panic_message(literal.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "pool gone");
        assert_eq!(panic_message(opaque.as_ref()), "non-string panic payload");
    }
}
