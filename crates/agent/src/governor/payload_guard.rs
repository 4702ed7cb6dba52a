//! Runaway-growth failsafe.
//!
//! Compares the estimated size of each outgoing request with the previous
//! pass. If the payload balloons, the history is dumped to disk for forensics
//! and the process is terminated before the request is sent.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};

use crate::history::HistoryStore;

pub const DEFAULT_GROWTH_FACTOR: f64 = 2.0;
pub const DEFAULT_MIN_GROWTH_BYTES: usize = 1024;
pub const DEFAULT_FAILSAFE_DIR: &str = ".openagent/failsafe-history";

/// Ends the process. Tests substitute a recorder.
pub trait ProcessTerminator: Send + Sync {
    fn terminate(&self, code: i32);
}

/// Exits the real process.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdProcessTerminator;

impl ProcessTerminator for StdProcessTerminator {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardVerdict {
    /// No baseline yet, or growth within bounds
    Ok,
    /// Growth tripped the failsafe; `dump` is the snapshot path if written
    Tripped {
        previous: usize,
        current: usize,
        dump: Option<PathBuf>,
    },
}

pub struct PayloadGuard {
    growth_factor: f64,
    min_growth_bytes: usize,
    dump_dir: PathBuf,
    baseline: Mutex<Option<usize>>,
    terminator: Box<dyn ProcessTerminator>,
}

impl std::fmt::Debug for PayloadGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadGuard")
            .field("growth_factor", &self.growth_factor)
            .field("min_growth_bytes", &self.min_growth_bytes)
            .field("dump_dir", &self.dump_dir)
            .field("baseline", &self.baseline())
            .finish()
    }
}

impl Default for PayloadGuard {
    fn default() -> Self {
        Self::new(DEFAULT_FAILSAFE_DIR)
    }
}

impl PayloadGuard {
    /// A guard dumping into `dump_dir` (relative paths resolve against the
    /// working directory).
    pub fn new(dump_dir: impl Into<PathBuf>) -> Self {
        Self {
            growth_factor: DEFAULT_GROWTH_FACTOR,
            min_growth_bytes: DEFAULT_MIN_GROWTH_BYTES,
            dump_dir: dump_dir.into(),
            baseline: Mutex::new(None),
            terminator: Box::new(StdProcessTerminator),
        }
    }

    pub fn with_growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    pub fn with_min_growth_bytes(mut self, bytes: usize) -> Self {
        self.min_growth_bytes = bytes;
        self
    }

    pub fn with_terminator(mut self, terminator: impl ProcessTerminator + 'static) -> Self {
        self.terminator = Box::new(terminator);
        self
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    pub fn baseline(&self) -> Option<usize> {
        self.baseline.lock().ok().and_then(|slot| *slot)
    }

    /// Remember the size of the request just sent.
    pub fn record(&self, bytes: usize) {
        if let Ok(mut slot) = self.baseline.lock() {
            *slot = Some(bytes);
        }
    }

    fn is_runaway(&self, previous: usize, current: usize) -> bool {
        let growth = current.saturating_sub(previous);
        let ratio = if previous > 0 {
            current as f64 / previous as f64
        } else {
            f64::INFINITY
        };
        ratio >= self.growth_factor && growth > self.min_growth_bytes
    }

    /// Check `current` against the baseline. On a trip: log, dump history,
    /// then terminate with exit code 1.
    pub fn evaluate(&self, current: usize, history: &HistoryStore, pass: u32) -> GuardVerdict {
        let Some(previous) = self.baseline() else {
            return GuardVerdict::Ok;
        };
        if !self.is_runaway(previous, current) {
            return GuardVerdict::Ok;
        }

        tracing::error!(
            previous,
            current,
            pass,
            "[failsafe] OpenAI request ballooned from {previous}B to {current}B on pass {pass}."
        );

        let dump = match self.dump_history(history, pass) {
            Ok(path) => {
                tracing::error!(
                    path = %path.display(),
                    "[failsafe] Dumped history snapshot to {}.",
                    path.display()
                );
                Some(path)
            }
            Err(error) => {
                tracing::error!(%error, "[failsafe] Failed to persist history snapshot.");
                None
            }
        };

        tracing::error!("[failsafe] Exiting to prevent excessive API charges.");
        self.terminator.terminate(1);

        GuardVerdict::Tripped {
            previous,
            current,
            dump,
        }
    }

    fn dump_history(&self, history: &HistoryStore, pass: u32) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dump_dir)?;
        let stamp = Utc::now()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        let path = self.dump_dir.join(format!("pass-{pass}-{stamp}.json"));
        let json = history.to_pretty_json().map_err(std::io::Error::other)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openagent_core::history::HistoryEntry;
    use openagent_core::message::Role;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct RecordingTerminator {
        codes: Arc<Mutex<Vec<i32>>>,
    }

    impl ProcessTerminator for RecordingTerminator {
        fn terminate(&self, code: i32) {
            self.codes.lock().unwrap().push(code);
        }
    }

    fn history() -> HistoryStore {
        let mut history = HistoryStore::with_system_prompt("sys");
        history.push(HistoryEntry::chat(Role::User, "hi", 1));
        history
    }

    #[test]
    fn balloon_dumps_history_and_exits() {
        let dir = tempfile::tempdir().unwrap();
        let terminator = RecordingTerminator::default();
        let guard = PayloadGuard::new(dir.path().join("failsafe"))
            .with_terminator(terminator.clone());

        guard.record(1000);
        let verdict = guard.evaluate(3000, &history(), 5);

        let GuardVerdict::Tripped { dump: Some(path), previous, current } = verdict else {
            panic!("expected a trip with a dump, got {verdict:?}");
        };
        assert_eq!((previous, current), (1000, 3000));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("pass-5-"));
        assert!(name.ends_with(".json"));
        assert!(!name.contains(':'));

        let dumped: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(dumped.as_array().unwrap().len(), 2);
        assert_eq!(*terminator.codes.lock().unwrap(), vec![1]);
    }

    #[test]
    fn first_pass_has_no_baseline() {
        let terminator = RecordingTerminator::default();
        let guard = PayloadGuard::default().with_terminator(terminator.clone());
        assert_eq!(guard.evaluate(1_000_000, &history(), 1), GuardVerdict::Ok);
        assert!(terminator.codes.lock().unwrap().is_empty());
    }

    #[test]
    fn growth_needs_both_ratio_and_absolute_bytes() {
        let terminator = RecordingTerminator::default();
        let guard = PayloadGuard::default().with_terminator(terminator.clone());

        // tripled, but only 200 bytes more
        guard.record(100);
        assert_eq!(guard.evaluate(300, &history(), 2), GuardVerdict::Ok);

        // 1500 bytes more, but only 1.15x
        guard.record(10_000);
        assert_eq!(guard.evaluate(11_500, &history(), 3), GuardVerdict::Ok);

        assert!(terminator.codes.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_baseline_counts_as_infinite_growth() {
        let dir = tempfile::tempdir().unwrap();
        let terminator = RecordingTerminator::default();
        let guard = PayloadGuard::new(dir.path()).with_terminator(terminator.clone());
        guard.record(0);
        assert!(matches!(
            guard.evaluate(5000, &history(), 2),
            GuardVerdict::Tripped { .. }
        ));
    }
}
