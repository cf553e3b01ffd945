//! C10: Fatal/Error/Warning channels (spec.md §4's "Diagnostics" component, §7).
//!
//! Three severities, one behavior each:
//! - `fatal`  — print and terminate the process immediately.
//! - `error`  — print immediately, mark `ctx.has_error`, keep going until the
//!   next checkpoint.
//! - `warn`   — print unless suppressed; escalated to `error` by `--fatal-warnings`.
//!
//! The undef-symbol path gets its own aggregator since spec.md §7 requires
//! per-symbol capping (`MAX_ERRORS = 3`) rather than one line per occurrence.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

/// Per-symbol occurrence cap before we fold remaining references into a summary line.
pub const MAX_ERRORS: usize = 3;

#[derive(Debug, Default)]
pub struct Diagnostics {
    pub has_error: AtomicBool,
    pub fatal_warnings: bool,
    pub suppress_warnings: bool,
    // serializes the "print+exit" fatal path so interleaved threads
    // never tear a fatal message in half.
    fatal_lock: Mutex<()>,
    undef_refs: DashMap<String, Vec<String>>,
}

impl Diagnostics {
    pub fn new(fatal_warnings: bool, suppress_warnings: bool) -> Self {
        Diagnostics {
            has_error: AtomicBool::new(false),
            fatal_warnings,
            suppress_warnings,
            fatal_lock: Mutex::new(()),
            undef_refs: DashMap::new(),
        }
    }

    /// Print a message and terminate the process. Never returns.
    pub fn fatal(&self, msg: impl fmt::Display) -> ! {
        let _guard = self.fatal_lock.lock();
        eprintln!("cold: fatal: {msg}");
        std::process::exit(1);
    }

    /// Record a non-fatal error. The link continues to the next checkpoint,
    /// then the driver exits non-zero.
    pub fn error(&self, msg: impl fmt::Display) {
        eprintln!("cold: error: {msg}");
        self.has_error.store(true, Ordering::Release);
    }

    /// Print a warning, honoring `--fatal-warnings` and `-w`/`--no-warnings`.
    pub fn warn(&self, msg: impl fmt::Display) {
        if self.fatal_warnings {
            self.error(format_args!("(upgraded from warning) {msg}"));
            return;
        }
        if !self.suppress_warnings {
            eprintln!("cold: warning: {msg}");
        }
    }

    /// Returns true if any checkpoint should abort the link.
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::Acquire)
    }

    /// Called after each major pass; exits the process non-zero if an
    /// error has accumulated. Fatal errors already exited on their own.
    pub fn checkpoint(&self) {
        if self.has_error() {
            eprintln!("cold: error: link failed");
            std::process::exit(1);
        }
    }

    /// Record one reference to an undefined symbol `name` from `referrer`.
    pub fn record_undef_ref(&self, name: &str, referrer: &str) {
        self.undef_refs
            .entry(name.to_string())
            .or_default()
            .push(referrer.to_string());
        self.has_error.store(true, Ordering::Release);
    }

    /// Emit the aggregated undefined-symbol report: up to `MAX_ERRORS`
    /// concrete references per symbol, then a "referenced N more times"
    /// summary, as required by spec.md §7.
    pub fn report_undef_symbols(&self) {
        let mut names: Vec<_> = self
            .undef_refs
            .iter()
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        for name in names {
            let Some(refs) = self.undef_refs.get(&name) else {
                continue;
            };
            eprintln!("cold: undefined symbol: {name}");
            for referrer in refs.iter().take(MAX_ERRORS) {
                eprintln!("  referenced by {referrer}");
            }
            if refs.len() > MAX_ERRORS {
                eprintln!(
                    "  ... referenced {} more times",
                    refs.len() - MAX_ERRORS
                );
            }
        }
    }

    pub fn undef_count(&self) -> usize {
        self.undef_refs.len()
    }
}

/// Structured errors that diagnostics code needs to match on, as opposed to
/// the free-form `anyhow::Error` used at the driver boundary.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("duplicate symbol `{name}` defined in both {first} and {second}")]
    DuplicateSymbol {
        name: String,
        first: String,
        second: String,
    },
    #[error("undefined symbol: {name} (referenced by {referrer})")]
    UndefinedSymbol { name: String, referrer: String },
    #[error("hidden symbol `{name}` cannot be satisfied by shared object {dso}")]
    HiddenSymbolInDso { name: String, dso: String },
    #[error("relocation {reloc_type} against `{symbol}` out of range: {value:#x} not in [{low:#x}, {high:#x})")]
    RelocOutOfRange {
        reloc_type: String,
        symbol: String,
        value: i64,
        low: i64,
        high: i64,
    },
    #[error("unsupported relocation type {0} for this target")]
    UnsupportedRelocation(u32),
    #[error("malformed ELF input {path}: {reason}")]
    MalformedElf { path: String, reason: String },
    #[error("image base {0:#x} is not a multiple of the page size")]
    BadImageBase(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undef_refs_cap_at_max_errors() {
        let diag = Diagnostics::new(false, true);
        for i in 0..5 {
            diag.record_undef_ref("foo", &format!("obj{i}.o"));
        }
        assert_eq!(diag.undef_refs.get("foo").unwrap().len(), 5);
        assert!(diag.has_error());
    }

    #[test]
    fn fatal_warnings_promotes_warn_to_error() {
        let diag = Diagnostics::new(true, false);
        assert!(!diag.has_error());
        diag.warn("a textrel was created");
        assert!(diag.has_error());
    }
}
