//! Non-fatal diagnostic events and the sinks that receive them.
//!
//! The core never writes to a logging sink directly for caller-facing warnings;
//! it emits a [`Diagnostic`] to whatever [`DiagnosticSink`] the caller supplied.
//! [`TracingSink`] forwards to `tracing` and is the default.

use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The posterior sample carries saved warmup draws, and these feed the generation run.
    SavedWarmupUsed { chains: usize, warmup_rows: usize },

    /// A chain exited unsuccessfully. Recorded, not raised.
    ChainFailed {
        chain: usize,
        retcode: Option<i32>,
        stderr: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::SavedWarmupUsed { .. } => write!(
                f,
                "Sample contains saved warmup draws which will be used to generate additional quantities of interest."
            ),
            Diagnostic::ChainFailed {
                chain,
                retcode,
                stderr,
            } => {
                write!(f, "Chain {chain} failed with return code {retcode:?}")?;
                if !stderr.is_empty() {
                    write!(f, ": {}", stderr.lines().last().unwrap_or_default())?;
                }
                Ok(())
            }
        }
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: &Diagnostic);
}

/// Forwards every event to `tracing::warn!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        tracing::warn!(target: "mini_runset", "{diagnostic}");
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(diagnostic.clone());
    }
}

impl<F> DiagnosticSink for F
where
    F: Fn(&Diagnostic) + Send + Sync,
{
    fn emit(&self, diagnostic: &Diagnostic) {
        self(diagnostic)
    }
}
