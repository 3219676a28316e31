//! Diagnostic sink: accepts severity-tagged reports from the scope
//! checker and the evaluator, counts errors, and suppresses further
//! diagnostics of the same class past a configurable threshold.
//!
//! Rendering a diagnostic into a source listing is an external concern;
//! this crate only accumulates structured `Diagnostic` values and answers
//! "should execution abort" / "should this class still be reported".

use std::sync::atomic::{AtomicU32, Ordering};

use core_model::{ModeId, NodeId};

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    SyntaxError,
    RuntimeError,
}

impl Severity {
    pub fn is_fatal(self) -> bool {
        matches!(self, Severity::Error | Severity::SyntaxError | Severity::RuntimeError)
    }
}

/// A short classifier naming the diagnostic kind, independent of its
/// rendered message — the runtime error taxonomy plus the two
/// pre-execution scope errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    UninitialisedValue,
    AccessingNil,
    OutOfBounds,
    DifferentBounds,
    ScopeViolationStatic,
    ScopeViolationDynamic,
    TransientStored,
    DivideByZero,
    StackExhausted,
    OutOfCore,
    TooManyErrors,
    AssertionFailed,
    IntegerOverflow,
}

/// A tagged argument attached to a diagnostic, replacing the variadic
/// format-code approach of the collaborator this core receives text from.
#[derive(Debug, Clone)]
pub enum DiagArg {
    Mode(ModeId),
    Node(NodeId),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: Kind,
    pub node: Option<NodeId>,
    pub line: u32,
    pub args: Vec<DiagArg>,
}

/// Per-process diagnostic counters, kept as plain atomics the way
/// `core-events`'s channel/paste telemetry is kept — cheap to read from
/// tests without locking.
#[derive(Debug, Default)]
pub struct Counters {
    pub warnings: AtomicU32,
    pub errors: AtomicU32,
    pub suppressed: AtomicU32,
}

/// Accepts reports, retains them, and decides suppression.
#[derive(Debug)]
pub struct Sink {
    diagnostics: Vec<Diagnostic>,
    counters: Counters,
    /// Once `errors` reaches this count, further error-severity reports
    /// are counted as suppressed instead of retained. `None` disables
    /// suppression. Configured from `core-config`.
    threshold: Option<u32>,
}

impl Default for Sink {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Sink {
    pub fn new(threshold: Option<u32>) -> Self {
        Self { diagnostics: Vec::new(), counters: Counters::default(), threshold }
    }

    pub fn report(&mut self, severity: Severity, node: Option<NodeId>, line: u32, kind: Kind, args: Vec<DiagArg>) {
        if severity == Severity::Warning {
            self.counters.warnings.fetch_add(1, Ordering::Relaxed);
        } else {
            let prior = self.counters.errors.fetch_add(1, Ordering::Relaxed);
            if let Some(threshold) = self.threshold {
                if prior >= threshold {
                    self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(?kind, "diagnostic suppressed past error threshold");
                    return;
                }
            }
        }
        tracing::debug!(?severity, ?kind, line, "diagnostic reported");
        self.diagnostics.push(Diagnostic { severity, kind, node, line, args });
    }

    pub fn has_fatal(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity.is_fatal())
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn error_count(&self) -> u32 {
        self.counters.errors.load(Ordering::Relaxed)
    }

    pub fn suppressed_count(&self) -> u32 {
        self.counters.suppressed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_past_threshold() {
        let mut sink = Sink::new(Some(2));
        for _ in 0..5 {
            sink.report(Severity::RuntimeError, None, 1, Kind::DivideByZero, vec![]);
        }
        assert_eq!(sink.error_count(), 5);
        assert_eq!(sink.diagnostics().len(), 2);
        assert_eq!(sink.suppressed_count(), 3);
    }

    #[test]
    fn warnings_do_not_count_toward_threshold() {
        let mut sink = Sink::new(Some(1));
        sink.report(Severity::Warning, None, 1, Kind::ScopeViolationStatic, vec![]);
        sink.report(Severity::RuntimeError, None, 2, Kind::DivideByZero, vec![]);
        assert_eq!(sink.diagnostics().len(), 2);
        assert!(sink.has_fatal());
    }
}
