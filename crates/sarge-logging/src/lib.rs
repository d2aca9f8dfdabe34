//! ---
//! sarge_section: "03-logging"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Structured lifecycle logging helpers."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Lifecycle-aware logging helpers: a small [`LogContext`] carried into the
//! `sarge_*!` macros and [`log_lifecycle_event`].

use tracing::Level;

pub mod macros;

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Instance identifier associated with the log event.
    pub instance: Option<&'a str>,
    /// Lifecycle operation (`start`, `stop`, `destroy`, ...).
    pub operation: Option<&'a str>,
    /// Bus signal being dispatched, if any.
    pub signal: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an instance identifier.
    pub fn with_instance(mut self, instance: &'a str) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Attach a lifecycle operation name.
    pub fn with_operation(mut self, operation: &'a str) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Attach a signal name.
    pub fn with_signal(mut self, signal: &'a str) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Outcome recorded for a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The operation completed.
    Success,
    /// The operation failed and its error was surfaced to the caller.
    Fault,
}

impl LifecycleOutcome {
    /// Stable lowercase label used in the `outcome` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Success => "success",
            LifecycleOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with a success/fault outcome.
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    match outcome {
        LifecycleOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            instance = ctx.instance.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            signal = ctx.signal.unwrap_or(""),
            message = %message
        ),
        LifecycleOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            instance = ctx.instance.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            signal = ctx.signal.unwrap_or(""),
            message = %message
        ),
    }
}
