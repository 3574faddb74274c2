//! ---
//! mhe_section: "03-logging"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Structured logging adapters for lifecycle operations."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Lifecycle-aware logging context and macros shared by the gateway crates.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogContext<'a> {
    /// Infrastructure endpoint host the request is addressed to.
    pub target: Option<&'a str>,
    /// Entity identifier the operation acts on.
    pub entity: Option<&'a str>,
    /// Lifecycle action name.
    pub action: Option<&'a str>,
    /// Orchestrator state at the time of the event.
    pub state: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a target host.
    pub fn with_target(mut self, target: &'a str) -> Self {
        self.target = Some(target);
        self
    }

    /// Attach an entity identifier.
    pub fn with_entity(mut self, entity: &'a str) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Attach an action name.
    pub fn with_action(mut self, action: &'a str) -> Self {
        self.action = Some(action);
        self
    }

    /// Attach an orchestrator state name.
    pub fn with_state(mut self, state: &'a str) -> Self {
        self.state = Some(state);
        self
    }
}

/// Terminal outcome recorded for a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventOutcome {
    /// The operation was accepted by the platform.
    Accepted,
    /// The operation was refused before any mutation.
    Rejected,
    /// The operation failed while mutating the entity.
    Fault,
}

impl LifecycleEventOutcome {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventOutcome::Accepted => "accepted",
            LifecycleEventOutcome::Rejected => "rejected",
            LifecycleEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with its outcome.
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleEventOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    match outcome {
        LifecycleEventOutcome::Accepted => tracing::info!(
            event,
            outcome = outcome.as_str(),
            target_host = ctx.target.unwrap_or(""),
            entity = ctx.entity.unwrap_or(""),
            action = ctx.action.unwrap_or(""),
            message = %message
        ),
        LifecycleEventOutcome::Rejected => tracing::warn!(
            event,
            outcome = outcome.as_str(),
            target_host = ctx.target.unwrap_or(""),
            entity = ctx.entity.unwrap_or(""),
            action = ctx.action.unwrap_or(""),
            message = %message
        ),
        LifecycleEventOutcome::Fault => tracing::error!(
            event,
            outcome = outcome.as_str(),
            target_host = ctx.target.unwrap_or(""),
            entity = ctx.entity.unwrap_or(""),
            action = ctx.action.unwrap_or(""),
            message = %message
        ),
    }
}
