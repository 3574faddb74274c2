//! ---
//! mhe_section: "03-logging"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Context-enriched logging macros."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---

/// Shared expansion for the level-specific macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __mhe_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            target_host = ctx.target.unwrap_or(""),
            entity = ctx.entity.unwrap_or(""),
            action = ctx.action.unwrap_or(""),
            state = ctx.state.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with lifecycle context.
#[macro_export]
macro_rules! mhe_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__mhe_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__mhe_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with lifecycle context.
#[macro_export]
macro_rules! mhe_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__mhe_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__mhe_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with lifecycle context.
#[macro_export]
macro_rules! mhe_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__mhe_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__mhe_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with lifecycle context.
#[macro_export]
macro_rules! mhe_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__mhe_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__mhe_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
