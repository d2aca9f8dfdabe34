//! ---
//! sarge_section: "03-logging"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Structured lifecycle logging helpers."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
//! Context-enriched logging macros.

/// Emit an informational log enriched with instance context.
#[macro_export]
macro_rules! sarge_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            instance = ctx.instance.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            signal = ctx.signal.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::sarge_info!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a debug log enriched with instance context.
#[macro_export]
macro_rules! sarge_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            instance = ctx.instance.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            signal = ctx.signal.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::sarge_debug!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an error log enriched with instance context.
#[macro_export]
macro_rules! sarge_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            instance = ctx.instance.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            signal = ctx.signal.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::sarge_error!(context = $crate::LogContext::default(), $($arg)+)
    }};
}
