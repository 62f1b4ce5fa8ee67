//! Tracing setup shared by every binary in the crate.
use std::{env, io::IsTerminal};

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

// ---

/// Install the process-wide subscriber used by the consumer, the readings API
/// and the simulator.
///
/// Output is compact, one line per event, tagged with target and source
/// location so consumer logs can be traced back to the pipeline stage that
/// emitted them. `RUST_LOG` wins when set. Otherwise `LOG_LEVEL` sets the
/// default level (`info`), with `sqlx` query logs and `rumqttc` held at `warn`.
///
/// `FORCE_COLOR` (`1`/`true`/`yes` or `0`/`false`/`no`) overrides TTY
/// detection, which matters under `docker compose logs`. `LOG_SPAN_EVENTS`
/// set to `full` or `enter_exit` adds span lifecycle events.
///
/// Must run before the first log line; a second call panics.
pub fn init_tracing() {
    // ---
    let span_events = match env::var("LOG_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LOG_LEVEL")
            .ok()
            .map(|v| v.to_ascii_lowercase())
            .as_deref()
        {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("warn") | Some("warning") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,rumqttc=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
