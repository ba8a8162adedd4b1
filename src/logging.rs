//! Logging and tracing initialization.
//!
//! Structured logging through the `tracing` ecosystem, rendered either as
//! compact console output or as JSON for log aggregation. Also home to the
//! time-based throttle used to rate-limit progress events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default level derived from `verbose`.
/// Calling this twice is harmless; the second install is ignored.
pub fn init(config: LogConfig) {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "cfex_ingest={}",
            default_level.as_str().to_lowercase()
        ))
    });

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}

/// Sentinel value indicating the throttle has never fired
const NEVER_FIRED: u64 = u64::MAX;

/// Time-based rate limiter.
///
/// The first call to [`Throttle::ready`] always passes; later calls pass
/// only once `interval` has elapsed since the last one that did.
pub struct Throttle {
    interval_ms: u64,
    last_fired_ms: AtomicU64,
    start: Instant,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_fired_ms: AtomicU64::new(NEVER_FIRED),
            start: Instant::now(),
        }
    }

    pub fn ready(&self) -> bool {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_fired_ms.load(Ordering::Relaxed);

        let due = last == NEVER_FIRED || now_ms.saturating_sub(last) >= self.interval_ms;
        if !due {
            return false;
        }

        // Losing the race means another caller fired for this window.
        self.last_fired_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}
