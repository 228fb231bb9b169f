//! Tracing initialization: an `EnvFilter` driven by `RUST_LOG` (defaulting to
//! `info`) and a `fmt` layer, swapped to JSON when `SITEKEEPER_LOG_FORMAT=json`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber. Safe to call once per process;
/// subsequent calls are no-ops (mirrors `tracing_subscriber`'s own guard).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_format = std::env::var("SITEKEEPER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if json_format {
        let _ = registry.with(fmt::layer().json()).try_init();
    } else {
        let _ = registry.with(fmt::layer()).try_init();
    }
}
