//! Log output for hotdeployd.
//!
//! Lines go to stdout next to the supervisors' own output, which they
//! inherit, so the default text format drops targets to keep deploy events
//! readable among build logs. `HOTDEPLOY_LOG_FORMAT=json` switches to one JSON
//! object per line for log shippers; `RUST_LOG` overrides the level.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable selecting the log format (`json` or `text`).
pub const LOG_FORMAT_ENV: &str = "HOTDEPLOY_LOG_FORMAT";

/// Install the global subscriber. Later calls are no-ops, so tests may call
/// it freely.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let text_layer = (!json).then(|| fmt::layer().with_target(false));
    let json_layer = json.then(|| fmt::layer().with_target(false).json());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .try_init();
}

/// Whether [`LOG_FORMAT_ENV`] asks for JSON output.
pub fn json_requested() -> bool {
    std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
