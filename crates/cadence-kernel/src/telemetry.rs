use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{KernelError, KernelResult};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Output goes to stderr, as JSON
/// when `json` is set.
pub fn init_tracing(level: &str, json: bool) -> KernelResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| KernelError::Telemetry(e.to_string()))
}
