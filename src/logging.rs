use std::io::IsTerminal;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` narrows the filter; the
/// default keeps payment and relay lifecycle events visible. This daemon
/// usually runs headless, so `NWCD_LOG_JSON=1` switches to JSON lines for
/// a log shipper, and ANSI color is only emitted when stderr is a
/// terminal an operator is actually watching.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if matches!(std::env::var("NWCD_LOG_JSON").as_deref(), Ok("1")) {
        let _ = builder.json().flatten_event(true).try_init();
    } else {
        let _ = builder
            .compact()
            .with_ansi(std::io::stderr().is_terminal())
            .try_init();
    }
}
