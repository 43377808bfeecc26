use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "shopledger=info";

/// Initializes the global tracing subscriber once per process.
///
/// `RUST_LOG` directives are honoured; `fallback` is added as an extra
/// directive so the crate still logs at a sensible level without it.
pub fn init_tracing(fallback: &str) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let mut filter = EnvFilter::from_default_env();
        match fallback.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("ignoring invalid log filter {:?}: {}", fallback, e),
        }

        fmt().with_env_filter(filter).with_target(false).init();
    });
}
