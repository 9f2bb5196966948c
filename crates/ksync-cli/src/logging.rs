use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs the global subscriber. `RUST_LOG` wins over `verbose`; logs go to
/// stderr so stdout stays machine readable.
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose > 0),
        )
        .init();
}

fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn,ksync=info,ksync_core=info,ksync_providers=info",
        1 => "warn,ksync=debug,ksync_core=debug,ksync_providers=debug",
        _ => "trace",
    }
}
