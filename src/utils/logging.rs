//! # Logging
//!
//! The library logs through the `log` facade. Binaries call
//! [`init_logging`] once to route those records, and any `tracing` events,
//! to stderr.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{registry, Layer};

/// Installs a stderr subscriber at `info` level (`debug` when `verbose`),
/// bridging `log` records, and hooks panics into the log.
///
/// Does nothing if a global subscriber is already installed, so calling it
/// twice (or from tests) is harmless.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(level);

    if registry().with(layer).try_init().is_ok() {
        update_panic_hook();
    }
}

fn update_panic_hook() {
    let hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {}", info);
        hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_is_harmless() {
        init_logging(false);
        init_logging(true);
        log::info!("logging initialised twice");
    }
}
