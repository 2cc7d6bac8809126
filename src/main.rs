//! Process bootstrap: parse args, set up logging, install the SIGINT/
//! SIGTERM handler, and run the proxy to completion.

use std::sync::atomic::Ordering;

use tracing::{error, Level};
use tracing_subscriber::EnvFilter;

use massproxy::{Config, Proxy};

fn main() {
    let config = Config::load();
    init_logging(config.verbose);

    let proxy = Proxy::new(config);
    let shutdown = proxy.shutdown_flag();

    let result = proxy.run(move |waker| {
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            let _ = waker.wake();
        })
        .expect("failed to install signal handler");
    });

    match result {
        Ok(()) => {}
        Err(e) => {
            error!(error = %e, "fatal error");
            std::process::exit(1);
        }
    }
}

/// Map `--verbose` (0-3, clamped) to a `tracing` level, with `RUST_LOG`
/// taking precedence when set.
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
