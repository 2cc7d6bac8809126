//! Configuration for the proxy: CLI arguments resolved into a `Config`.
//!
//! There is no config-file layer here: the CLI surface names no
//! `-c/--config` flag, so `Config` is built directly from the parsed
//! args plus their defaults.

use std::net::Ipv4Addr;

use clap::Parser;

/// Command-line arguments for the proxy.
#[derive(Parser, Debug)]
#[command(name = "massproxy")]
#[command(author = "massproxy authors")]
#[command(version)]
#[command(about = "A TCP forwarding proxy for massive connection counts", long_about = None)]
pub struct CliArgs {
    /// TCP port to listen on (bind host is fixed to 0.0.0.0)
    #[arg(short = 'p', long, default_value_t = 1234)]
    pub port: u16,

    /// Number of forwarder worker threads
    #[arg(long = "thread", default_value_t = 4)]
    pub threads: usize,

    /// Reactor poll timeout in seconds; -1 means indefinite
    #[arg(long, default_value_t = -1)]
    pub timeout: i64,

    /// Maximum events returned per poll
    #[arg(long, default_value_t = 20)]
    pub maxevents: usize,

    /// Logging verbosity: 0=error, 1=warn, 2=info, 3=debug
    #[arg(short = 'v', long, default_value_t = 2)]
    pub verbose: u8,
}

/// The bind host is fixed per §6; not configurable from the CLI.
pub const BIND_HOST: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Coarse timeout the acceptor polls the listening socket at, so it can
/// observe the shutdown flag between `accept()` attempts (§5).
pub const ACCEPT_POLL_SECS: u64 = 3;

/// Backlog passed to `listen()` (§4.A).
pub const LISTEN_BACKLOG: i32 = 128;

/// Resolved configuration the rest of the crate consumes.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub threads: usize,
    pub timeout_secs: i64,
    pub max_events: usize,
    pub verbose: u8,
}

impl Config {
    /// Parse CLI args and resolve them into a `Config`, clamping obviously
    /// invalid values rather than failing startup over them.
    pub fn load() -> Self {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Self {
        let threads = if args.threads == 0 {
            tracing::warn!("--thread 0 requested, clamping to 1");
            1
        } else {
            args.threads
        };
        let max_events = args.maxevents.max(1);

        Config {
            port: args.port,
            threads,
            timeout_secs: args.timeout,
            max_events,
            verbose: args.verbose,
        }
    }
}
