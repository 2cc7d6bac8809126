//! A TCP forwarding proxy: clients send a 6-byte destination header, the
//! proxy dials that destination, and shuttles bytes between the two
//! sockets in both directions until either side closes.

pub mod acceptor;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod proxy;
pub mod reactor;
pub mod socket;
pub mod table;
pub mod workers;

pub use config::{CliArgs, Config};
pub use error::ProxyError;
pub use proxy::Proxy;
