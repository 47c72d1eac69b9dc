//! tacrelay daemon internals
//!
//! The binary wires these together: a `ClientRegistry` and `BroadcastRouter`
//! from `tacrelay-broadcaster`, then a `RelayServer` that accepts TCP or TLS
//! connections and runs a dual-duty `session` per client, framing inbound
//! bytes with `tacrelay-cot`.

pub mod acceptor;
pub mod config;
pub mod session;
pub mod tls;
pub mod udp;

pub use acceptor::RelayServer;
pub use config::{RelayConfig, TlsSettings, TlsVersion, Transport};
pub use session::{ConnectionState, SessionConfig};
