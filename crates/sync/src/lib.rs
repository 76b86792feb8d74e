#![forbid(unsafe_code)]

//! Client side of arbor sync: configuration, the wire boundary and the client
//! that pushes and pulls a replica.

pub mod client;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod transport;

pub use client::{PushReport, SyncClient};
pub use config::{ConfigError, SyncConfig};
pub use error::SyncError;
pub use transport::{AuthorityService, LocalTransport, Request, Response, Transport};
