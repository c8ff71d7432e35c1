//! netgw-core: shared building blocks for the device gateway.
//!
//! Holds everything the server crate needs that does no network I/O:
//! the configuration document, the read-only device registry, the
//! telemetry target parser, and the common error type.

pub mod config;
pub mod error;
pub mod registry;
pub mod target;

pub use config::{ConfigFile, DeviceConfig, Settings};
pub use error::{GatewayError, GatewayResult};
pub use registry::{DeviceEntry, DeviceRegistry};
pub use target::GnmiTarget;
