//! `ble-mqtt` library.
//!
//! The binary (`src/main.rs`) is responsible for process exit codes. The
//! discovery loop lives in [`crate::discovery`] and the per-advertisement
//! publish sequence in [`crate::pipeline`]; both run against injected
//! transport and publisher traits so they can be tested without hardware or
//! a broker.

pub mod alias;
pub mod app;
pub mod config;
pub mod decoder;
pub mod discovery;
pub mod mac_address;
pub mod manufacturer;
pub mod pipeline;
pub mod publisher;
pub mod reading;
pub mod registry;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use alias::{Alias, AliasMap, KnownDevices, parse_alias};
pub use config::{Config, ConfigError};
pub use discovery::{Discovery, DiscoveryOptions, Outcome};
pub use mac_address::MacAddress;
pub use pipeline::publish_discovery;
pub use publisher::{Message, PublishError, Publisher};
pub use reading::{FieldValue, Reading};
pub use scanner::{Backend, DiscoveryEvent, ScanError, ServiceData, Transport, TransportEvent};
