//! A CC-Link IE Field Basic (CCIEFB) protocol stack: master and slave roles
//! sharing one wire codec and timing model, plus the SLMP node-search/set-IP
//! service layered on the same UDP transport.
//!
//! The core is platform-agnostic: everything that touches a socket, a
//! clock, an interface list, or a file lives behind the [`platform::Platform`]
//! trait, so the engine in [`master`]/[`slave`] can be driven deterministically
//! in tests without a real network.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod image;
pub mod master;
pub mod platform;
pub mod slave;
pub mod storage;
pub mod timer;

pub use config::{BroadcastKind, DeviceConfig, GroupConfig, MasterConfig, SlaveConfig};
pub use error::{ErrorEvent, ErrorKind};
pub use master::Master;
pub use platform::{MasterCallbacks, Platform, SlaveCallbacks};
pub use slave::Slave;
