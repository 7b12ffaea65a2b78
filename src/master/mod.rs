//! Master role: per-group link-scan engine, per-device cyclic engine, and
//! the SLMP node-search/set-IP orchestration layered on the same socket.

pub mod api;
pub mod device;
pub mod group;
pub mod slmp;

pub use api::Master;
