//! Application-facing error taxonomy (spec §7).
//!
//! These are not `std::error::Error` — they are payloads delivered to
//! `error_ind`/`alarm_ind` callbacks, the core's only channel for signalling
//! transient protocol faults to the embedder. Fatal, crate-internal failures
//! (codec rejects, config validation, storage) each have their own
//! `thiserror` enum local to the module that raises them.

use std::net::Ipv4Addr;

use num_derive::FromPrimitive;

/// Kind tag passed to `error_ind(kind, ip, arg2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Another master answered for our group during listen/arbitration.
    ArbitrationFailed,
    /// Two responses for the same `(group, seq, slave_id)` arrived.
    SlaveDuplication,
    /// A slave response's occupation count disagreed with configuration.
    SlaveReportsWrongNumberOccupied,
    /// A slave saw a request from a master other than its bound one.
    SlaveReportsMasterDuplication,
}

/// An `error_ind` event queued for delivery during the next `handle_periodic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub ip: Ipv4Addr,
    /// Secondary argument: the other master's IP for `ArbitrationFailed`,
    /// the reported occupation count for `SlaveReportsWrongNumberOccupied`,
    /// unused (0) otherwise.
    pub arg2: u32,
}

/// 16-bit result field in a CCIEFB response; `NoError` (0) is success.
///
/// Only the values this stack itself emits are named; any other wire value
/// round-trips through `Other` so a codec reject never loses information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum EndCode {
    NoError = 0x0000,
    MasterDuplication = 0x00E1,
    WrongNumberOccupied = 0x00E2,
    SlaveRequestsDisconnect = 0x00E3,
}

impl EndCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        num_traits::FromPrimitive::from_u16(code)
    }

    pub fn code(self) -> u16 {
        self as u16
    }
}

/// SLMP transaction completion status delivered to `set_ip_cfm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlmpStatus {
    Success,
    Error,
    Timeout,
}
