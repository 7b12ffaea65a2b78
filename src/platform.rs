//! The sole seam between the protocol core and the outside world: sockets,
//! interface enumeration, clocks, and persistent storage (spec §6).
//!
//! Production embedders implement this trait against a real UDP stack; tests
//! implement it against an in-memory fake so the FSMs can be driven
//! deterministically without a network (mirrors the teacher's approach of
//! isolating the FFI/hardware boundary behind a narrow trait).

use std::net::Ipv4Addr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("platform I/O error: {0}")]
    Io(String),
    #[error("no such network interface: {0}")]
    NoSuchInterface(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Opaque handle to an open UDP socket, returned by [`Platform::udp_open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdpHandle(pub u32);

/// A datagram received together with the interface it arrived on, needed to
/// answer SLMP node-search requests that arrive on a broadcast address.
#[derive(Debug, Clone)]
pub struct RecvFromIf {
    pub data: Vec<u8>,
    pub from_ip: Ipv4Addr,
    pub from_port: u16,
    pub ifindex: u32,
}

/// Outcome of a conditional save (spec §6 "save if modified").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The in-memory record equalled what was already on disk; nothing written.
    Unchanged,
    /// The record differed (or no file existed yet) and was written.
    Written,
}

/// Platform services the protocol core needs and nothing more: UDP I/O,
/// interface introspection, clocks, and a tiny key-value file store.
pub trait Platform {
    fn udp_open(&mut self, bind_ip: Ipv4Addr, port: u16) -> Result<UdpHandle>;
    fn udp_close(&mut self, handle: UdpHandle) -> Result<()>;
    fn udp_sendto(&mut self, handle: UdpHandle, data: &[u8], to_ip: Ipv4Addr, to_port: u16) -> Result<()>;
    /// Non-blocking receive; `Ok(None)` if nothing is pending.
    fn udp_recvfrom(&mut self, handle: UdpHandle) -> Result<Option<RecvFromIf>>;

    fn get_ifindex(&self, ip: Ipv4Addr) -> Result<u32>;
    fn get_ifname(&self, ifindex: u32) -> Result<String>;
    fn get_mac(&self, ifindex: u32) -> Result<[u8; 6]>;
    fn get_netmask(&self, ifindex: u32) -> Result<Ipv4Addr>;
    fn set_ip_netmask(&mut self, ifindex: u32, ip: Ipv4Addr, netmask: Ipv4Addr) -> Result<()>;

    /// Monotonic microsecond counter; wraps at `u32::MAX` (spec §4.2 timer model).
    fn now_monotonic_us(&self) -> u32;
    /// Wall-clock milliseconds since the Unix epoch, used only for
    /// diagnostics/logging timestamps, never for protocol timing.
    fn now_unix_ms(&self) -> u64;

    fn save_file(&mut self, path: &str, data: &[u8]) -> Result<()>;
    fn load_file(&self, path: &str) -> Result<Option<Vec<u8>>>;
    fn clear_file(&mut self, path: &str) -> Result<()>;
}

/// Observer callbacks the master side delivers protocol events through
/// (spec §6 `MasterCallbacks`).
pub trait MasterCallbacks {
    /// The group's coarse run state changed: `true` once arbitration
    /// completes and the first link scan starts, `false` on an
    /// arbitration failure that drops the group back to `LISTEN`.
    fn state_ind(&mut self, group_no: u16, running: bool);
    fn connect_ind(&mut self, group_no: u16, station_no: u16);
    fn disconnect_ind(&mut self, group_no: u16, station_no: u16);
    fn link_scan_complete_ind(&mut self, group_no: u16);
    fn alarm_ind(&mut self, group_no: u16, station_no: u16, end_code: u16, slave_err_code: u16);
    fn error_ind(&mut self, event: crate::error::ErrorEvent);
    fn changed_slave_info_ind(&mut self, group_no: u16, station_no: u16);
    fn node_search_cfm(&mut self, db: crate::master::slmp::NodeSearchDb);
    fn set_ip_cfm(&mut self, target_mac: [u8; 6], status: crate::error::SlmpStatus);
}

/// Observer callbacks the slave side delivers protocol events through
/// (spec §6 `SlaveCallbacks`).
pub trait SlaveCallbacks {
    fn master_connect_ind(&mut self, master_id: Ipv4Addr);
    fn master_disconnect_ind(&mut self, master_id: Ipv4Addr);
    /// The bound master's application status changed, decoded from
    /// `master_local_unit_info` (spec §4.1/§6). `protocol_ver` and
    /// `master_application_status` are the raw wire values the decoding
    /// was derived from.
    fn master_running_ind(
        &mut self,
        connected: bool,
        running: bool,
        stopped_by_user: bool,
        protocol_ver: u16,
        master_application_status: u16,
    );
    fn error_ind(&mut self, event: crate::error::ErrorEvent);
}
