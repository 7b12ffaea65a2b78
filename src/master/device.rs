//! Per-device cyclic state machine on the master (spec §4.3).

use std::net::Ipv4Addr;

/// Device states, spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    MasterDown,
    Listen,
    WaitTd,
    CyclicSuspend,
    CyclicSent,
    CyclicSending,
}

/// Response fingerprint used for change detection (spec §3 "latest response
/// fingerprint").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseFingerprint {
    pub end_code: u16,
    pub slave_err_code: u16,
    pub local_management_info: u32,
    pub vendor_code: u16,
    pub model_code: u32,
    pub equipment_ver: u16,
    pub slave_local_unit_info: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub ok_count: u32,
    pub error_count: u32,
}

/// Runtime state for one configured device within a group.
#[derive(Debug, Clone)]
pub struct DeviceRuntime {
    pub slave_id: Ipv4Addr,
    pub station_no: u16,
    pub num_occupied_stations: u8,
    pub state: DeviceState,
    pub enabled: bool,
    pub transmission_bit: bool,
    pub force_transmission_bit: bool,
    pub parallel_off_timeout_counter: u16,
    pub fingerprint: Option<ResponseFingerprint>,
    pub stats: FrameStats,
    /// `true` once this scan's response has been accepted, so a second
    /// response to the same `frame_sequence_no` can be flagged as a
    /// duplication rather than silently overwriting the image.
    pub responded_this_scan: bool,
}

impl DeviceRuntime {
    pub fn new(slave_id: Ipv4Addr, station_no: u16, num_occupied_stations: u8) -> Self {
        DeviceRuntime {
            slave_id,
            station_no,
            num_occupied_stations,
            state: DeviceState::MasterDown,
            enabled: true,
            transmission_bit: true,
            force_transmission_bit: false,
            parallel_off_timeout_counter: 0,
            fingerprint: None,
            stats: FrameStats {
                ok_count: 0,
                error_count: 0,
            },
            responded_this_scan: false,
        }
    }

    pub fn group_startup(&mut self) {
        self.state = DeviceState::Listen;
    }

    /// A new link-scan request was sent for this device's station.
    ///
    /// A device parked in `WaitTd` stays there across scans: the master
    /// keeps requesting it, but it must remain observably disconnected
    /// until it actually responds, or `receive_ok`'s reconnect check never
    /// sees `WaitTd` and the `connect` callback on recovery never fires.
    pub fn scan_start(&mut self) {
        self.responded_this_scan = false;
        if self.enabled && self.state != DeviceState::WaitTd {
            self.state = DeviceState::CyclicSent;
        }
    }

    /// Fires `true` if this is a reconnect (device was in `WaitTd`).
    pub fn receive_ok(&mut self, fingerprint: ResponseFingerprint) -> bool {
        self.responded_this_scan = true;
        self.stats.ok_count += 1;
        self.parallel_off_timeout_counter = 0;
        let reconnected = self.state == DeviceState::WaitTd;
        self.state = DeviceState::CyclicSuspend;
        self.fingerprint = Some(fingerprint);
        reconnected
    }

    /// Returns `true` if the device newly transitioned to `WaitTd`
    /// (timeout-counter full) on this scan timeout, i.e. disconnect fires.
    pub fn group_timeout(&mut self, parallel_off_timeout_count: u16) -> bool {
        if self.state != DeviceState::CyclicSent && self.state != DeviceState::CyclicSuspend {
            return false;
        }
        self.stats.error_count += 1;
        self.parallel_off_timeout_counter += 1;
        if self.parallel_off_timeout_counter >= parallel_off_timeout_count {
            self.state = DeviceState::WaitTd;
            true
        } else {
            false
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.state = DeviceState::MasterDown;
    }

    pub fn re_enable(&mut self) {
        self.enabled = true;
        self.state = DeviceState::Listen;
        self.parallel_off_timeout_counter = 0;
    }

    /// Whether this device's first station bit should be set in
    /// `cyclic_transmission_state` (spec §4.2).
    pub fn wants_transmission(&self) -> bool {
        self.enabled && (self.transmission_bit || self.force_transmission_bit)
    }
}
