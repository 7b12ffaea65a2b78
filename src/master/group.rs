//! Per-group link-scan state machine on the master (spec §4.2).

use std::net::Ipv4Addr;

use log::{debug, warn};

use crate::config::{link_scan_timeout_ms, GroupConfig};
use crate::frame::ciefb::{CyclicRequest, CyclicResponse};
use crate::image::GroupImage;
use crate::master::device::{DeviceRuntime, ResponseFingerprint};
use crate::timer::{ms_to_us, Deadline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    MasterDown,
    Listen,
    Arbitration,
    LinkScan,
    LinkScanComp,
}

/// Application-visible events raised while processing one tick or response
/// (spec §4.2/§4.3/§7); the caller (master `api`) turns these into callback
/// invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupEvent {
    /// Arbitration completed and the first link scan started: the group's
    /// coarse run state is now "running" (spec §6 `state_ind`).
    EnteredRunning,
    LinkScanComplete,
    ArbitrationFailed { other_master: Ipv4Addr },
    SlaveDuplication { slave_id: Ipv4Addr },
    WrongNumberOccupied { slave_id: Ipv4Addr, reported: u16 },
    DeviceConnect { station_no: u16 },
    DeviceDisconnect { station_no: u16 },
    ChangedSlaveInfo { station_no: u16 },
    Alarm { station_no: u16, end_code: u16, slave_err_code: u16 },
}

pub struct GroupRuntime {
    pub group_no: u16,
    pub protocol_ver: u8,
    timeout_value_ms: u16,
    parallel_off_timeout_count: u16,
    use_constant_link_scan_time: bool,
    pub devices: Vec<DeviceRuntime>,
    pub image: GroupImage,
    pub state: GroupState,
    pub frame_sequence_no: u16,
    previous_frame_sequence_no: Option<u16>,
    previous_scan_complete: bool,
    cyclic_transmission_state: u16,
    timestamp_link_scan_start: u32,
    arbitration_deadline: Deadline,
    link_scan_timeout: Deadline,
    link_scan_timeout_us: u32,
    pub total_occupied: usize,
    pub parameter_no: u16,
}

impl GroupRuntime {
    pub fn new(group_no: u16, protocol_ver: u8, cfg: &GroupConfig, parameter_no: u16) -> Self {
        let mut devices = Vec::with_capacity(cfg.slave_devices.len());
        let mut station_no = 1u16;
        for dev in &cfg.slave_devices {
            devices.push(DeviceRuntime::new(dev.slave_id, station_no, dev.num_occupied_stations));
            station_no += dev.num_occupied_stations as u16;
        }
        let link_scan_timeout_ms_value = link_scan_timeout_ms(cfg.timeout_value_ms, cfg.parallel_off_timeout_count);
        GroupRuntime {
            group_no,
            protocol_ver,
            timeout_value_ms: cfg.timeout_value_ms,
            parallel_off_timeout_count: cfg.parallel_off_timeout_count,
            use_constant_link_scan_time: cfg.use_constant_link_scan_time,
            devices,
            image: GroupImage::new(),
            state: GroupState::MasterDown,
            frame_sequence_no: 0,
            previous_frame_sequence_no: None,
            previous_scan_complete: true,
            cyclic_transmission_state: 0,
            timestamp_link_scan_start: 0,
            arbitration_deadline: Deadline::arm(0, 0),
            link_scan_timeout: Deadline::arm(0, 0),
            link_scan_timeout_us: ms_to_us(link_scan_timeout_ms_value),
            total_occupied: cfg.total_occupied(),
            parameter_no,
        }
    }

    pub fn startup(&mut self, now: u32, arbitration_time_ms: u32) {
        for d in &mut self.devices {
            d.group_startup();
        }
        self.state = GroupState::Listen;
        self.arbitration_deadline = Deadline::arm(now, ms_to_us(arbitration_time_ms));
    }

    /// A cyclic request for this `group_no` arrived from a master other than
    /// ours while we're still listening/arbitrating.
    pub fn request_from_other(&mut self, other_master: Ipv4Addr) -> Option<GroupEvent> {
        if matches!(self.state, GroupState::Listen | GroupState::Arbitration) {
            warn!("group {}: request from other master {}", self.group_no, other_master);
            self.state = GroupState::Listen;
            Some(GroupEvent::ArbitrationFailed { other_master })
        } else {
            None
        }
    }

    fn recompute_transmission_state(&mut self) {
        let mut bitmap = 0u16;
        for d in &self.devices {
            if d.wants_transmission() {
                bitmap = crate::frame::set_transmission_bit(bitmap, d.station_no as u8, true);
            }
        }
        self.cyclic_transmission_state = bitmap;
    }

    fn build_request(&self, master_id: Ipv4Addr, master_local_unit_info: u16, clock_info: u64) -> CyclicRequest {
        let mut slave_ids = vec![0u32; self.total_occupied];
        let mut rww = vec![0u16; self.total_occupied * 32];
        let mut ry = vec![0u8; self.total_occupied * 8];
        for d in &self.devices {
            let base = (d.station_no - 1) as usize;
            slave_ids[base] = u32::from(d.slave_id);
            for k in 1..d.num_occupied_stations as usize {
                slave_ids[base + k] = crate::endpoint::MULTI_STATION_CONTINUATION;
            }
            for area in 0..d.num_occupied_stations as usize {
                let words = self.image.rww_area_words(base + area);
                rww[(base + area) * 32..(base + area) * 32 + 32].copy_from_slice(&words);
                let bytes = self.image.ry_area_bytes(base + area);
                ry[(base + area) * 8..(base + area) * 8 + 8].copy_from_slice(&bytes);
            }
        }
        CyclicRequest {
            protocol_ver: self.protocol_ver as u16,
            master_local_unit_info,
            clock_info,
            master_id,
            group_no: self.group_no,
            frame_sequence_no: self.frame_sequence_no,
            timeout_value: self.timeout_value_ms,
            parallel_off_timeout_count: self.parallel_off_timeout_count,
            parameter_no: self.parameter_no,
            slave_total_occupied_station_count: self.total_occupied as u16,
            cyclic_transmission_state: self.cyclic_transmission_state,
            slave_ids,
            rww,
            ry,
        }
    }

    /// Start (or restart, on `PARAMETER_CHANGE`) a fresh link scan.
    fn start_new_scan(&mut self, now: u32, master_id: Ipv4Addr, master_local_unit_info: u16, clock_info: u64) -> CyclicRequest {
        for d in &mut self.devices {
            d.scan_start();
        }
        self.recompute_transmission_state();
        self.timestamp_link_scan_start = now;
        self.link_scan_timeout = Deadline::arm(now, self.link_scan_timeout_us);
        self.previous_scan_complete = false;
        self.state = GroupState::LinkScan;
        self.build_request(master_id, master_local_unit_info, clock_info)
    }

    /// Abort the scan in progress and start a new one (`PARAMETER_CHANGE`).
    pub fn restart_scan(&mut self, now: u32, master_id: Ipv4Addr, master_local_unit_info: u16, clock_info: u64) -> CyclicRequest {
        self.frame_sequence_no = 0;
        self.start_new_scan(now, master_id, master_local_unit_info, clock_info)
    }

    /// Drive the group's timers forward; returns a request to emit, if any,
    /// plus any events raised.
    pub fn tick(
        &mut self,
        now: u32,
        master_id: Ipv4Addr,
        master_local_unit_info: u16,
        clock_info: u64,
    ) -> (Option<CyclicRequest>, Vec<GroupEvent>) {
        let mut events = Vec::new();
        match self.state {
            GroupState::MasterDown => (None, events),
            GroupState::Listen => {
                if self.arbitration_deadline.expired(now) {
                    self.state = GroupState::Arbitration;
                    debug!("group {}: arbitration done, starting first link scan", self.group_no);
                    self.frame_sequence_no = 0;
                    let req = self.start_new_scan(now, master_id, master_local_unit_info, clock_info);
                    events.push(GroupEvent::EnteredRunning);
                    (Some(req), events)
                } else {
                    (None, events)
                }
            }
            GroupState::Arbitration => (None, events),
            GroupState::LinkScan => {
                if self.link_scan_timeout.expired(now) {
                    for d in &mut self.devices {
                        if !d.responded_this_scan && d.enabled {
                            if d.group_timeout(self.parallel_off_timeout_count) {
                                events.push(GroupEvent::DeviceDisconnect { station_no: d.station_no });
                            }
                        }
                    }
                    self.frame_sequence_no = self.frame_sequence_no.wrapping_add(1);
                    let req = self.start_new_scan(now, master_id, master_local_unit_info, clock_info);
                    (Some(req), events)
                } else {
                    (None, events)
                }
            }
            GroupState::LinkScanComp => {
                let due = if self.use_constant_link_scan_time {
                    let elapsed_ok = Deadline::arm(self.timestamp_link_scan_start, ms_to_us(self.timeout_value_ms as u32));
                    elapsed_ok.expired(now)
                } else {
                    true
                };
                if due {
                    self.frame_sequence_no = self.frame_sequence_no.wrapping_add(1);
                    let req = self.start_new_scan(now, master_id, master_local_unit_info, clock_info);
                    (Some(req), events)
                } else {
                    (None, events)
                }
            }
        }
    }

    fn all_enabled_responded(&self) -> bool {
        self.devices.iter().filter(|d| d.enabled).all(|d| d.responded_this_scan)
    }

    /// Ingest one cyclic response (spec §4.2/§4.3).
    pub fn handle_response(&mut self, resp: &CyclicResponse, now: u32) -> Vec<GroupEvent> {
        let _ = now;
        let mut events = Vec::new();

        if resp.frame_sequence_no != self.frame_sequence_no {
            debug!(
                "group {}: dropping response with stale/future seq {} (current {})",
                self.group_no, resp.frame_sequence_no, self.frame_sequence_no
            );
            return events;
        }

        let occupied_count = resp.occupied_count();
        let Some(idx) = self.devices.iter().position(|d| d.slave_id == resp.slave_id) else {
            debug!("group {}: response from unconfigured slave {}", self.group_no, resp.slave_id);
            return events;
        };

        if self.devices[idx].responded_this_scan {
            events.push(GroupEvent::SlaveDuplication { slave_id: resp.slave_id });
            let station_no = self.devices[idx].station_no;
            let base = (station_no - 1) as usize;
            for area in 0..self.devices[idx].num_occupied_stations as usize {
                self.image.set_rx_area_bytes(base + area, &[0; 8]);
                self.image.set_rwr_area_words(base + area, &[0; 32]);
            }
            return events;
        }

        if occupied_count != self.devices[idx].num_occupied_stations as u16 {
            self.devices[idx].stats.error_count += 1;
            events.push(GroupEvent::WrongNumberOccupied {
                slave_id: resp.slave_id,
                reported: occupied_count,
            });
            return events;
        }

        let fingerprint = ResponseFingerprint {
            end_code: resp.end_code,
            slave_err_code: resp.slave_err_code,
            local_management_info: resp.local_management_info,
            vendor_code: resp.vendor_code,
            model_code: resp.model_code,
            equipment_ver: resp.equipment_ver,
            slave_local_unit_info: resp.slave_local_unit_info,
        };

        if resp.end_code != 0 {
            self.devices[idx].responded_this_scan = true;
            self.devices[idx].stats.error_count += 1;
            events.push(GroupEvent::Alarm {
                station_no: self.devices[idx].station_no,
                end_code: resp.end_code,
                slave_err_code: resp.slave_err_code,
            });
            if self.all_enabled_responded() {
                self.state = GroupState::LinkScanComp;
                self.previous_frame_sequence_no = Some(self.frame_sequence_no);
                self.previous_scan_complete = true;
                events.push(GroupEvent::LinkScanComplete);
            }
            return events;
        }

        let changed = self.devices[idx].fingerprint != Some(fingerprint);
        let station_no = self.devices[idx].station_no;
        let reconnected = self.devices[idx].receive_ok(fingerprint);
        if reconnected {
            events.push(GroupEvent::DeviceConnect { station_no });
        }
        if changed {
            events.push(GroupEvent::ChangedSlaveInfo { station_no });
        }

        let base = (station_no - 1) as usize;
        for area in 0..occupied_count as usize {
            let word_base = area * 32;
            self.image
                .set_rwr_area_words(base + area, &resp.rwr[word_base..word_base + 32]);
            let byte_base = area * 8;
            self.image
                .set_rx_area_bytes(base + area, &resp.rx[byte_base..byte_base + 8]);
        }

        if self.all_enabled_responded() {
            self.state = GroupState::LinkScanComp;
            self.previous_frame_sequence_no = Some(self.frame_sequence_no);
            self.previous_scan_complete = true;
            events.push(GroupEvent::LinkScanComplete);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn cfg() -> GroupConfig {
        GroupConfig {
            timeout_value_ms: 500,
            parallel_off_timeout_count: 3,
            use_constant_link_scan_time: false,
            slave_devices: vec![DeviceConfig {
                slave_id: Ipv4Addr::new(1, 2, 3, 6),
                num_occupied_stations: 3,
            }],
        }
    }

    #[test]
    fn arbitration_then_first_scan_produces_request() {
        let mut g = GroupRuntime::new(1, 2, &cfg(), 501);
        g.startup(0, 2_500_000);
        let (req, _events) = g.tick(2_600_000, Ipv4Addr::new(1, 2, 3, 4), 1, 0);
        let req = req.expect("expected first link-scan request");
        assert_eq!(req.frame_sequence_no, 0);
        assert_eq!(req.parameter_no, 501);
        assert_eq!(
            req.slave_ids,
            vec![u32::from(Ipv4Addr::new(1, 2, 3, 6)), 0xFFFF_FFFF, 0xFFFF_FFFF]
        );
        assert_eq!(g.state, GroupState::LinkScan);
    }

    #[test]
    fn listen_phase_other_master_raises_arbitration_failed() {
        let mut g = GroupRuntime::new(1, 2, &cfg(), 1);
        g.startup(0, 2_500_000);
        let ev = g.request_from_other(Ipv4Addr::new(9, 9, 9, 9));
        assert_eq!(
            ev,
            Some(GroupEvent::ArbitrationFailed {
                other_master: Ipv4Addr::new(9, 9, 9, 9)
            })
        );
        assert_eq!(g.state, GroupState::Listen);
    }
}
