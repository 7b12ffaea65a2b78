//! Slave connection state machine (spec §4.4).

use std::net::Ipv4Addr;

use log::{debug, warn};

use crate::config::SlaveConfig;
use crate::error::EndCode;
use crate::frame::ciefb::{CyclicRequest, CyclicResponse};
use crate::frame::{analyze_slave_id_list, Error as FrameError};
use crate::image::GroupImage;
use crate::timer::{ms_to_us, Deadline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    SlaveDown,
    MasterNone,
    MasterControl,
    SlaveDisabled,
    WaitDisablingSlave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundMaster {
    pub master_ip: Ipv4Addr,
    pub group_no: u16,
    pub my_station_no: u16,
    pub total_occupied_in_group: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveEvent {
    Connect { master_ip: Ipv4Addr },
    Disconnect { master_ip: Ipv4Addr },
    MasterDuplication { other_master_ip: Ipv4Addr },
    WrongNumberOccupied { reported: u16 },
    /// The bound master's application status (decoded from
    /// `master_local_unit_info`) changed, or the bind itself changed
    /// (spec §6 `master_running_ind`).
    MasterRunningChanged {
        connected: bool,
        running: bool,
        stopped_by_user: bool,
        protocol_ver: u16,
        master_application_status: u16,
    },
}

pub struct SlaveConn {
    pub state: SlaveState,
    bound: Option<BoundMaster>,
    last_frame_sequence_no: u16,
    last_clock_info: u64,
    last_parameter_no: u16,
    timeout_deadline: Deadline,
    pub image: GroupImage,
    local_management_info: u32,
    slave_err_code: u16,
    running: bool,
    stopped_by_user: bool,
    /// `(running, stopped_by_user, protocol_ver, master_application_status)`
    /// last reported via `MasterRunningChanged`, so repeated identical
    /// requests don't re-fire the callback every scan.
    last_reported_running: Option<(bool, bool, u16, u16)>,
}

impl SlaveConn {
    pub fn new() -> Self {
        SlaveConn {
            state: SlaveState::SlaveDown,
            bound: None,
            last_frame_sequence_no: 0,
            last_clock_info: 0,
            last_parameter_no: 0,
            timeout_deadline: Deadline::arm(0, 0),
            image: GroupImage::new(),
            local_management_info: 0,
            slave_err_code: 0,
            running: true,
            stopped_by_user: false,
            last_reported_running: None,
        }
    }

    pub fn startup(&mut self) {
        self.state = SlaveState::MasterNone;
    }

    pub fn bound_master(&self) -> Option<BoundMaster> {
        self.bound
    }

    fn build_response(&self, cfg: &SlaveConfig, my_slave_id: Ipv4Addr, group_no: u16, end_code: EndCode) -> CyclicResponse {
        let n = cfg.num_occupied_stations as usize;
        let mut rwr = Vec::with_capacity(32 * n);
        let mut rx = Vec::with_capacity(8 * n);
        for area in 0..n {
            rwr.extend_from_slice(&self.image.rwr_area_words(area));
            rx.extend_from_slice(&self.image.rx_area_bytes(area));
        }
        CyclicResponse {
            protocol_ver: 2,
            end_code: end_code.code(),
            vendor_code: cfg.vendor_code,
            model_code: cfg.model_code,
            equipment_ver: cfg.equipment_ver,
            slave_local_unit_info: if self.running { 1 } else { 0 },
            slave_err_code: self.slave_err_code,
            local_management_info: self.local_management_info,
            slave_id: my_slave_id,
            group_no,
            frame_sequence_no: self.last_frame_sequence_no,
            rwr,
            rx,
        }
    }

    /// Ingest one cyclic request addressed (at least partially) to us.
    /// Returns the response to send, if any, and the application events
    /// this request produced.
    pub fn handle_request(
        &mut self,
        req: &CyclicRequest,
        now: u32,
        my_slave_id: Ipv4Addr,
        cfg: &SlaveConfig,
    ) -> (Option<CyclicResponse>, Vec<SlaveEvent>) {
        if self.state == SlaveState::SlaveDisabled || self.state == SlaveState::WaitDisablingSlave {
            return (None, Vec::new());
        }

        let analysis = match analyze_slave_id_list(&req.slave_ids, u32::from(my_slave_id)) {
            Ok(a) => a,
            Err(FrameError::RepeatedSlaveId(_)) => return (None, Vec::new()),
            Err(_) => return (None, Vec::new()),
        };
        if !analysis.found_self {
            return (None, Vec::new());
        }

        if let Some(bound) = self.bound {
            if bound.master_ip != req.master_id {
                warn!("slave: cyclic request from unbound master {}", req.master_id);
                let resp = self.build_response(cfg, my_slave_id, req.group_no, EndCode::MasterDuplication);
                return (
                    Some(resp),
                    vec![SlaveEvent::MasterDuplication {
                        other_master_ip: req.master_id,
                    }],
                );
            }
        }

        if analysis.implied_occupation_count != cfg.num_occupied_stations as u16 {
            let resp = self.build_response(cfg, my_slave_id, req.group_no, EndCode::WrongNumberOccupied);
            return (
                Some(resp),
                vec![SlaveEvent::WrongNumberOccupied {
                    reported: analysis.implied_occupation_count,
                }],
            );
        }

        let was_unbound = self.bound.is_none();
        self.bound = Some(BoundMaster {
            master_ip: req.master_id,
            group_no: req.group_no,
            my_station_no: analysis.my_station_no,
            total_occupied_in_group: req.slave_total_occupied_station_count,
        });
        self.state = SlaveState::MasterControl;
        self.last_frame_sequence_no = req.frame_sequence_no;
        self.last_clock_info = req.clock_info;
        self.last_parameter_no = req.parameter_no;
        self.timeout_deadline = Deadline::arm(now, ms_to_us(req.timeout_value as u32 * req.parallel_off_timeout_count as u32));

        let base = (analysis.my_station_no - 1) as usize;
        for area in 0..cfg.num_occupied_stations as usize {
            let word_base = area * 32;
            self.image
                .set_rww_area_words(area, &req.rww[(base + area) * 32..(base + area) * 32 + 32]);
            let _ = word_base;
            let byte_base = area * 8;
            self.image
                .set_ry_area_bytes(area, &req.ry[(base + area) * 8..(base + area) * 8 + 8]);
        }

        let resp = self.build_response(cfg, my_slave_id, req.group_no, EndCode::NoError);
        let mut events = Vec::with_capacity(2);
        if was_unbound {
            debug!("slave: bound to master {}", req.master_id);
            events.push(SlaveEvent::Connect { master_ip: req.master_id });
        }

        let running = req.master_local_unit_info & 0x1 != 0;
        let stopped_by_user = req.protocol_ver == 2 && req.master_local_unit_info & 0x2 != 0;
        let reported = (running, stopped_by_user, req.protocol_ver, req.master_local_unit_info);
        if self.last_reported_running != Some(reported) {
            self.last_reported_running = Some(reported);
            events.push(SlaveEvent::MasterRunningChanged {
                connected: true,
                running,
                stopped_by_user,
                protocol_ver: req.protocol_ver,
                master_application_status: req.master_local_unit_info,
            });
        }

        (Some(resp), events)
    }

    /// Drive the timeout timer; returns the disconnect events if the bound
    /// master went quiet.
    pub fn tick(&mut self, now: u32) -> Vec<SlaveEvent> {
        if self.state == SlaveState::MasterControl && self.timeout_deadline.expired(now) {
            let master_ip = self.bound.map(|b| b.master_ip).unwrap_or(Ipv4Addr::UNSPECIFIED);
            self.bound = None;
            self.state = SlaveState::MasterNone;
            self.last_reported_running = None;
            return vec![
                SlaveEvent::Disconnect { master_ip },
                SlaveEvent::MasterRunningChanged {
                    connected: false,
                    running: false,
                    stopped_by_user: false,
                    protocol_ver: 0,
                    master_application_status: 0,
                },
            ];
        }
        Vec::new()
    }

    pub fn set_application_status(&mut self, running: bool, stopped_by_user: bool) {
        self.running = running;
        self.stopped_by_user = stopped_by_user;
    }

    pub fn set_local_management_info(&mut self, value: u32) {
        self.local_management_info = value;
    }

    pub fn set_error_code(&mut self, code: u16) {
        self.slave_err_code = code;
    }

    /// `DISABLE_SLAVE`: synthesize the final disconnect response and move
    /// straight to `SLAVE_DISABLED` (see DESIGN.md for why
    /// `WAIT_DISABLING_SLAVE` collapses to a single step here).
    pub fn stop_cyclic_data(&mut self, cfg: &SlaveConfig, my_slave_id: Ipv4Addr) -> Option<CyclicResponse> {
        let group_no = self.bound.map(|b| b.group_no).unwrap_or(0);
        self.state = SlaveState::SlaveDisabled;
        if group_no == 0 {
            return None;
        }
        Some(self.build_response(cfg, my_slave_id, group_no, EndCode::SlaveRequestsDisconnect))
    }

    pub fn restart_cyclic_data(&mut self) {
        self.state = SlaveState::MasterNone;
        self.bound = None;
    }

    pub fn ip_updated(&mut self) {
        self.bound = None;
        self.state = SlaveState::MasterNone;
    }
}

impl Default for SlaveConn {
    fn default() -> Self {
        Self::new()
    }
}
