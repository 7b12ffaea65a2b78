//! Public master API: wires config, storage, the per-group engines, and the
//! SLMP service together behind a single `handle_periodic` tick (spec §5/§6).

use std::net::Ipv4Addr;

use log::{debug, info, warn};
use thiserror::Error;

use crate::config::{self, MasterConfig};
use crate::error::{ErrorEvent, ErrorKind};
use crate::frame::ciefb::{CyclicRequest, CyclicResponse};
use crate::frame::slmp::{self, ErrorFrame, NodeSearchRequest, NodeSearchResponse, SetIpRequest, SetIpResponse};
use crate::frame::{CCIEFB_PORT, SLMP_PORT};
use crate::master::group::{GroupEvent, GroupRuntime};
use crate::master::slmp::{MasterSlmp, SlmpError, SlmpTickOutcome};
use crate::platform::{MasterCallbacks, Platform, UdpHandle};
use crate::storage;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("configuration rejected: {0}")]
    Config(#[from] config::Error),
    #[error("platform error: {0}")]
    Platform(#[from] crate::platform::Error),
}

const PARAMETER_NO_PAYLOAD_LEN: usize = 2;

pub struct Master {
    config: MasterConfig,
    mac: [u8; 6],
    groups: Vec<GroupRuntime>,
    slmp: MasterSlmp,
    ciefb_handle: UdpHandle,
    slmp_handle: UdpHandle,
    running: bool,
    stopped_by_user: bool,
    local_unit_info: u16,
    pending_set_ip_target_mac: [u8; 6],
}

impl Master {
    pub fn init<P: Platform>(config: MasterConfig, platform: &mut P) -> Result<Self, InitError> {
        config::validate_master(&config)?;

        let path = config.persist_path.clone();
        let stored_parameter_no = storage::load(&*platform, &path)
            .ok()
            .flatten()
            .filter(|p| p.len() == PARAMETER_NO_PAYLOAD_LEN)
            .map(|p| u16::from_le_bytes([p[0], p[1]]))
            .unwrap_or(0);
        let parameter_no = stored_parameter_no.wrapping_add(1);
        let _ = storage::save_if_modified(platform, &path, &parameter_no.to_le_bytes());

        let ifindex = platform.get_ifindex(config.master_id)?;
        let mac = platform.get_mac(ifindex)?;

        let ciefb_handle = platform.udp_open(config.master_id, CCIEFB_PORT)?;
        let slmp_handle = platform.udp_open(Ipv4Addr::UNSPECIFIED, SLMP_PORT)?;

        let now = platform.now_monotonic_us();
        let mut groups = Vec::with_capacity(config.groups.len());
        for (i, g) in config.groups.iter().enumerate() {
            let mut group = GroupRuntime::new((i + 1) as u16, config.protocol_ver, g, parameter_no);
            group.startup(now, config.arbitration_time_ms);
            groups.push(group);
        }

        info!("master initialized: {} group(s), parameter_no={parameter_no}", groups.len());

        Ok(Master {
            config,
            mac,
            groups,
            slmp: MasterSlmp::new(),
            ciefb_handle,
            slmp_handle,
            running: true,
            stopped_by_user: false,
            local_unit_info: 1,
            pending_set_ip_target_mac: [0; 6],
        })
    }

    pub fn exit<P: Platform>(self, platform: &mut P) {
        platform.udp_close(self.ciefb_handle).ok();
        platform.udp_close(self.slmp_handle).ok();
    }

    fn broadcast_target(&self, platform: &dyn Platform, ifindex: u32) -> Ipv4Addr {
        match self.config.broadcast_kind {
            config::BroadcastKind::Limited => Ipv4Addr::new(255, 255, 255, 255),
            config::BroadcastKind::Directed => {
                let netmask = platform.get_netmask(ifindex).unwrap_or(Ipv4Addr::new(255, 255, 255, 0));
                let host_mask = !u32::from(netmask);
                Ipv4Addr::from(u32::from(self.config.master_id) | host_mask)
            }
        }
    }

    pub fn handle_periodic<P: Platform>(&mut self, platform: &mut P, callbacks: &mut dyn MasterCallbacks) {
        let now = platform.now_monotonic_us();

        while let Ok(Some(dgram)) = platform.udp_recvfrom(self.ciefb_handle) {
            self.ingest_ciefb(&dgram.data, now, callbacks);
        }
        while let Ok(Some(dgram)) = platform.udp_recvfrom(self.slmp_handle) {
            self.ingest_slmp(&dgram.data, callbacks);
        }

        let ifindex = platform.get_ifindex(self.config.master_id).ok();
        let local_unit_info = self.local_unit_info;
        let clock_info = platform.now_unix_ms();
        let master_id = self.config.master_id;

        let mut outcomes = Vec::with_capacity(self.groups.len());
        for group in &mut self.groups {
            let (req, events) = group.tick(now, master_id, local_unit_info, clock_info);
            outcomes.push((group.group_no, req, events));
        }
        for (group_no, req, events) in outcomes {
            for event in events {
                self.dispatch_group_event(group_no, event, callbacks);
            }
            if let Some(req) = req {
                self.send_request(platform, ifindex, &req);
            }
        }

        for outcome in self.slmp.tick(now) {
            match outcome {
                SlmpTickOutcome::None => {}
                SlmpTickOutcome::NodeSearchComplete(db) => callbacks.node_search_cfm(db),
                SlmpTickOutcome::SetIpComplete(status) => {
                    callbacks.set_ip_cfm(self.pending_set_ip_target_mac, status);
                }
            }
        }
    }

    fn send_request<P: Platform>(&self, platform: &mut P, ifindex: Option<u32>, req: &CyclicRequest) {
        let target = ifindex
            .map(|idx| self.broadcast_target(platform, idx))
            .unwrap_or(Ipv4Addr::new(255, 255, 255, 255));
        let bytes = req.encode();
        if let Err(e) = platform.udp_sendto(self.ciefb_handle, &bytes, target, CCIEFB_PORT) {
            warn!("failed to send cyclic request for group {}: {e}", req.group_no);
        }
    }

    fn dispatch_group_event(&mut self, group_no: u16, event: GroupEvent, callbacks: &mut dyn MasterCallbacks) {
        match event {
            GroupEvent::EnteredRunning => callbacks.state_ind(group_no, true),
            GroupEvent::LinkScanComplete => callbacks.link_scan_complete_ind(group_no),
            GroupEvent::ArbitrationFailed { other_master } => {
                callbacks.error_ind(ErrorEvent {
                    kind: ErrorKind::ArbitrationFailed,
                    ip: other_master,
                    arg2: 0,
                });
                callbacks.state_ind(group_no, false);
            }
            GroupEvent::SlaveDuplication { slave_id } => callbacks.error_ind(ErrorEvent {
                kind: ErrorKind::SlaveDuplication,
                ip: slave_id,
                arg2: 0,
            }),
            GroupEvent::WrongNumberOccupied { slave_id, reported } => callbacks.error_ind(ErrorEvent {
                kind: ErrorKind::SlaveReportsWrongNumberOccupied,
                ip: slave_id,
                arg2: reported as u32,
            }),
            GroupEvent::DeviceConnect { station_no } => {
                debug!("group {group_no} station {station_no} connected");
                callbacks.connect_ind(group_no, station_no);
            }
            GroupEvent::DeviceDisconnect { station_no } => {
                debug!("group {group_no} station {station_no} disconnected");
                callbacks.disconnect_ind(group_no, station_no);
            }
            GroupEvent::ChangedSlaveInfo { station_no } => {
                debug!("group {group_no} station {station_no} info changed");
                callbacks.changed_slave_info_ind(group_no, station_no);
            }
            GroupEvent::Alarm { station_no, end_code, slave_err_code } => {
                warn!("group {group_no} station {station_no} alarm end_code={end_code:#06x} slave_err={slave_err_code:#06x}");
                callbacks.alarm_ind(group_no, station_no, end_code, slave_err_code);
            }
        }
    }

    fn ingest_ciefb(&mut self, data: &[u8], now: u32, callbacks: &mut dyn MasterCallbacks) {
        if let Ok(resp) = CyclicResponse::decode(data, None) {
            let events = match self.groups.iter_mut().find(|g| g.group_no == resp.group_no) {
                Some(group) => group.handle_response(&resp, now),
                None => return,
            };
            for event in events {
                self.dispatch_group_event(resp.group_no, event, callbacks);
            }
            return;
        }
        if let Ok(req) = CyclicRequest::decode(data, None) {
            if req.master_id != self.config.master_id {
                let event = self
                    .groups
                    .iter_mut()
                    .find(|g| g.group_no == req.group_no)
                    .and_then(|group| group.request_from_other(req.master_id));
                if let Some(event) = event {
                    self.dispatch_group_event(req.group_no, event, callbacks);
                }
            }
        }
    }

    fn ingest_slmp(&mut self, data: &[u8], callbacks: &mut dyn MasterCallbacks) {
        if let Ok(resp) = NodeSearchResponse::decode(data) {
            self.slmp.ingest_node_search_response(&resp);
            return;
        }
        if let Ok(resp) = SetIpResponse::decode(data) {
            if let Some(status) = self.slmp.ingest_set_ip_response(&resp) {
                callbacks.set_ip_cfm(self.pending_set_ip_target_mac, status);
            }
            return;
        }
        if let Ok(err) = ErrorFrame::decode(data) {
            if err.command == slmp::CMD_SET_IP {
                if let Some(status) = self.slmp.ingest_set_ip_error(&err) {
                    callbacks.set_ip_cfm(self.pending_set_ip_target_mac, status);
                }
            }
        }
    }

    pub fn perform_node_search<P: Platform>(&mut self, platform: &mut P) -> Result<(), SlmpError> {
        let now = platform.now_monotonic_us();
        let serial = self.slmp.start_node_search(now, self.config.callback_time_node_search_ms)?;
        let req = NodeSearchRequest {
            serial,
            master_mac: self.mac,
            master_ip: self.config.master_id,
        };
        let ifindex = platform.get_ifindex(self.config.master_id).ok();
        let target = ifindex
            .map(|idx| self.broadcast_target(platform, idx))
            .unwrap_or(Ipv4Addr::new(255, 255, 255, 255));
        let _ = platform.udp_sendto(self.slmp_handle, &req.encode(), target, SLMP_PORT);
        Ok(())
    }

    pub fn set_slave_ipaddr<P: Platform>(
        &mut self,
        platform: &mut P,
        target_mac: [u8; 6],
        new_ip: Ipv4Addr,
        new_netmask: Ipv4Addr,
    ) -> Result<(), SlmpError> {
        let now = platform.now_monotonic_us();
        let serial = self.slmp.start_set_ip(now, self.config.callback_time_set_ip_ms, self.mac)?;
        self.pending_set_ip_target_mac = target_mac;
        let req = SetIpRequest {
            serial,
            master_mac: self.mac,
            master_ip: self.config.master_id,
            target_mac,
            new_ip,
            new_netmask,
            new_gateway: Ipv4Addr::new(255, 255, 255, 255),
            target_ip: Ipv4Addr::new(255, 255, 255, 255),
            target_port: 0xFFFF,
            protocol_settings: 1,
        };
        let ifindex = platform.get_ifindex(self.config.master_id).ok();
        let target = ifindex
            .map(|idx| self.broadcast_target(platform, idx))
            .unwrap_or(Ipv4Addr::new(255, 255, 255, 255));
        let _ = platform.udp_sendto(self.slmp_handle, &req.encode(), target, SLMP_PORT);
        Ok(())
    }

    /// `master_local_unit_info` is 1 bit wide under protocol v1 (`running`
    /// only) and 2 bits wide under v2 (`running` plus `stopped_by_user`),
    /// per spec §4.1's `{0,1}` / `{0,1,2,3}` ranges.
    pub fn set_master_application_status(&mut self, running: bool, stopped_by_user: bool) {
        self.running = running;
        self.stopped_by_user = stopped_by_user;
        let stopped_bit = if self.config.protocol_ver == 2 { (stopped_by_user as u16) << 1 } else { 0 };
        self.local_unit_info = running as u16 | stopped_bit;
    }

    pub fn set_slave_communication_status(&mut self, group_no: u16, station_no: u16, enabled: bool) {
        if let Some(group) = self.groups.iter_mut().find(|g| g.group_no == group_no) {
            if let Some(device) = group.devices.iter_mut().find(|d| d.station_no == station_no) {
                if enabled {
                    device.re_enable();
                } else {
                    device.disable();
                }
            }
        }
    }

    pub fn force_cyclic_transmission_bit(&mut self, group_no: u16, station_no: u16, value: bool) {
        if let Some(group) = self.groups.iter_mut().find(|g| g.group_no == group_no) {
            if let Some(device) = group.devices.iter_mut().find(|d| d.station_no == station_no) {
                device.force_transmission_bit = value;
            }
        }
    }

    pub fn group(&self, group_no: u16) -> Option<&GroupRuntime> {
        self.groups.iter().find(|g| g.group_no == group_no)
    }

    pub fn group_mut(&mut self, group_no: u16) -> Option<&mut GroupRuntime> {
        self.groups.iter_mut().find(|g| g.group_no == group_no)
    }
}
