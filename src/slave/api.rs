//! Public slave API: wires config and the connection state machine to a
//! single `handle_periodic` tick (spec §5/§6).

use std::net::Ipv4Addr;

use log::info;
use thiserror::Error;

use crate::config::{self, SlaveConfig};
use crate::error::ErrorEvent;
use crate::frame::ciefb::CyclicRequest;
use crate::frame::CCIEFB_PORT;
use crate::platform::{Platform, SlaveCallbacks, UdpHandle};
use crate::slave::conn::{SlaveConn, SlaveEvent};

#[derive(Debug, Error)]
pub enum InitError {
    #[error("configuration rejected: {0}")]
    Config(#[from] config::Error),
    #[error("platform error: {0}")]
    Platform(#[from] crate::platform::Error),
}

pub struct Slave {
    config: SlaveConfig,
    conn: SlaveConn,
    ciefb_handle: UdpHandle,
}

impl Slave {
    pub fn init<P: Platform>(config: SlaveConfig, platform: &mut P) -> Result<Self, InitError> {
        config::validate_slave(&config)?;
        let ciefb_handle = platform.udp_open(config.my_ip, CCIEFB_PORT)?;
        let mut conn = SlaveConn::new();
        conn.startup();
        info!("slave initialized at {}", config.my_ip);
        Ok(Slave {
            config,
            conn,
            ciefb_handle,
        })
    }

    pub fn exit<P: Platform>(self, platform: &mut P) {
        platform.udp_close(self.ciefb_handle).ok();
    }

    pub fn handle_periodic<P: Platform>(&mut self, platform: &mut P, callbacks: &mut dyn SlaveCallbacks) {
        let now = platform.now_monotonic_us();

        while let Ok(Some(dgram)) = platform.udp_recvfrom(self.ciefb_handle) {
            if let Ok(req) = CyclicRequest::decode(&dgram.data, None) {
                let (resp, events) = self.conn.handle_request(&req, now, self.config.my_ip, &self.config);
                if let Some(resp) = resp {
                    let bytes = resp.encode();
                    let _ = platform.udp_sendto(self.ciefb_handle, &bytes, req.master_id, CCIEFB_PORT);
                }
                for event in events {
                    self.dispatch_event(event, callbacks);
                }
            }
        }

        for event in self.conn.tick(now) {
            self.dispatch_event(event, callbacks);
        }
    }

    fn dispatch_event(&self, event: SlaveEvent, callbacks: &mut dyn SlaveCallbacks) {
        match event {
            SlaveEvent::Connect { master_ip } => callbacks.master_connect_ind(master_ip),
            SlaveEvent::Disconnect { master_ip } => callbacks.master_disconnect_ind(master_ip),
            SlaveEvent::MasterDuplication { other_master_ip } => callbacks.error_ind(ErrorEvent {
                kind: crate::error::ErrorKind::SlaveReportsMasterDuplication,
                ip: other_master_ip,
                arg2: 0,
            }),
            SlaveEvent::WrongNumberOccupied { reported } => callbacks.error_ind(ErrorEvent {
                kind: crate::error::ErrorKind::SlaveReportsWrongNumberOccupied,
                ip: self.conn.bound_master().map(|b| b.master_ip).unwrap_or(Ipv4Addr::UNSPECIFIED),
                arg2: reported as u32,
            }),
            SlaveEvent::MasterRunningChanged {
                connected,
                running,
                stopped_by_user,
                protocol_ver,
                master_application_status,
            } => callbacks.master_running_ind(connected, running, stopped_by_user, protocol_ver, master_application_status),
        }
    }

    pub fn set_slave_application_status(&mut self, running: bool, stopped_by_user: bool) {
        self.conn.set_application_status(running, stopped_by_user);
    }

    pub fn set_local_management_info(&mut self, value: u32) {
        self.conn.set_local_management_info(value);
    }

    pub fn set_slave_error_code(&mut self, code: u16) {
        self.conn.set_error_code(code);
    }

    pub fn stop_cyclic_data<P: Platform>(&mut self, platform: &mut P, _due_to_error: bool) {
        if let Some(resp) = self.conn.stop_cyclic_data(&self.config, self.config.my_ip) {
            if let Some(bound) = self.conn.bound_master() {
                let bytes = resp.encode();
                let _ = platform.udp_sendto(self.ciefb_handle, &bytes, bound.master_ip, CCIEFB_PORT);
            }
        }
    }

    pub fn restart_cyclic_data(&mut self) {
        self.conn.restart_cyclic_data();
    }

    pub fn image(&self) -> &crate::image::GroupImage {
        &self.conn.image
    }

    pub fn image_mut(&mut self) -> &mut crate::image::GroupImage {
        &mut self.conn.image
    }
}
