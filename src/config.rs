//! Configuration types and the `init`-time validation pass (spec §4.7).
//!
//! Validation never partially applies: `validate_master`/`validate_slave`
//! either accept the whole configuration or return the first violation
//! found, mirroring `clm_validate_config`/`clm_validate_config_duplicates`
//! in the original `clm_master.h`.

use std::net::Ipv4Addr;
use thiserror::Error;

use crate::endpoint::is_valid_unicast;

pub const MAX_GROUPS: usize = 64;
pub const MAX_DEVICES_PER_GROUP: usize = 16;
pub const MAX_OCCUPIED_PER_GROUP: usize = 16;

/// Which broadcast address an SLMP request is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastKind {
    /// `255.255.255.255`.
    Limited,
    /// Subnet-directed broadcast computed from `master_id` and the local
    /// interface netmask.
    Directed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub slave_id: Ipv4Addr,
    pub num_occupied_stations: u8,
}

#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub timeout_value_ms: u16,
    pub parallel_off_timeout_count: u16,
    pub use_constant_link_scan_time: bool,
    pub slave_devices: Vec<DeviceConfig>,
}

impl GroupConfig {
    pub fn total_occupied(&self) -> usize {
        self.slave_devices
            .iter()
            .map(|d| d.num_occupied_stations as usize)
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub master_id: Ipv4Addr,
    pub protocol_ver: u8,
    pub arbitration_time_ms: u32,
    pub groups: Vec<GroupConfig>,
    pub broadcast_kind: BroadcastKind,
    pub callback_time_node_search_ms: u32,
    pub callback_time_set_ip_ms: u32,
    pub persist_path: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SlaveConfig {
    pub my_ip: Ipv4Addr,
    pub num_occupied_stations: u8,
    pub vendor_code: u16,
    pub model_code: u32,
    pub equipment_ver: u16,
    pub ip_setting_allowed: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("master IP {0} is not a valid unicast address")]
    InvalidMasterIp(Ipv4Addr),
    #[error("slave IP {0} collides with the master IP")]
    SlaveIpEqualsMaster(Ipv4Addr),
    #[error("slave IP {0} is not a valid unicast address")]
    InvalidSlaveIp(Ipv4Addr),
    #[error("slave IP {0} is duplicated across groups")]
    DuplicateSlaveIp(Ipv4Addr),
    #[error("group {0} timeout_value_ms must be 1..=65535")]
    InvalidTimeoutValue(usize),
    #[error("group {0} timeout_value_ms exceeds 2000ms with constant link scan enabled")]
    TimeoutTooLargeForConstantScan(usize),
    #[error("group {0} parallel_off_timeout_count must be >= 1")]
    InvalidParallelOffTimeoutCount(usize),
    #[error("protocol_ver must be 1 or 2, got {0}")]
    InvalidProtocolVersion(u8),
    #[error("groups.len() must be 1..=64, got {0}")]
    InvalidGroupCount(usize),
    #[error("group {0} has an invalid device count: {1}")]
    InvalidDeviceCount(usize, usize),
    #[error("group {0} total occupied stations out of 1..=16 range: {1}")]
    InvalidTotalOccupied(usize, usize),
    #[error("group {0} device {1} has invalid num_occupied_stations: {2}")]
    InvalidDeviceOccupation(usize, usize, u8),
    #[error("num_occupied_stations must be 1..=16, got {0}")]
    InvalidSlaveOccupation(u8),
}

type Result<T> = std::result::Result<T, Error>;

pub fn validate_master(cfg: &MasterConfig) -> Result<()> {
    if !is_valid_unicast(cfg.master_id) {
        return Err(Error::InvalidMasterIp(cfg.master_id));
    }
    if !(1..=2).contains(&cfg.protocol_ver) {
        return Err(Error::InvalidProtocolVersion(cfg.protocol_ver));
    }
    if !(1..=MAX_GROUPS).contains(&cfg.groups.len()) {
        return Err(Error::InvalidGroupCount(cfg.groups.len()));
    }

    for (gi, group) in cfg.groups.iter().enumerate() {
        if group.timeout_value_ms == 0 {
            return Err(Error::InvalidTimeoutValue(gi));
        }
        if group.use_constant_link_scan_time && group.timeout_value_ms > 2000 {
            return Err(Error::TimeoutTooLargeForConstantScan(gi));
        }
        if group.parallel_off_timeout_count == 0 {
            return Err(Error::InvalidParallelOffTimeoutCount(gi));
        }
        if !(1..=MAX_DEVICES_PER_GROUP).contains(&group.slave_devices.len()) {
            return Err(Error::InvalidDeviceCount(gi, group.slave_devices.len()));
        }
        let total = group.total_occupied();
        if !(1..=MAX_OCCUPIED_PER_GROUP).contains(&total) {
            return Err(Error::InvalidTotalOccupied(gi, total));
        }
        for (di, device) in group.slave_devices.iter().enumerate() {
            if !(1..=16).contains(&device.num_occupied_stations) {
                return Err(Error::InvalidDeviceOccupation(
                    gi,
                    di,
                    device.num_occupied_stations,
                ));
            }
            if !is_valid_unicast(device.slave_id) {
                return Err(Error::InvalidSlaveIp(device.slave_id));
            }
            if device.slave_id == cfg.master_id {
                return Err(Error::SlaveIpEqualsMaster(device.slave_id));
            }
        }
    }

    validate_no_duplicate_slave_ids(cfg)?;
    Ok(())
}

fn validate_no_duplicate_slave_ids(cfg: &MasterConfig) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for group in &cfg.groups {
        for device in &group.slave_devices {
            if !seen.insert(device.slave_id) {
                return Err(Error::DuplicateSlaveIp(device.slave_id));
            }
        }
    }
    Ok(())
}

pub fn validate_slave(cfg: &SlaveConfig) -> Result<()> {
    if !is_valid_unicast(cfg.my_ip) {
        return Err(Error::InvalidSlaveIp(cfg.my_ip));
    }
    if !(1..=16).contains(&cfg.num_occupied_stations) {
        return Err(Error::InvalidSlaveOccupation(cfg.num_occupied_stations));
    }
    Ok(())
}

/// Default link-scan timeout per §4.2: `timeout_value_ms * parallel_off_timeout_count`,
/// with the documented substitution when either factor is zero.
pub fn link_scan_timeout_ms(timeout_value_ms: u16, parallel_off_timeout_count: u16) -> u32 {
    let (t, p) = match (timeout_value_ms, parallel_off_timeout_count) {
        (0, 0) => return 1500,
        (0, p) => (3u32, p as u32),
        (t, 0) => (t as u32, 500u32),
        (t, p) => (t as u32, p as u32),
    };
    t * p
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(ip: [u8; 4], n: u8) -> DeviceConfig {
        DeviceConfig {
            slave_id: Ipv4Addr::from(ip),
            num_occupied_stations: n,
        }
    }

    fn base_master() -> MasterConfig {
        MasterConfig {
            master_id: Ipv4Addr::new(1, 2, 3, 4),
            protocol_ver: 2,
            arbitration_time_ms: 2500,
            groups: vec![GroupConfig {
                timeout_value_ms: 500,
                parallel_off_timeout_count: 3,
                use_constant_link_scan_time: false,
                slave_devices: vec![device([1, 2, 3, 6], 3)],
            }],
            broadcast_kind: BroadcastKind::Limited,
            callback_time_node_search_ms: 2000,
            callback_time_set_ip_ms: 500,
            persist_path: "param.bin".into(),
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(validate_master(&base_master()).is_ok());
    }

    #[test]
    fn rejects_invalid_master_ip() {
        let mut cfg = base_master();
        cfg.master_id = Ipv4Addr::new(0, 0, 0, 0);
        assert_eq!(
            validate_master(&cfg),
            Err(Error::InvalidMasterIp(cfg.master_id))
        );
    }

    #[test]
    fn rejects_master_slave_collision() {
        let mut cfg = base_master();
        cfg.groups[0].slave_devices[0].slave_id = cfg.master_id;
        assert_eq!(
            validate_master(&cfg),
            Err(Error::SlaveIpEqualsMaster(cfg.master_id))
        );
    }

    #[test]
    fn rejects_duplicate_slave_ids_across_groups() {
        let mut cfg = base_master();
        cfg.groups.push(GroupConfig {
            timeout_value_ms: 500,
            parallel_off_timeout_count: 3,
            use_constant_link_scan_time: false,
            slave_devices: vec![device([1, 2, 3, 6], 1)],
        });
        assert_eq!(
            validate_master(&cfg),
            Err(Error::DuplicateSlaveIp(Ipv4Addr::new(1, 2, 3, 6)))
        );
    }

    #[test]
    fn rejects_timeout_over_ceiling_with_constant_scan() {
        let mut cfg = base_master();
        cfg.groups[0].use_constant_link_scan_time = true;
        cfg.groups[0].timeout_value_ms = 2001;
        assert_eq!(
            validate_master(&cfg),
            Err(Error::TimeoutTooLargeForConstantScan(0))
        );
    }

    #[test]
    fn rejects_zero_parallel_off_timeout_count() {
        let mut cfg = base_master();
        cfg.groups[0].parallel_off_timeout_count = 0;
        assert_eq!(
            validate_master(&cfg),
            Err(Error::InvalidParallelOffTimeoutCount(0))
        );
    }

    #[test]
    fn rejects_group_count_out_of_range() {
        let mut cfg = base_master();
        cfg.groups.clear();
        assert_eq!(validate_master(&cfg), Err(Error::InvalidGroupCount(0)));
    }

    #[test]
    fn rejects_total_occupied_over_sixteen() {
        let mut cfg = base_master();
        cfg.groups[0].slave_devices = vec![device([1, 2, 3, 6], 16), device([1, 2, 3, 7], 1)];
        assert_eq!(
            validate_master(&cfg),
            Err(Error::InvalidTotalOccupied(0, 17))
        );
    }

    #[test]
    fn default_link_scan_timeout_substitutions() {
        assert_eq!(link_scan_timeout_ms(0, 0), 1500);
        assert_eq!(link_scan_timeout_ms(0, 4), 12);
        assert_eq!(link_scan_timeout_ms(100, 0), 50_000);
        assert_eq!(link_scan_timeout_ms(500, 3), 1500);
    }
}
