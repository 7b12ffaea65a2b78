//! End-to-end scenarios against a mock `Platform` (spec §8).

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use cl_stack::config::{BroadcastKind, DeviceConfig, GroupConfig, MasterConfig, SlaveConfig};
use cl_stack::error::{ErrorEvent, SlmpStatus};
use cl_stack::frame::ciefb::CyclicRequest;
use cl_stack::frame::slmp::NodeSearchResponse;
use cl_stack::master::slmp::NodeSearchDb;
use cl_stack::platform::{MasterCallbacks, Platform, RecvFromIf, SlaveCallbacks, UdpHandle};
use cl_stack::{Master, Slave};

struct MockPlatform {
    now_us: u32,
    next_handle: u32,
    inboxes: HashMap<u32, VecDeque<RecvFromIf>>,
    sent: Vec<(u32, Vec<u8>, Ipv4Addr, u16)>,
    files: HashMap<String, Vec<u8>>,
    mac: [u8; 6],
    netmask: Ipv4Addr,
}

impl MockPlatform {
    fn new() -> Self {
        MockPlatform {
            now_us: 0,
            next_handle: 0,
            inboxes: HashMap::new(),
            sent: Vec::new(),
            files: HashMap::new(),
            mac: [0x21, 0x22, 0x23, 0x24, 0x25, 0x26],
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        }
    }

    fn advance(&mut self, us: u32) {
        self.now_us = self.now_us.wrapping_add(us);
    }

    fn deliver(&mut self, handle: UdpHandle, data: Vec<u8>, from_ip: Ipv4Addr, from_port: u16) {
        self.inboxes.entry(handle.0).or_default().push_back(RecvFromIf {
            data,
            from_ip,
            from_port,
            ifindex: 1,
        });
    }

    fn sent_to_port(&self, port: u16) -> Vec<&Vec<u8>> {
        self.sent.iter().filter(|(_, _, _, p)| *p == port).map(|(_, d, _, _)| d).collect()
    }
}

impl Platform for MockPlatform {
    fn udp_open(&mut self, _bind_ip: Ipv4Addr, _port: u16) -> cl_stack::platform::Result<UdpHandle> {
        let h = UdpHandle(self.next_handle);
        self.next_handle += 1;
        self.inboxes.insert(h.0, VecDeque::new());
        Ok(h)
    }

    fn udp_close(&mut self, _handle: UdpHandle) -> cl_stack::platform::Result<()> {
        Ok(())
    }

    fn udp_sendto(&mut self, handle: UdpHandle, data: &[u8], to_ip: Ipv4Addr, to_port: u16) -> cl_stack::platform::Result<()> {
        self.sent.push((handle.0, data.to_vec(), to_ip, to_port));
        Ok(())
    }

    fn udp_recvfrom(&mut self, handle: UdpHandle) -> cl_stack::platform::Result<Option<RecvFromIf>> {
        Ok(self.inboxes.get_mut(&handle.0).and_then(|q| q.pop_front()))
    }

    fn get_ifindex(&self, _ip: Ipv4Addr) -> cl_stack::platform::Result<u32> {
        Ok(1)
    }

    fn get_ifname(&self, _ifindex: u32) -> cl_stack::platform::Result<String> {
        Ok("eth0".into())
    }

    fn get_mac(&self, _ifindex: u32) -> cl_stack::platform::Result<[u8; 6]> {
        Ok(self.mac)
    }

    fn get_netmask(&self, _ifindex: u32) -> cl_stack::platform::Result<Ipv4Addr> {
        Ok(self.netmask)
    }

    fn set_ip_netmask(&mut self, _ifindex: u32, _ip: Ipv4Addr, _netmask: Ipv4Addr) -> cl_stack::platform::Result<()> {
        Ok(())
    }

    fn now_monotonic_us(&self) -> u32 {
        self.now_us
    }

    fn now_unix_ms(&self) -> u64 {
        0x1234_5678_9ABC
    }

    fn save_file(&mut self, path: &str, data: &[u8]) -> cl_stack::platform::Result<()> {
        self.files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn load_file(&self, path: &str) -> cl_stack::platform::Result<Option<Vec<u8>>> {
        Ok(self.files.get(path).cloned())
    }

    fn clear_file(&mut self, path: &str) -> cl_stack::platform::Result<()> {
        self.files.remove(path);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingMasterCallbacks {
    state: Vec<(u16, bool)>,
    connects: Vec<(u16, u16)>,
    disconnects: Vec<(u16, u16)>,
    link_scan_complete: Vec<u16>,
    alarms: Vec<(u16, u16, u16, u16)>,
    errors: Vec<ErrorEvent>,
    changed_slave_info: Vec<(u16, u16)>,
    node_search: Vec<NodeSearchDb>,
    set_ip: Vec<SlmpStatus>,
}

impl MasterCallbacks for RecordingMasterCallbacks {
    fn state_ind(&mut self, group_no: u16, running: bool) {
        self.state.push((group_no, running));
    }
    fn connect_ind(&mut self, group_no: u16, station_no: u16) {
        self.connects.push((group_no, station_no));
    }
    fn disconnect_ind(&mut self, group_no: u16, station_no: u16) {
        self.disconnects.push((group_no, station_no));
    }
    fn link_scan_complete_ind(&mut self, group_no: u16) {
        self.link_scan_complete.push(group_no);
    }
    fn alarm_ind(&mut self, group_no: u16, station_no: u16, end_code: u16, slave_err_code: u16) {
        self.alarms.push((group_no, station_no, end_code, slave_err_code));
    }
    fn error_ind(&mut self, event: ErrorEvent) {
        self.errors.push(event);
    }
    fn changed_slave_info_ind(&mut self, group_no: u16, station_no: u16) {
        self.changed_slave_info.push((group_no, station_no));
    }
    fn node_search_cfm(&mut self, db: NodeSearchDb) {
        self.node_search.push(db);
    }
    fn set_ip_cfm(&mut self, _target_mac: [u8; 6], status: SlmpStatus) {
        self.set_ip.push(status);
    }
}

#[derive(Default)]
struct RecordingSlaveCallbacks {
    connects: Vec<Ipv4Addr>,
    disconnects: Vec<Ipv4Addr>,
    running_changes: Vec<(bool, bool, bool, u16, u16)>,
    errors: Vec<ErrorEvent>,
}

impl SlaveCallbacks for RecordingSlaveCallbacks {
    fn master_connect_ind(&mut self, master_id: Ipv4Addr) {
        self.connects.push(master_id);
    }
    fn master_disconnect_ind(&mut self, master_id: Ipv4Addr) {
        self.disconnects.push(master_id);
    }
    fn master_running_ind(
        &mut self,
        connected: bool,
        running: bool,
        stopped_by_user: bool,
        protocol_ver: u16,
        master_application_status: u16,
    ) {
        self.running_changes
            .push((connected, running, stopped_by_user, protocol_ver, master_application_status));
    }
    fn error_ind(&mut self, event: ErrorEvent) {
        self.errors.push(event);
    }
}

fn scenario1_master_config() -> MasterConfig {
    MasterConfig {
        master_id: Ipv4Addr::new(1, 2, 3, 4),
        protocol_ver: 2,
        arbitration_time_ms: 2500,
        groups: vec![GroupConfig {
            timeout_value_ms: 500,
            parallel_off_timeout_count: 3,
            use_constant_link_scan_time: false,
            slave_devices: vec![DeviceConfig {
                slave_id: Ipv4Addr::new(1, 2, 3, 6),
                num_occupied_stations: 3,
            }],
        }],
        broadcast_kind: BroadcastKind::Limited,
        callback_time_node_search_ms: 2000,
        callback_time_set_ip_ms: 500,
        persist_path: "param.bin".into(),
    }
}

#[test]
fn scenario_1_master_init_arbitration_and_first_link_scan() {
    let mut platform = MockPlatform::new();
    let mut master = Master::init(scenario1_master_config(), &mut platform).expect("init");
    let mut callbacks = RecordingMasterCallbacks::default();

    for _ in 0..27 {
        platform.advance(100_000); // 100ms steps, ~2.7s total
        master.handle_periodic(&mut platform, &mut callbacks);
    }

    let requests: Vec<_> = platform
        .sent_to_port(cl_stack::frame::CCIEFB_PORT)
        .into_iter()
        .map(|b| CyclicRequest::decode(b, None).unwrap())
        .collect();
    assert_eq!(requests.len(), 1, "expected exactly one cyclic request emitted");
    let req = &requests[0];
    assert_eq!(req.frame_sequence_no, 0);
    assert_eq!(req.parameter_no, 501);
    assert_eq!(
        req.slave_ids,
        vec![u32::from(Ipv4Addr::new(1, 2, 3, 6)), 0xFFFF_FFFF, 0xFFFF_FFFF]
    );
}

#[test]
fn scenario_2_slave_binds_on_first_valid_request() {
    let mut platform = MockPlatform::new();
    let slave_cfg = SlaveConfig {
        my_ip: Ipv4Addr::new(1, 2, 3, 6),
        num_occupied_stations: 2,
        vendor_code: 0x3456,
        model_code: 0x789A_BCDE,
        equipment_ver: 0xF012,
        ip_setting_allowed: true,
    };
    let mut slave = Slave::init(slave_cfg, &mut platform).expect("init");
    let mut callbacks = RecordingSlaveCallbacks::default();

    let req = CyclicRequest {
        protocol_ver: 2,
        master_local_unit_info: 1,
        clock_info: 0xEFCD_AB90_7856_3412,
        master_id: Ipv4Addr::new(1, 2, 3, 4),
        group_no: 1,
        frame_sequence_no: 0x2211,
        timeout_value: 500,
        parallel_off_timeout_count: 3,
        parameter_no: 501,
        slave_total_occupied_station_count: 2,
        cyclic_transmission_state: 1,
        slave_ids: vec![u32::from(Ipv4Addr::new(1, 2, 3, 6)), 0xFFFF_FFFF],
        rww: vec![0u16; 64],
        ry: vec![0u8; 16],
    };
    assert_eq!(req.wire_len(), 219);
    let bytes = req.encode();
    assert_eq!(bytes.len(), 219);

    let handle = UdpHandle(0);
    platform.deliver(handle, bytes, Ipv4Addr::new(1, 2, 3, 4), cl_stack::frame::CCIEFB_PORT);
    slave.handle_periodic(&mut platform, &mut callbacks);

    assert_eq!(callbacks.connects, vec![Ipv4Addr::new(1, 2, 3, 4)]);
    let responses: Vec<_> = platform
        .sent_to_port(cl_stack::frame::CCIEFB_PORT)
        .into_iter()
        .map(|b| cl_stack::frame::ciefb::CyclicResponse::decode(b, None).unwrap())
        .collect();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].slave_id, Ipv4Addr::new(1, 2, 3, 6));
    assert_eq!(responses[0].group_no, 1);
    assert_eq!(responses[0].frame_sequence_no, 0x2211);
    assert_eq!(responses[0].end_code, 0);
}

#[test]
fn scenario_3_node_search_round_trip() {
    let mut platform = MockPlatform::new();
    let mut master = Master::init(scenario1_master_config(), &mut platform).expect("init");
    let mut callbacks = RecordingMasterCallbacks::default();

    master.perform_node_search(&mut platform).expect("start node search");
    let slmp_sent = platform.sent_to_port(cl_stack::frame::SLMP_PORT);
    assert_eq!(slmp_sent.len(), 1);
    assert_eq!(slmp_sent[0].len(), 30);
    assert_eq!(u16::from_le_bytes([slmp_sent[0][15], slmp_sent[0][16]]), 0x0E30);
    assert_eq!(u16::from_le_bytes([slmp_sent[0][17], slmp_sent[0][18]]), 0x0000);

    let serial = u16::from_le_bytes([slmp_sent[0][2], slmp_sent[0][3]]);
    let resp = NodeSearchResponse {
        serial,
        master_mac: platform.mac,
        master_ip: Ipv4Addr::new(1, 2, 3, 4),
        slave_mac: [0x51, 0x52, 0x53, 0x54, 0x55, 0x56],
        slave_ip: Ipv4Addr::new(1, 2, 3, 6),
        slave_netmask: Ipv4Addr::new(255, 255, 0, 0),
        slave_gateway: Ipv4Addr::new(255, 255, 255, 255),
        vendor_code: 0x3456,
        model_code: 0x789A_BCDE,
        equipment_ver: 0xF012,
        target_ip: Ipv4Addr::new(255, 255, 255, 255),
        target_port: 0xFFFF,
        slave_status: 0,
        slave_port: 61451,
        slave_protocol: 1,
    };
    let bytes = resp.encode();
    assert_eq!(bytes.len(), 66);
    platform.deliver(UdpHandle(1), bytes.to_vec(), Ipv4Addr::new(1, 2, 3, 6), cl_stack::frame::SLMP_PORT);

    for _ in 0..21 {
        platform.advance(100_000);
        master.handle_periodic(&mut platform, &mut callbacks);
    }

    assert_eq!(callbacks.node_search.len(), 1);
    let db = &callbacks.node_search[0];
    assert_eq!(db.stored(), 1);
    assert_eq!(db.entries[0].ip, Ipv4Addr::new(1, 2, 3, 6));
    assert_eq!(db.entries[0].vendor_code, 0x3456);
}

#[test]
fn scenario_4_set_ip_times_out() {
    let mut platform = MockPlatform::new();
    let mut master = Master::init(scenario1_master_config(), &mut platform).expect("init");
    let mut callbacks = RecordingMasterCallbacks::default();

    master
        .set_slave_ipaddr(
            &mut platform,
            [0x51, 0x52, 0x53, 0x54, 0x55, 0x56],
            Ipv4Addr::new(1, 2, 3, 9),
            Ipv4Addr::new(255, 255, 255, 0),
        )
        .expect("start set-ip");

    for _ in 0..6 {
        platform.advance(100_000);
        master.handle_periodic(&mut platform, &mut callbacks);
    }

    assert_eq!(callbacks.set_ip, vec![SlmpStatus::Timeout]);
}

#[test]
fn scenario_5_duplicate_master_arbitration_failure() {
    let mut platform = MockPlatform::new();
    let mut master = Master::init(scenario1_master_config(), &mut platform).expect("init");
    let mut callbacks = RecordingMasterCallbacks::default();

    let foreign_req = CyclicRequest {
        protocol_ver: 2,
        master_local_unit_info: 1,
        clock_info: 0,
        master_id: Ipv4Addr::new(9, 9, 9, 9),
        group_no: 1,
        frame_sequence_no: 0,
        timeout_value: 500,
        parallel_off_timeout_count: 3,
        parameter_no: 1,
        slave_total_occupied_station_count: 3,
        cyclic_transmission_state: 0,
        slave_ids: vec![u32::from(Ipv4Addr::new(1, 2, 3, 6)), 0xFFFF_FFFF, 0xFFFF_FFFF],
        rww: vec![0u16; 96],
        ry: vec![0u8; 24],
    };
    platform.deliver(UdpHandle(0), foreign_req.encode(), Ipv4Addr::new(9, 9, 9, 9), cl_stack::frame::CCIEFB_PORT);

    platform.advance(100_000);
    master.handle_periodic(&mut platform, &mut callbacks);

    assert_eq!(
        callbacks.errors,
        vec![ErrorEvent {
            kind: cl_stack::ErrorKind::ArbitrationFailed,
            ip: Ipv4Addr::new(9, 9, 9, 9),
            arg2: 0,
        }]
    );
}

#[test]
fn scenario_6_persisted_parameter_no_increments_on_restart() {
    let mut platform = MockPlatform::new();
    let master = Master::init(scenario1_master_config(), &mut platform).expect("init");
    master.exit(&mut platform);
    let file_after_first = platform.files.get("param.bin").cloned().unwrap();
    assert_eq!(file_after_first.len(), 8 + 2);

    let mut master2 = Master::init(scenario1_master_config(), &mut platform).expect("second init");
    let mut callbacks = RecordingMasterCallbacks::default();
    for _ in 0..27 {
        platform.advance(100_000);
        master2.handle_periodic(&mut platform, &mut callbacks);
    }
    let requests: Vec<_> = platform
        .sent_to_port(cl_stack::frame::CCIEFB_PORT)
        .into_iter()
        .map(|b| CyclicRequest::decode(b, None).unwrap())
        .collect();
    assert_eq!(requests.last().unwrap().parameter_no, 502);
}
