//! CCIEFB cyclic request/response frame codec (spec §4.1).

use std::net::Ipv4Addr;

use super::{
    check_len_at_least, check_reserved, cyclic_request_size, cyclic_response_size, Error, Result,
    CMD_CYCLIC, CYCLIC_REQUEST_HEADER_LEN, CYCLIC_RESPONSE_HEADER_LEN, SUBCMD_CYCLIC,
};
use crate::endpoint::is_valid_unicast;

const REQ_OFFSET_ADDR: u16 = 36;
const RESP_OFFSET_ADDR: u16 = 40;

/// A parsed, fully-owned cyclic request.
#[derive(Debug, Clone, PartialEq)]
pub struct CyclicRequest {
    pub protocol_ver: u16,
    pub master_local_unit_info: u16,
    pub clock_info: u64,
    pub master_id: Ipv4Addr,
    pub group_no: u16,
    pub frame_sequence_no: u16,
    pub timeout_value: u16,
    pub parallel_off_timeout_count: u16,
    pub parameter_no: u16,
    pub slave_total_occupied_station_count: u16,
    pub cyclic_transmission_state: u16,
    /// One entry per occupied station; `0xFFFFFFFF` marks a continuation slot.
    pub slave_ids: Vec<u32>,
    /// `32` little-endian words per occupied station.
    pub rww: Vec<u16>,
    /// `64` bits per occupied station, packed 8 bits/byte.
    pub ry: Vec<u8>,
}

impl CyclicRequest {
    pub fn wire_len(&self) -> usize {
        cyclic_request_size(self.slave_total_occupied_station_count).unwrap_or(0)
    }

    pub fn encode(&self) -> Vec<u8> {
        let n = self.slave_total_occupied_station_count;
        let len = cyclic_request_size(n).expect("caller must set a valid occupied count");
        let mut buf = vec![0u8; len];

        buf[0..2].copy_from_slice(&0x5000u16.to_be_bytes());
        buf[2] = 0x00;
        buf[3] = 0xFF;
        buf[4..6].copy_from_slice(&0x03FFu16.to_le_bytes());
        buf[6] = 0x00;
        let dl = (len - 9) as u16;
        buf[7..9].copy_from_slice(&dl.to_le_bytes());
        buf[9..11].copy_from_slice(&0x0000u16.to_le_bytes());
        buf[11..13].copy_from_slice(&CMD_CYCLIC.to_le_bytes());
        buf[13..15].copy_from_slice(&SUBCMD_CYCLIC.to_le_bytes());

        buf[15..17].copy_from_slice(&self.protocol_ver.to_le_bytes());
        buf[17..19].copy_from_slice(&0u16.to_le_bytes());
        buf[19..21].copy_from_slice(&REQ_OFFSET_ADDR.to_le_bytes());
        // 14 reserved zero bytes at 21..35, already zeroed.

        buf[35..37].copy_from_slice(&self.master_local_unit_info.to_le_bytes());
        // reserved at 37..39
        buf[39..47].copy_from_slice(&self.clock_info.to_le_bytes());

        buf[47..51].copy_from_slice(&u32::from(self.master_id).to_le_bytes());
        buf[51] = self.group_no as u8;
        // reserved at 52
        buf[53..55].copy_from_slice(&self.frame_sequence_no.to_le_bytes());
        buf[55..57].copy_from_slice(&self.timeout_value.to_le_bytes());
        buf[57..59].copy_from_slice(&self.parallel_off_timeout_count.to_le_bytes());
        buf[59..61].copy_from_slice(&self.parameter_no.to_le_bytes());
        buf[61..63].copy_from_slice(&n.to_le_bytes());
        buf[63..65].copy_from_slice(&self.cyclic_transmission_state.to_le_bytes());
        // reserved at 65..67

        let mut pos = 67;
        for id in &self.slave_ids {
            buf[pos..pos + 4].copy_from_slice(&id.to_le_bytes());
            pos += 4;
        }
        for w in &self.rww {
            buf[pos..pos + 2].copy_from_slice(&w.to_le_bytes());
            pos += 2;
        }
        buf[pos..pos + self.ry.len()].copy_from_slice(&self.ry);

        buf
    }

    pub fn decode(buf: &[u8], expected_master_id: Option<Ipv4Addr>) -> Result<Self> {
        check_len_at_least(buf, CYCLIC_REQUEST_HEADER_LEN)?;
        check_reserved(buf, 0, &0x5000u16.to_be_bytes())?;
        if buf[2] != 0x00 {
            return Err(Error::ReservedMismatch(2));
        }
        if buf[3] != 0xFF {
            return Err(Error::ReservedMismatch(3));
        }
        check_reserved(buf, 4, &0x03FFu16.to_le_bytes())?;
        if buf[6] != 0x00 {
            return Err(Error::ReservedMismatch(6));
        }

        let dl = u16::from_le_bytes([buf[7], buf[8]]);
        let expected_dl = (buf.len() - 9) as u16;
        if dl != expected_dl {
            return Err(Error::LengthMismatch(dl, expected_dl));
        }
        check_reserved(buf, 9, &0x0000u16.to_le_bytes())?;

        let command = u16::from_le_bytes([buf[11], buf[12]]);
        let sub_command = u16::from_le_bytes([buf[13], buf[14]]);
        if command != CMD_CYCLIC || sub_command != SUBCMD_CYCLIC {
            return Err(Error::UnexpectedCommand(command, sub_command));
        }

        check_len_at_least(buf, 67)?;
        let protocol_ver = u16::from_le_bytes([buf[15], buf[16]]);
        if !(1..=2).contains(&protocol_ver) {
            return Err(Error::UnsupportedProtocolVersion(protocol_ver));
        }
        let offset_addr = u16::from_le_bytes([buf[19], buf[20]]);
        if offset_addr != REQ_OFFSET_ADDR {
            return Err(Error::OffsetMismatch(offset_addr));
        }

        let master_local_unit_info = u16::from_le_bytes([buf[35], buf[36]]);
        let clock_info = u64::from_le_bytes(buf[39..47].try_into().unwrap());

        let master_id_raw = u32::from_le_bytes(buf[47..51].try_into().unwrap());
        let master_id = Ipv4Addr::from(master_id_raw);
        if master_id_raw == 0 || !is_valid_unicast(master_id) {
            return Err(Error::InvalidPeerId(master_id_raw));
        }
        if let Some(expected) = expected_master_id {
            if master_id != expected {
                return Err(Error::InvalidPeerId(master_id_raw));
            }
        }

        let group_no = buf[51] as u16;
        if !(1..=64).contains(&group_no) {
            return Err(Error::InvalidGroupNo(group_no));
        }
        let frame_sequence_no = u16::from_le_bytes([buf[53], buf[54]]);
        let timeout_value = u16::from_le_bytes([buf[55], buf[56]]);
        let parallel_off_timeout_count = u16::from_le_bytes([buf[57], buf[58]]);
        let parameter_no = u16::from_le_bytes([buf[59], buf[60]]);
        let n = u16::from_le_bytes([buf[61], buf[62]]);
        if !(1..=16).contains(&n) {
            return Err(Error::InvalidOccupiedCount(n));
        }
        let computed = cyclic_request_size(n).unwrap();
        if buf.len() != computed {
            return Err(Error::SizeMismatch(buf.len(), computed));
        }
        let cyclic_transmission_state = u16::from_le_bytes([buf[63], buf[64]]);

        let mut pos = 67;
        let mut slave_ids = Vec::with_capacity(n as usize);
        for _ in 0..n {
            slave_ids.push(u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()));
            pos += 4;
        }
        let mut rww = Vec::with_capacity(32 * n as usize);
        for _ in 0..(32 * n) {
            rww.push(u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap()));
            pos += 2;
        }
        let ry = buf[pos..pos + 8 * n as usize].to_vec();

        Ok(CyclicRequest {
            protocol_ver,
            master_local_unit_info,
            clock_info,
            master_id,
            group_no,
            frame_sequence_no,
            timeout_value,
            parallel_off_timeout_count,
            parameter_no,
            slave_total_occupied_station_count: n,
            cyclic_transmission_state,
            slave_ids,
            rww,
            ry,
        })
    }
}

/// A parsed, fully-owned cyclic response.
#[derive(Debug, Clone, PartialEq)]
pub struct CyclicResponse {
    pub protocol_ver: u16,
    pub end_code: u16,
    pub vendor_code: u16,
    pub model_code: u32,
    pub equipment_ver: u16,
    pub slave_local_unit_info: u16,
    pub slave_err_code: u16,
    pub local_management_info: u32,
    pub slave_id: Ipv4Addr,
    pub group_no: u16,
    pub frame_sequence_no: u16,
    /// `32` little-endian words per occupied station.
    pub rwr: Vec<u16>,
    /// `64` bits per occupied station, packed 8 bits/byte.
    pub rx: Vec<u8>,
}

impl CyclicResponse {
    pub fn occupied_count(&self) -> u16 {
        (self.rwr.len() / 32) as u16
    }

    pub fn encode(&self) -> Vec<u8> {
        let n = self.occupied_count();
        let len = cyclic_response_size(n).expect("caller must set a valid occupied count");
        let mut buf = vec![0u8; len];

        buf[0..2].copy_from_slice(&0xD000u16.to_be_bytes());
        buf[2] = 0x00;
        buf[3] = 0xFF;
        buf[4..6].copy_from_slice(&0x03FFu16.to_le_bytes());
        buf[6] = 0x00;
        let dl = (len - 9) as u16;
        buf[7..9].copy_from_slice(&dl.to_le_bytes());
        buf[9..11].copy_from_slice(&0x0000u16.to_le_bytes());

        buf[11..13].copy_from_slice(&self.protocol_ver.to_le_bytes());
        buf[13..15].copy_from_slice(&self.end_code.to_le_bytes());
        buf[15..17].copy_from_slice(&RESP_OFFSET_ADDR.to_le_bytes());
        // 14 reserved zero bytes at 17..31.

        buf[31..33].copy_from_slice(&self.vendor_code.to_le_bytes());
        // reserved at 33..35
        buf[35..39].copy_from_slice(&self.model_code.to_le_bytes());
        buf[39..41].copy_from_slice(&self.equipment_ver.to_le_bytes());
        // reserved at 41..43
        buf[43..45].copy_from_slice(&self.slave_local_unit_info.to_le_bytes());
        buf[45..47].copy_from_slice(&self.slave_err_code.to_le_bytes());
        buf[47..51].copy_from_slice(&self.local_management_info.to_le_bytes());

        buf[51..55].copy_from_slice(&u32::from(self.slave_id).to_le_bytes());
        buf[55] = self.group_no as u8;
        // reserved at 56
        buf[57..59].copy_from_slice(&self.frame_sequence_no.to_le_bytes());

        let mut pos = 59;
        for w in &self.rwr {
            buf[pos..pos + 2].copy_from_slice(&w.to_le_bytes());
            pos += 2;
        }
        buf[pos..pos + self.rx.len()].copy_from_slice(&self.rx);

        buf
    }

    pub fn decode(buf: &[u8], expected_slave_id: Option<Ipv4Addr>) -> Result<Self> {
        check_len_at_least(buf, CYCLIC_RESPONSE_HEADER_LEN)?;
        check_reserved(buf, 0, &0xD000u16.to_be_bytes())?;
        if buf[2] != 0x00 {
            return Err(Error::ReservedMismatch(2));
        }
        if buf[3] != 0xFF {
            return Err(Error::ReservedMismatch(3));
        }
        check_reserved(buf, 4, &0x03FFu16.to_le_bytes())?;
        if buf[6] != 0x00 {
            return Err(Error::ReservedMismatch(6));
        }
        let dl = u16::from_le_bytes([buf[7], buf[8]]);
        let expected_dl = (buf.len() - 9) as u16;
        if dl != expected_dl {
            return Err(Error::LengthMismatch(dl, expected_dl));
        }
        check_reserved(buf, 9, &0x0000u16.to_le_bytes())?;

        check_len_at_least(buf, 59)?;
        let protocol_ver = u16::from_le_bytes([buf[11], buf[12]]);
        if !(1..=2).contains(&protocol_ver) {
            return Err(Error::UnsupportedProtocolVersion(protocol_ver));
        }
        let end_code = u16::from_le_bytes([buf[13], buf[14]]);
        let offset_addr = u16::from_le_bytes([buf[15], buf[16]]);
        if offset_addr != RESP_OFFSET_ADDR {
            return Err(Error::OffsetMismatch(offset_addr));
        }

        let vendor_code = u16::from_le_bytes([buf[31], buf[32]]);
        let model_code = u32::from_le_bytes(buf[35..39].try_into().unwrap());
        let equipment_ver = u16::from_le_bytes([buf[39], buf[40]]);
        let slave_local_unit_info = u16::from_le_bytes([buf[43], buf[44]]);
        let slave_err_code = u16::from_le_bytes([buf[45], buf[46]]);
        let local_management_info = u32::from_le_bytes(buf[47..51].try_into().unwrap());

        let slave_id_raw = u32::from_le_bytes(buf[51..55].try_into().unwrap());
        let slave_id = Ipv4Addr::from(slave_id_raw);
        if slave_id_raw == 0 || !is_valid_unicast(slave_id) {
            return Err(Error::InvalidPeerId(slave_id_raw));
        }
        if let Some(expected) = expected_slave_id {
            if slave_id != expected {
                return Err(Error::InvalidPeerId(slave_id_raw));
            }
        }

        let group_no = buf[55] as u16;
        if !(1..=64).contains(&group_no) {
            return Err(Error::InvalidGroupNo(group_no));
        }
        let frame_sequence_no = u16::from_le_bytes([buf[57], buf[58]]);

        let n = super::number_of_occupied_from_response_size(buf.len());
        if n == 0 {
            return Err(Error::SizeMismatch(buf.len(), 0));
        }

        let mut pos = 59;
        let mut rwr = Vec::with_capacity(32 * n as usize);
        for _ in 0..(32 * n) {
            rwr.push(u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap()));
            pos += 2;
        }
        let rx = buf[pos..pos + 8 * n as usize].to_vec();

        Ok(CyclicResponse {
            protocol_ver,
            end_code,
            vendor_code,
            model_code,
            equipment_ver,
            slave_local_unit_info,
            slave_err_code,
            local_management_info,
            slave_id,
            group_no,
            frame_sequence_no,
            rwr,
            rx,
        })
    }
}
