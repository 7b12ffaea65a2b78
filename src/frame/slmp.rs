//! SLMP (Seamless Message Protocol) node-search and set-IP frame codec
//! (spec §4.1/§4.5). MAC addresses are carried on the wire in reversed byte
//! order; the codec reverses on emit/ingest so the rest of the stack only
//! ever sees addresses in normal order.

use std::net::Ipv4Addr;

use num_derive::FromPrimitive;

use super::{check_len_at_least, check_reserved, Error, Result};

const REQ_MAGIC: u16 = 0x5400;
const RESP_MAGIC: u16 = 0xD400;
const PREAMBLE_LEN: usize = 11;
const NETWORK_NUMBER: u8 = 0x00;
const UNIT_NUMBER: u8 = 0xFF;
const IO_NUMBER: u16 = 0x03FF;
const EXTENSION: u8 = 0x00;

pub const CMD_NODE_SEARCH: u16 = 0x0E30;
pub const CMD_SET_IP: u16 = 0x0E31;
const SUBCMD_DEFAULT: u16 = 0x0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum SlmpCommand {
    NodeSearch = 0x0E30,
    SetIp = 0x0E31,
}

fn reverse_mac(mac: [u8; 6]) -> [u8; 6] {
    let mut out = mac;
    out.reverse();
    out
}

fn encode_preamble(buf: &mut [u8], magic: u16, serial: u16, length: u16) {
    buf[0..2].copy_from_slice(&magic.to_be_bytes());
    buf[2..4].copy_from_slice(&serial.to_le_bytes());
    buf[4..6].copy_from_slice(&0u16.to_le_bytes());
    buf[6] = NETWORK_NUMBER;
    buf[7] = UNIT_NUMBER;
    buf[8..10].copy_from_slice(&IO_NUMBER.to_le_bytes());
    buf[10] = EXTENSION;
    buf[11..13].copy_from_slice(&length.to_le_bytes());
}

struct Preamble {
    serial: u16,
    length: u16,
}

fn decode_preamble(buf: &[u8], magic: u16) -> Result<Preamble> {
    check_len_at_least(buf, PREAMBLE_LEN + 2)?;
    check_reserved(buf, 0, &magic.to_be_bytes())?;
    let serial = u16::from_le_bytes([buf[2], buf[3]]);
    check_reserved(buf, 4, &0u16.to_le_bytes())?;
    if buf[6] != NETWORK_NUMBER {
        return Err(Error::ReservedMismatch(6));
    }
    if buf[7] != UNIT_NUMBER {
        return Err(Error::ReservedMismatch(7));
    }
    check_reserved(buf, 8, &IO_NUMBER.to_le_bytes())?;
    if buf[10] != EXTENSION {
        return Err(Error::ReservedMismatch(10));
    }
    let length = u16::from_le_bytes([buf[11], buf[12]]);
    let expected = (buf.len() - 13) as u16;
    if length != expected {
        return Err(Error::LengthMismatch(length, expected));
    }
    Ok(Preamble { serial, length })
}

fn ip_from_le(bytes: [u8; 4]) -> Ipv4Addr {
    Ipv4Addr::from(u32::from_le_bytes(bytes))
}

fn ip_to_le(ip: Ipv4Addr) -> [u8; 4] {
    u32::from(ip).to_le_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSearchRequest {
    pub serial: u16,
    pub master_mac: [u8; 6],
    pub master_ip: Ipv4Addr,
}

impl NodeSearchRequest {
    pub const WIRE_LEN: usize = 30;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        encode_preamble(&mut buf, REQ_MAGIC, self.serial, 17);
        buf[13..15].copy_from_slice(&0u16.to_le_bytes()); // timer
        buf[15..17].copy_from_slice(&CMD_NODE_SEARCH.to_le_bytes());
        buf[17..19].copy_from_slice(&SUBCMD_DEFAULT.to_le_bytes());
        buf[19..25].copy_from_slice(&reverse_mac(self.master_mac));
        buf[25] = 4;
        buf[26..30].copy_from_slice(&ip_to_le(self.master_ip));
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len_at_least(buf, Self::WIRE_LEN)?;
        if buf.len() != Self::WIRE_LEN {
            return Err(Error::SizeMismatch(buf.len(), Self::WIRE_LEN));
        }
        let preamble = decode_preamble(buf, REQ_MAGIC)?;
        let command = u16::from_le_bytes([buf[15], buf[16]]);
        let sub_command = u16::from_le_bytes([buf[17], buf[18]]);
        if command != CMD_NODE_SEARCH || sub_command != SUBCMD_DEFAULT {
            return Err(Error::UnexpectedCommand(command, sub_command));
        }
        if buf[25] != 4 {
            return Err(Error::ReservedMismatch(25));
        }
        Ok(NodeSearchRequest {
            serial: preamble.serial,
            master_mac: reverse_mac(buf[19..25].try_into().unwrap()),
            master_ip: ip_from_le(buf[26..30].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSearchResponse {
    pub serial: u16,
    pub master_mac: [u8; 6],
    pub master_ip: Ipv4Addr,
    pub slave_mac: [u8; 6],
    pub slave_ip: Ipv4Addr,
    pub slave_netmask: Ipv4Addr,
    pub slave_gateway: Ipv4Addr,
    pub vendor_code: u16,
    pub model_code: u32,
    pub equipment_ver: u16,
    pub target_ip: Ipv4Addr,
    pub target_port: u16,
    pub slave_status: u16,
    pub slave_port: u16,
    pub slave_protocol: u8,
}

impl NodeSearchResponse {
    pub const WIRE_LEN: usize = 66;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        encode_preamble(&mut buf, RESP_MAGIC, self.serial, 53);
        buf[13..15].copy_from_slice(&0u16.to_le_bytes()); // end_code = success
        buf[15..21].copy_from_slice(&reverse_mac(self.master_mac));
        buf[21] = 4;
        buf[22..26].copy_from_slice(&ip_to_le(self.master_ip));
        buf[26..32].copy_from_slice(&reverse_mac(self.slave_mac));
        buf[32] = 4;
        buf[33..37].copy_from_slice(&ip_to_le(self.slave_ip));
        buf[37..41].copy_from_slice(&ip_to_le(self.slave_netmask));
        buf[41..45].copy_from_slice(&ip_to_le(self.slave_gateway));
        buf[45] = 0; // hostname size
        buf[46..48].copy_from_slice(&self.vendor_code.to_le_bytes());
        buf[48..52].copy_from_slice(&self.model_code.to_le_bytes());
        buf[52..54].copy_from_slice(&self.equipment_ver.to_le_bytes());
        buf[54] = 4;
        buf[55..59].copy_from_slice(&ip_to_le(self.target_ip));
        buf[59..61].copy_from_slice(&self.target_port.to_le_bytes());
        buf[61..63].copy_from_slice(&self.slave_status.to_le_bytes());
        buf[63..65].copy_from_slice(&self.slave_port.to_le_bytes());
        buf[65] = self.slave_protocol;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len_at_least(buf, Self::WIRE_LEN)?;
        if buf.len() != Self::WIRE_LEN {
            return Err(Error::SizeMismatch(buf.len(), Self::WIRE_LEN));
        }
        let preamble = decode_preamble(buf, RESP_MAGIC)?;
        let end_code = u16::from_le_bytes([buf[13], buf[14]]);
        if end_code != 0 {
            return Err(Error::UnexpectedCommand(end_code, 0));
        }
        Ok(NodeSearchResponse {
            serial: preamble.serial,
            master_mac: reverse_mac(buf[15..21].try_into().unwrap()),
            master_ip: ip_from_le(buf[22..26].try_into().unwrap()),
            slave_mac: reverse_mac(buf[26..32].try_into().unwrap()),
            slave_ip: ip_from_le(buf[33..37].try_into().unwrap()),
            slave_netmask: ip_from_le(buf[37..41].try_into().unwrap()),
            slave_gateway: ip_from_le(buf[41..45].try_into().unwrap()),
            vendor_code: u16::from_le_bytes([buf[46], buf[47]]),
            model_code: u32::from_le_bytes(buf[48..52].try_into().unwrap()),
            equipment_ver: u16::from_le_bytes([buf[52], buf[53]]),
            target_ip: ip_from_le(buf[55..59].try_into().unwrap()),
            target_port: u16::from_le_bytes([buf[59], buf[60]]),
            slave_status: u16::from_le_bytes([buf[61], buf[62]]),
            slave_port: u16::from_le_bytes([buf[63], buf[64]]),
            slave_protocol: buf[65],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetIpRequest {
    pub serial: u16,
    pub master_mac: [u8; 6],
    pub master_ip: Ipv4Addr,
    pub target_mac: [u8; 6],
    pub new_ip: Ipv4Addr,
    pub new_netmask: Ipv4Addr,
    pub new_gateway: Ipv4Addr,
    pub target_ip: Ipv4Addr,
    pub target_port: u16,
    pub protocol_settings: u8,
}

impl SetIpRequest {
    pub const WIRE_LEN: usize = 58;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        encode_preamble(&mut buf, REQ_MAGIC, self.serial, 45);
        buf[13..15].copy_from_slice(&0u16.to_le_bytes()); // timer
        buf[15..17].copy_from_slice(&CMD_SET_IP.to_le_bytes());
        buf[17..19].copy_from_slice(&SUBCMD_DEFAULT.to_le_bytes());
        buf[19..25].copy_from_slice(&reverse_mac(self.master_mac));
        buf[25] = 4;
        buf[26..30].copy_from_slice(&ip_to_le(self.master_ip));
        buf[30..36].copy_from_slice(&reverse_mac(self.target_mac));
        buf[36] = 4;
        buf[37..41].copy_from_slice(&ip_to_le(self.new_ip));
        buf[41..45].copy_from_slice(&ip_to_le(self.new_netmask));
        buf[45..49].copy_from_slice(&ip_to_le(self.new_gateway));
        buf[49] = 0; // hostname size
        buf[50] = 4;
        buf[51..55].copy_from_slice(&ip_to_le(self.target_ip));
        buf[55..57].copy_from_slice(&self.target_port.to_le_bytes());
        buf[57] = self.protocol_settings;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len_at_least(buf, Self::WIRE_LEN)?;
        if buf.len() != Self::WIRE_LEN {
            return Err(Error::SizeMismatch(buf.len(), Self::WIRE_LEN));
        }
        let preamble = decode_preamble(buf, REQ_MAGIC)?;
        let command = u16::from_le_bytes([buf[15], buf[16]]);
        let sub_command = u16::from_le_bytes([buf[17], buf[18]]);
        if command != CMD_SET_IP || sub_command != SUBCMD_DEFAULT {
            return Err(Error::UnexpectedCommand(command, sub_command));
        }
        Ok(SetIpRequest {
            serial: preamble.serial,
            master_mac: reverse_mac(buf[19..25].try_into().unwrap()),
            master_ip: ip_from_le(buf[26..30].try_into().unwrap()),
            target_mac: reverse_mac(buf[30..36].try_into().unwrap()),
            new_ip: ip_from_le(buf[37..41].try_into().unwrap()),
            new_netmask: ip_from_le(buf[41..45].try_into().unwrap()),
            new_gateway: ip_from_le(buf[45..49].try_into().unwrap()),
            target_ip: ip_from_le(buf[51..55].try_into().unwrap()),
            target_port: u16::from_le_bytes([buf[55], buf[56]]),
            protocol_settings: buf[57],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetIpResponse {
    pub serial: u16,
    pub master_mac: [u8; 6],
}

impl SetIpResponse {
    pub const WIRE_LEN: usize = 21;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        encode_preamble(&mut buf, RESP_MAGIC, self.serial, 8);
        buf[13..15].copy_from_slice(&0u16.to_le_bytes());
        buf[15..21].copy_from_slice(&reverse_mac(self.master_mac));
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len_at_least(buf, Self::WIRE_LEN)?;
        if buf.len() != Self::WIRE_LEN {
            return Err(Error::SizeMismatch(buf.len(), Self::WIRE_LEN));
        }
        let preamble = decode_preamble(buf, RESP_MAGIC)?;
        let end_code = u16::from_le_bytes([buf[13], buf[14]]);
        if end_code != 0 {
            return Err(Error::UnexpectedCommand(end_code, 0));
        }
        Ok(SetIpResponse {
            serial: preamble.serial,
            master_mac: reverse_mac(buf[15..21].try_into().unwrap()),
        })
    }
}

/// Generic SLMP error response: non-zero end code plus the echoed
/// network/unit/IO/extension numbers and the command/subcommand that
/// failed (spec §4.1/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFrame {
    pub serial: u16,
    pub end_code: u16,
    pub command: u16,
    pub sub_command: u16,
}

impl ErrorFrame {
    pub const WIRE_LEN: usize = 24;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        encode_preamble(&mut buf, RESP_MAGIC, self.serial, 11);
        buf[13..15].copy_from_slice(&self.end_code.to_le_bytes());
        buf[15] = NETWORK_NUMBER;
        buf[16] = UNIT_NUMBER;
        buf[17..19].copy_from_slice(&IO_NUMBER.to_le_bytes());
        buf[19] = EXTENSION;
        buf[20..22].copy_from_slice(&self.command.to_le_bytes());
        buf[22..24].copy_from_slice(&self.sub_command.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len_at_least(buf, Self::WIRE_LEN)?;
        if buf.len() != Self::WIRE_LEN {
            return Err(Error::SizeMismatch(buf.len(), Self::WIRE_LEN));
        }
        let preamble = decode_preamble(buf, RESP_MAGIC)?;
        let end_code = u16::from_le_bytes([buf[13], buf[14]]);
        if end_code == 0 {
            return Err(Error::UnexpectedCommand(end_code, 0));
        }
        Ok(ErrorFrame {
            serial: preamble.serial,
            end_code,
            command: u16::from_le_bytes([buf[20], buf[21]]),
            sub_command: u16::from_le_bytes([buf[22], buf[23]]),
        })
    }
}
