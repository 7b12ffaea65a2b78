//! Wire codec for CCIEFB cyclic frames and SLMP discovery/addressing frames
//! (spec §4.1). Every multi-byte field is converted explicitly; nothing
//! assumes host endianness.

pub mod ciefb;
pub mod slmp;

use thiserror::Error;

/// UDP port CCIEFB cyclic requests/responses are exchanged on.
pub const CCIEFB_PORT: u16 = 61450;
/// UDP port SLMP node-search/set-IP requests/responses are exchanged on.
pub const SLMP_PORT: u16 = 61451;

const CYCLIC_REQUEST_HEADER_LEN: usize = 15;
const CYCLIC_RESPONSE_HEADER_LEN: usize = 11;
const SLMP_HEADER_LEN: usize = 11;

const CMD_CYCLIC: u16 = 0x0E70;
const SUBCMD_CYCLIC: u16 = 0x0000;

/// Rejects raised while parsing a frame off the wire. All are silently
/// dropped by callers (spec §7 "transient wire faults") — this type exists
/// so tests can assert *why* a frame was rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("reserved field mismatch at offset {0}")]
    ReservedMismatch(usize),
    #[error("dl field {0} does not match udp_len - 9 ({1})")]
    LengthMismatch(u16, u16),
    #[error("unexpected command/subcommand {0:04X}/{1:04X}")]
    UnexpectedCommand(u16, u16),
    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u16),
    #[error("cyclic_info_offset_addr mismatch: {0}")]
    OffsetMismatch(u16),
    #[error("invalid peer id {0:08X}")]
    InvalidPeerId(u32),
    #[error("group_no {0} out of range 1..=64")]
    InvalidGroupNo(u16),
    #[error("slave_total_occupied_station_count {0} out of range 1..=16")]
    InvalidOccupiedCount(u16),
    #[error("frame size {0} does not match computed size for occupied count {1}")]
    SizeMismatch(usize, usize),
    #[error("slave id {0:08X} repeated in slave-ID list")]
    RepeatedSlaveId(u32),
    #[error("SLMP serial mismatch: expected {0:04X}, got {1:04X}")]
    SerialMismatch(u16, u16),
}

pub type Result<T> = std::result::Result<T, Error>;

/// `76n + 67` for `n` in `1..=16`; `None` outside that range.
pub fn cyclic_request_size(n: u16) -> Option<usize> {
    if (1..=16).contains(&n) {
        Some(76 * n as usize + 67)
    } else {
        None
    }
}

/// `72n + 59` for `n` in `1..=16`; `None` outside that range.
pub fn cyclic_response_size(n: u16) -> Option<usize> {
    if (1..=16).contains(&n) {
        Some(72 * n as usize + 59)
    } else {
        None
    }
}

/// Inverse of [`cyclic_response_size`]: the occupied-station count implied by
/// a response frame of `size` bytes, or `0` if no valid `n` produces it.
pub fn number_of_occupied_from_response_size(size: usize) -> u16 {
    for n in 1..=16u16 {
        if cyclic_response_size(n) == Some(size) {
            return n;
        }
    }
    0
}

/// Location of flat bit number `b` within the bit-packed RX/RY area:
/// area index (`b / 64`), byte offset within the area (`(b % 64) / 8`), and
/// bit mask within that byte (`1 << (b % 8)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitLocation {
    pub area: usize,
    pub byte: usize,
    pub mask: u8,
}

pub fn bit_to_area(b: usize) -> BitLocation {
    BitLocation {
        area: b / 64,
        byte: (b % 64) / 8,
        mask: 1u8 << (b % 8),
    }
}

/// Location of register number `r` within the word-packed RWr/RWw area:
/// area index (`r / 32`) and word offset within the area (`r % 32`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterLocation {
    pub area: usize,
    pub offset: usize,
}

pub fn register_to_area(r: usize) -> RegisterLocation {
    RegisterLocation {
        area: r / 32,
        offset: r % 32,
    }
}

/// Set or clear bit `n-1` (station `n`, `1..=16`) of a `cyclic_transmission_state`
/// bitmap. Stations outside `1..=16` are a no-op.
pub fn set_transmission_bit(bitmap: u16, station: u8, value: bool) -> u16 {
    if !(1..=16).contains(&station) {
        return bitmap;
    }
    let mask = 1u16 << (station - 1);
    if value {
        bitmap | mask
    } else {
        bitmap & !mask
    }
}

/// Read bit `n-1` (station `n`) of a `cyclic_transmission_state` bitmap.
/// Stations outside `1..=16` read as `false`.
pub fn extract_my_transmission_state(bitmap: u16, station: u8) -> bool {
    if !(1..=16).contains(&station) {
        return false;
    }
    bitmap & (1u16 << (station - 1)) != 0
}

/// Result of scanning a request frame's slave-ID list for the local
/// `slave_id` (spec §4.1 "Slave-ID list analysis").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveIdListMatch {
    pub found_self: bool,
    /// 1-based station number at which `slave_id` was found.
    pub my_station_no: u16,
    /// Count of consecutive `0xFFFFFFFF` continuation entries immediately
    /// following `my_station_no`, i.e. `num_occupied_stations - 1`.
    pub implied_occupation_count: u16,
}

/// Scan `slave_ids` for `slave_id`. A `slave_id` appearing more than once is
/// a protocol error (`Error::RepeatedSlaveId`).
pub fn analyze_slave_id_list(slave_ids: &[u32], slave_id: u32) -> Result<SlaveIdListMatch> {
    let mut found_at: Option<usize> = None;
    for (i, &id) in slave_ids.iter().enumerate() {
        if id == slave_id {
            if found_at.is_some() {
                return Err(Error::RepeatedSlaveId(slave_id));
            }
            found_at = Some(i);
        }
    }
    let Some(pos) = found_at else {
        return Ok(SlaveIdListMatch {
            found_self: false,
            my_station_no: 0,
            implied_occupation_count: 0,
        });
    };
    let mut occupation = 1u16;
    for &id in &slave_ids[pos + 1..] {
        if id == crate::endpoint::MULTI_STATION_CONTINUATION {
            occupation += 1;
        } else {
            break;
        }
    }
    Ok(SlaveIdListMatch {
        found_self: true,
        my_station_no: pos as u16 + 1,
        implied_occupation_count: occupation,
    })
}

pub(crate) fn check_len_at_least(buf: &[u8], min: usize) -> Result<()> {
    if buf.len() < min {
        return Err(Error::TooShort(buf.len()));
    }
    Ok(())
}

pub(crate) fn check_reserved(buf: &[u8], offset: usize, expected: &[u8]) -> Result<()> {
    if &buf[offset..offset + expected.len()] != expected {
        return Err(Error::ReservedMismatch(offset));
    }
    Ok(())
}
