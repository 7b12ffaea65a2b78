//! Persisted parameter storage: a tiny self-describing record format plus
//! "save only if the value actually changed" semantics (spec §6/§8), so a
//! master/slave that's restarted with an unchanged configuration doesn't
//! wear out flash on every cycle.

use thiserror::Error;

use crate::platform::Platform;

const MAGIC: [u8; 4] = *b"CLPM";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("record too short: {0} bytes")]
    TooShort(usize),
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A persisted payload with a magic/version/reserved header, read back with
/// [`Record::decode`] and compared byte-for-byte before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub payload: Vec<u8>,
}

impl Record {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::TooShort(buf.len()));
        }
        if buf[0..4] != MAGIC {
            return Err(Error::BadMagic);
        }
        if buf[4] != VERSION {
            return Err(Error::UnsupportedVersion(buf[4]));
        }
        Ok(Record {
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Outcome of [`save_if_modified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// No file existed yet, or it held different bytes; a new record was written.
    Written,
    /// The file already held this exact payload; nothing was written.
    Unchanged,
}

/// Write `payload` to `path` unless the file already holds it. A missing or
/// corrupt file is treated as "different" and gets overwritten.
pub fn save_if_modified(
    platform: &mut dyn Platform,
    path: &str,
    payload: &[u8],
) -> std::result::Result<SaveResult, crate::platform::Error> {
    let unchanged = match platform.load_file(path)? {
        Some(bytes) => Record::decode(&bytes)
            .map(|rec| rec.payload == payload)
            .unwrap_or(false),
        None => false,
    };
    if unchanged {
        return Ok(SaveResult::Unchanged);
    }
    let record = Record {
        payload: payload.to_vec(),
    };
    platform.save_file(path, &record.encode())?;
    Ok(SaveResult::Written)
}

/// Load and validate the record at `path`, if any.
pub fn load(platform: &dyn Platform, path: &str) -> std::result::Result<Option<Vec<u8>>, crate::platform::Error> {
    match platform.load_file(path)? {
        Some(bytes) => match Record::decode(&bytes) {
            Ok(rec) => Ok(Some(rec.payload)),
            Err(_) => Ok(None),
        },
        None => Ok(None),
    }
}

/// Join a directory and a file name with exactly one `/` between them,
/// tolerating a trailing slash on `dir` or an empty `dir`.
pub fn join_path(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        return file.to_string();
    }
    if dir.ends_with('/') {
        format!("{dir}{file}")
    } else {
        format!("{dir}/{file}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips() {
        let rec = Record {
            payload: vec![1, 2, 3, 4],
        };
        let bytes = rec.encode();
        assert_eq!(Record::decode(&bytes).unwrap(), rec);
    }

    #[test]
    fn decode_rejects_bad_magic_and_short_input() {
        assert_eq!(Record::decode(&[0; 3]), Err(Error::TooShort(3)));
        let mut bytes = Record { payload: vec![] }.encode();
        bytes[0] = 0;
        assert_eq!(Record::decode(&bytes), Err(Error::BadMagic));
    }

    #[test]
    fn join_path_variants() {
        assert_eq!(join_path("/var/lib", "p.bin"), "/var/lib/p.bin");
        assert_eq!(join_path("/var/lib/", "p.bin"), "/var/lib/p.bin");
        assert_eq!(join_path("", "p.bin"), "p.bin");
    }
}
