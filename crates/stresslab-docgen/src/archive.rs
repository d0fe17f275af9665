//! Deterministic stored-zip writer and central-directory reader.
//!
//! Output is Zip32-only, uncompressed (method 0), with fixed timestamps and
//! explicit sizes (no data descriptors). That is all the deck builder needs,
//! and it keeps built archives byte-identical across runs.

use flate2::Crc;
use tracing::debug;

use crate::{ArchiveEntry, ArchiveInspector, ArchiveListing, DocgenError};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
const MAX_COMMENT_LEN: usize = 0xFFFF;

/// CRC-32 (IEEE 802.3) as required by the zip format.
#[must_use]
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

fn to_u32(value: usize, what: &str) -> Result<u32, DocgenError> {
    u32::try_from(value).map_err(|_| DocgenError::Archive(format!("{what} {value} exceeds zip32")))
}

fn to_u16(value: usize, what: &str) -> Result<u16, DocgenError> {
    u16::try_from(value).map_err(|_| DocgenError::Archive(format!("{what} {value} exceeds zip32")))
}

/// Build stored-zip bytes from `(name, payload)` pairs, in the given order.
pub fn build_stored_zip(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, DocgenError> {
    let mut out = Vec::new();
    let mut cd = Vec::new();

    for (name, payload) in entries {
        let name_bytes = name.as_bytes();
        let name_len = to_u16(name_bytes.len(), "entry name length")?;
        let size = to_u32(payload.len(), "entry size")?;
        let crc = crc32_ieee(payload);
        let local_off = to_u32(out.len(), "local header offset")?;

        out.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x0021u16.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name_bytes);
        out.extend_from_slice(payload);

        cd.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
        cd.extend_from_slice(&20u16.to_le_bytes());
        cd.extend_from_slice(&20u16.to_le_bytes());
        cd.extend_from_slice(&0u16.to_le_bytes());
        cd.extend_from_slice(&0u16.to_le_bytes());
        cd.extend_from_slice(&0u16.to_le_bytes());
        cd.extend_from_slice(&0x0021u16.to_le_bytes());
        cd.extend_from_slice(&crc.to_le_bytes());
        cd.extend_from_slice(&size.to_le_bytes());
        cd.extend_from_slice(&size.to_le_bytes());
        cd.extend_from_slice(&name_len.to_le_bytes());
        cd.extend_from_slice(&0u16.to_le_bytes());
        cd.extend_from_slice(&0u16.to_le_bytes());
        cd.extend_from_slice(&0u16.to_le_bytes());
        cd.extend_from_slice(&0u16.to_le_bytes());
        cd.extend_from_slice(&0u32.to_le_bytes());
        cd.extend_from_slice(&local_off.to_le_bytes());
        cd.extend_from_slice(name_bytes);
    }

    let entry_count = to_u16(entries.len(), "entry count")?;
    let cd_start = to_u32(out.len(), "central directory offset")?;
    let cd_size = to_u32(cd.len(), "central directory size")?;
    out.extend_from_slice(&cd);

    out.extend_from_slice(&EOCD_SIG.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&entry_count.to_le_bytes());
    out.extend_from_slice(&entry_count.to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_start.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    Ok(out)
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16, DocgenError> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| DocgenError::Archive(format!("truncated archive at offset {at}")))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, DocgenError> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| DocgenError::Archive(format!("truncated archive at offset {at}")))
}

/// Locate the end-of-central-directory record, scanning back over a
/// possible trailing comment.
fn find_eocd(bytes: &[u8]) -> Result<usize, DocgenError> {
    if bytes.len() < EOCD_LEN {
        return Err(DocgenError::Archive(format!(
            "archive too small: {} bytes",
            bytes.len()
        )));
    }
    let last = bytes.len() - EOCD_LEN;
    let first = last.saturating_sub(MAX_COMMENT_LEN);
    (first..=last)
        .rev()
        .find(|&at| read_u32(bytes, at).is_ok_and(|sig| sig == EOCD_SIG))
        .ok_or_else(|| DocgenError::Archive("end of central directory not found".to_owned()))
}

/// Lists archive entries by walking the central directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredZipInspector;

impl ArchiveInspector for StoredZipInspector {
    fn parse_archive(&self, bytes: &[u8]) -> Result<ArchiveListing, DocgenError> {
        let eocd = find_eocd(bytes)?;
        let total = usize::from(read_u16(bytes, eocd + 10)?);
        let cd_size = read_u32(bytes, eocd + 12)? as usize;
        let cd_start = read_u32(bytes, eocd + 16)? as usize;
        if cd_start.saturating_add(cd_size) > eocd {
            return Err(DocgenError::Archive(format!(
                "central directory {cd_start}+{cd_size} overlaps end record at {eocd}"
            )));
        }

        let mut entries = Vec::with_capacity(total);
        let mut at = cd_start;
        for index in 0..total {
            if read_u32(bytes, at)? != CENTRAL_HEADER_SIG {
                return Err(DocgenError::Archive(format!(
                    "bad central header signature for entry {index} at offset {at}"
                )));
            }
            let compressed_size = read_u32(bytes, at + 20)?;
            let uncompressed_size = read_u32(bytes, at + 24)?;
            let name_len = usize::from(read_u16(bytes, at + 28)?);
            let extra_len = usize::from(read_u16(bytes, at + 30)?);
            let comment_len = usize::from(read_u16(bytes, at + 32)?);
            let name_start = at + CENTRAL_HEADER_LEN;
            let name = bytes
                .get(name_start..name_start + name_len)
                .ok_or_else(|| {
                    DocgenError::Archive(format!("truncated entry name for entry {index}"))
                })?;
            entries.push(ArchiveEntry {
                name: String::from_utf8_lossy(name).into_owned(),
                compressed_size,
                uncompressed_size,
            });
            at = name_start + name_len + extra_len + comment_len;
        }

        debug!(entries = entries.len(), bytes = bytes.len(), "parsed archive");
        Ok(ArchiveListing { entries })
    }
}
