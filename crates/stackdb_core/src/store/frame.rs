//! Frame encoding for the store file.
//!
//! ```text
//! | magic "SDBF" (4) | length (4, LE) | crc32 of payload (4, LE) | payload (N) |
//! ```
//!
//! A short trailing frame, or a trailing frame whose checksum fails, is a
//! write that never completed and is dropped on open. A checksum failure
//! anywhere before the last frame is corruption, and so is a length that
//! runs past the end of the file over a later intact frame.

use crate::error::{CoreError, CoreResult};

/// Magic bytes at the start of every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"SDBF";

/// Size of the fixed frame header.
pub const FRAME_HEADER_SIZE: usize = 12;

/// Wraps a payload in a frame.
pub(crate) fn encode(payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation(format!("frame of {} bytes is too large", payload.len())))?;
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Result of scanning a store file.
#[derive(Debug)]
pub(crate) struct Scan<'a> {
    /// `(offset, payload)` of every intact frame.
    pub frames: Vec<(u64, &'a [u8])>,
    /// Length of the intact prefix.
    pub valid_len: u64,
}

impl Scan<'_> {
    /// Returns true if bytes past the intact prefix must be dropped.
    pub fn is_torn(&self, total_len: usize) -> bool {
        self.valid_len < total_len as u64
    }
}

/// Splits raw file contents into frames.
pub(crate) fn scan(bytes: &[u8]) -> CoreResult<Scan<'_>> {
    let mut frames = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() < FRAME_HEADER_SIZE {
            break;
        }
        if rest[..4] != FRAME_MAGIC {
            return Err(CoreError::invalid_format(format!("bad frame magic at offset {pos}")));
        }
        let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let expected = u32::from_le_bytes([rest[8], rest[9], rest[10], rest[11]]);
        let end = FRAME_HEADER_SIZE + len;
        if rest.len() < end {
            if let Some(next) = intact_frame_within(&rest[FRAME_HEADER_SIZE..]) {
                return Err(CoreError::invalid_format(format!(
                    "frame at offset {pos} claims {len} bytes but another frame starts at offset {}",
                    pos + FRAME_HEADER_SIZE + next
                )));
            }
            break;
        }
        let payload = &rest[FRAME_HEADER_SIZE..end];
        let actual = crc32fast::hash(payload);
        if actual != expected {
            if rest.len() == end {
                break;
            }
            return Err(CoreError::ChecksumMismatch {
                offset: pos as u64,
                expected,
                actual,
            });
        }
        frames.push((pos as u64, payload));
        pos += end;
    }

    Ok(Scan {
        frames,
        valid_len: pos as u64,
    })
}

/// Offset of the first complete frame with a valid checksum in `bytes`.
///
/// A torn write leaves a prefix of a single frame, so finding a whole frame
/// past a short one means the short frame's length field is damaged.
fn intact_frame_within(bytes: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(found) = bytes[from..].windows(FRAME_MAGIC.len()).position(|w| w == FRAME_MAGIC) {
        let at = from + found;
        let rest = &bytes[at..];
        if rest.len() >= FRAME_HEADER_SIZE {
            let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
            let expected = u32::from_le_bytes([rest[8], rest[9], rest[10], rest[11]]);
            if let Some(payload) = rest.get(FRAME_HEADER_SIZE..FRAME_HEADER_SIZE.saturating_add(len)) {
                if crc32fast::hash(payload) == expected {
                    return Some(at);
                }
            }
        }
        from = at + 1;
    }
    None
}
