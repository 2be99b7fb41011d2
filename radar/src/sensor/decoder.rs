//! Record decoding
//!
//! Turns one raw sample into a [`CoreEvent`]. Layout constants come from
//! `radar-common`; see that crate for the byte map.

use radar_common::{
    COMM_LEN, COMM_OFFSET, FILENAME_LEN, FILENAME_OFFSET, PID_LEN, PID_OFFSET, RECORD_SIZE,
};

use crate::domain::{CoreEvent, DecodeError, RawRecord};

/// Decode a record delivered by the kernel.
///
/// The record must be exactly [`RECORD_SIZE`] bytes; anything else is
/// rejected as a whole, never partially decoded. Text fields end at their
/// first NUL byte.
///
/// # Errors
/// Returns [`DecodeError::Length`] if the record size is wrong
pub fn decode(record: &RawRecord) -> Result<CoreEvent, DecodeError> {
    decode_bytes(record.as_bytes())
}

/// Same as [`decode`] on a plain byte slice.
///
/// # Errors
/// Returns [`DecodeError::Length`] if `bytes` is not [`RECORD_SIZE`] long
pub fn decode_bytes(bytes: &[u8]) -> Result<CoreEvent, DecodeError> {
    if bytes.len() != RECORD_SIZE {
        return Err(DecodeError::Length { expected: RECORD_SIZE, actual: bytes.len() });
    }

    let mut pid = [0u8; PID_LEN];
    pid.copy_from_slice(&bytes[PID_OFFSET..PID_OFFSET + PID_LEN]);
    let comm = &bytes[COMM_OFFSET..COMM_OFFSET + COMM_LEN];
    let filename = &bytes[FILENAME_OFFSET..FILENAME_OFFSET + FILENAME_LEN];

    Ok(CoreEvent::new(u32::from_le_bytes(pid), trim_at_nul(comm), trim_at_nul(filename)))
}

/// Bytes of a NUL-padded buffer up to (not including) the first zero byte.
///
/// A buffer without any zero byte is returned whole.
pub fn trim_at_nul(buf: &[u8]) -> &[u8] {
    buf.iter().position(|&b| b == 0).map_or(buf, |end| &buf[..end])
}
