//! # Shared Record Layout (eBPF ↔ Userspace)
//!
//! Describes the record the deletion probe writes into the `events` perf
//! event array. The probe is compiled separately (C, libbpf style); this
//! crate is the userspace mirror of its `struct event` and the only place
//! the field sizes are spelled out.
//!
//! ## Layout
//!
//! ```text
//! offset  size  field
//!      0     4  pid       (u32, little-endian)
//!      4    16  comm      (NUL-padded command name)
//!     20   256  filename  (NUL-padded path passed to unlinkat)
//! ```
//!
//! Records carry no length prefix or framing. Anything that is not exactly
//! [`RECORD_SIZE`] bytes long is not a record.

#![no_std]

use core::mem::{offset_of, size_of};

/// Size of the process ID field in bytes
pub const PID_LEN: usize = size_of::<u32>();

/// Size of the command name buffer (`TASK_COMM_LEN` in the kernel)
pub const COMM_LEN: usize = 16;

/// Size of the filename buffer
pub const FILENAME_LEN: usize = 256;

/// Record emitted by the `sys_enter_unlinkat` tracepoint program
///
/// Never read directly from kernel bytes; the offsets and size below are
/// taken from it, so a change here moves the decoder with it.
///
/// **Memory Layout**: `#[repr(C)]` with no implicit padding; every field is
/// naturally aligned at its offset, so the struct is exactly
/// [`RECORD_SIZE`] bytes.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DeleteRecord {
    /// Process ID (TGID in kernel terms) of the deleting task
    pub pid: u32,
    /// Command name from `bpf_get_current_comm()`
    pub comm: [u8; COMM_LEN],
    /// Path argument read with `bpf_probe_read_user_str()`
    pub filename: [u8; FILENAME_LEN],
}

/// Offset of the process ID within a record
pub const PID_OFFSET: usize = offset_of!(DeleteRecord, pid);

/// Offset of the command name buffer within a record
pub const COMM_OFFSET: usize = offset_of!(DeleteRecord, comm);

/// Offset of the filename buffer within a record
pub const FILENAME_OFFSET: usize = offset_of!(DeleteRecord, filename);

/// Total size of one record as delivered by the kernel
pub const RECORD_SIZE: usize = size_of::<DeleteRecord>();

// Wire contract: 4 + 16 + 256 bytes, back to back
const _: () = assert!(PID_OFFSET == 0);
const _: () = assert!(COMM_OFFSET == PID_OFFSET + PID_LEN);
const _: () = assert!(FILENAME_OFFSET == COMM_OFFSET + COMM_LEN);
const _: () = assert!(RECORD_SIZE == FILENAME_OFFSET + FILENAME_LEN);
const _: () = assert!(RECORD_SIZE == 276);
