//! Aggregation key construction
//!
//! Blocked time is attributed at interval-completion time (switch-in), not
//! at block-start: the stack signatures and thread name describe where the
//! thread *resumed*. Key equality is purely structural over all fields;
//! no normalization is applied across equivalent stacks.

use std::fmt;
use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

use crate::stack_capture::StackCapture;

/// Fixed width of a thread name, matching the kernel's TASK_COMM_LEN.
pub const TASK_COMM_LEN: usize = 16;

/// Fixed-width, NUL-padded thread name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CommName([u8; TASK_COMM_LEN]);

impl CommName {
    /// Build from a string, truncating to the fixed width.
    ///
    /// Truncation is byte-wise; a multi-byte character straddling the
    /// boundary is cut, same as the kernel's comm field.
    pub fn new(name: &str) -> Self {
        let mut buf = [0u8; TASK_COMM_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(TASK_COMM_LEN);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self(buf)
    }

    /// Raw fixed-width bytes.
    pub fn as_bytes(&self) -> &[u8; TASK_COMM_LEN] {
        &self.0
    }

    /// Lossy UTF-8 view up to the first NUL.
    pub fn as_display(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(TASK_COMM_LEN);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }

    /// Pack into two words for atomic slot storage.
    pub(crate) fn to_words(self) -> [u64; 2] {
        let lo = u64::from_ne_bytes(self.0[..8].try_into().unwrap());
        let hi = u64::from_ne_bytes(self.0[8..].try_into().unwrap());
        [lo, hi]
    }

    /// Unpack from two words of atomic slot storage.
    pub(crate) fn from_words(words: [u64; 2]) -> Self {
        let mut buf = [0u8; TASK_COMM_LEN];
        buf[..8].copy_from_slice(&words[0].to_ne_bytes());
        buf[8..].copy_from_slice(&words[1].to_ne_bytes());
        Self(buf)
    }
}

impl fmt::Display for CommName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // pad() honors width/alignment from the caller's format spec.
        f.pad(&self.as_display())
    }
}

/// Composite aggregation key: thread identity plus resume-site stacks.
///
/// Negative stack ids are the capture-failure sentinel and participate in
/// equality like any other value, so failed captures group together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitKey {
    /// Thread id of the resuming thread.
    pub tid: u32,
    /// Thread-group (process) id of the resuming thread.
    pub tgid: u32,
    /// Opaque user-mode stack signature at resume.
    pub user_stack_id: i64,
    /// Opaque kernel-mode stack signature at resume.
    pub kernel_stack_id: i64,
    /// Thread name at resume.
    pub comm: CommName,
}

impl WaitKey {
    /// Build the key for an interval completing now, consulting the stack
    /// capture capability for the resume-site signatures.
    pub fn at_resume<S: StackCapture>(tid: u32, tgid: u32, stacks: &S, comm: CommName) -> Self {
        Self {
            tid,
            tgid,
            user_stack_id: stacks.user_stack_id(),
            kernel_stack_id: stacks.kernel_stack_id(),
            comm,
        }
    }

    /// Whether either stack capture failed for this key.
    pub fn has_degraded_stacks(&self) -> bool {
        self.user_stack_id < 0 || self.kernel_stack_id < 0
    }

    /// Probe-start hash for the fixed-capacity table. Allocation-free.
    pub(crate) fn probe_hash(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}
