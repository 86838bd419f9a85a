//! Opaque stack-signature capture capability
//!
//! The profiler does not walk or symbolize call stacks itself: an external
//! capability hands it a small opaque integer identifying the current
//! user-mode and kernel-mode stacks (the `bpf_get_stackid` seam). Negative
//! ids are the capture-failure sentinel. A sentinel is still stored as a
//! key component, so capture failures group together under a stable
//! degraded key instead of being dropped.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Stable sentinel for a failed stack capture (mirrors the kernel helper's
/// -EFAULT return).
pub const STACK_ID_FAILED: i64 = -14;

/// Opaque stack-signature capture for the current execution context.
pub trait StackCapture: Send + Sync {
    /// Signature of the current user-mode stack; negative on failure.
    fn user_stack_id(&self) -> i64;

    /// Signature of the current kernel-mode stack; negative on failure.
    fn kernel_stack_id(&self) -> i64;
}

impl<S: StackCapture> StackCapture for Arc<S> {
    fn user_stack_id(&self) -> i64 {
        (**self).user_stack_id()
    }

    fn kernel_stack_id(&self) -> i64 {
        (**self).kernel_stack_id()
    }
}

/// Capture that always fails: every interval lands on the degraded key.
///
/// Useful where no capture capability is wired up; the profiler then
/// effectively keys on thread identity and comm alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStackCapture;

impl StackCapture for NoStackCapture {
    fn user_stack_id(&self) -> i64 {
        STACK_ID_FAILED
    }

    fn kernel_stack_id(&self) -> i64 {
        STACK_ID_FAILED
    }
}

/// Capture primed externally, one pair of ids at a time.
///
/// The trace replay driver (and tests) set the ids carried by each
/// recorded transition before feeding it to the profiler.
#[derive(Debug)]
pub struct ScriptedStacks {
    user: AtomicI64,
    kernel: AtomicI64,
}

impl Default for ScriptedStacks {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedStacks {
    /// Create with both ids at the failure sentinel.
    pub fn new() -> Self {
        Self {
            user: AtomicI64::new(STACK_ID_FAILED),
            kernel: AtomicI64::new(STACK_ID_FAILED),
        }
    }

    /// Prime the ids returned by the next captures.
    pub fn set(&self, user: i64, kernel: i64) {
        self.user.store(user, Ordering::Relaxed);
        self.kernel.store(kernel, Ordering::Relaxed);
    }
}

impl StackCapture for ScriptedStacks {
    fn user_stack_id(&self) -> i64 {
        self.user.load(Ordering::Relaxed)
    }

    fn kernel_stack_id(&self) -> i64 {
        self.kernel.load(Ordering::Relaxed)
    }
}
