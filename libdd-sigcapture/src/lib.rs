// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Signal interception layer for native crash and on-demand trace capture.
//!
//! Two independent controllers, both built directly on POSIX signal delivery:
//!
//! - The crash controller ([`register_crash_handler`]) takes over a fixed set
//!   of fatal signals (SIGABRT, SIGBUS, SIGFPE, SIGILL, SIGSEGV, SIGTRAP,
//!   SIGSYS, SIGSTKFLT) and runs the supplied handler on a dedicated
//!   alternate stack, so it survives delivery triggered by stack overflow.
//! - The trace controller ([`register_trace_handler`]) takes over SIGQUIT for
//!   on-demand thread/stack dumps, unblocking it for the installing thread.
//!
//! Handlers run in signal context and may only use async-signal-safe
//! functions: no heap allocation, no locks that the interrupted code might
//! hold, no buffered I/O.
//! <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
//! This contract cannot be expressed in the type system; it is a hard
//! precondition on every [`SignalHandler`] passed to this crate.
//!
//! The delivery environment is hostile by construction: the condition that
//! raised the signal is often stack exhaustion, address-space exhaustion, or
//! fd exhaustion. Everything this crate needs at delivery time is therefore
//! reserved up front (the alternate stack), and the one operation that runs
//! inside signal context, [`requeue_signal`], goes through a raw syscall
//! rather than the libc wrapper surface.

mod alt_stack;
mod crash;
mod trace;

use nix::errno::Errno;

/// A caller-supplied signal handler.
///
/// Invoked as `(signal_number, signal_info, execution_context)` with the
/// kernel-provided `siginfo_t` and `ucontext_t` pointers. Must be
/// async-signal-safe (see the crate docs); nothing here can check that.
pub type SignalHandler =
    extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void);

/// Errors reported by the registration and requeue operations.
///
/// This layer never aborts or panics on behalf of the caller; every failure
/// comes back as one of these.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The alternate signal stack could not be allocated.
    #[error("failed to allocate the alternate signal stack")]
    OutOfMemory,
    /// An OS signal primitive (sigaction, sigaltstack, sigmask change, or the
    /// signal-queue syscall) failed.
    #[error("signal system call failed: {0}")]
    SystemCall(#[from] Errno),
}

pub use crash::{
    ignore_crash_signals, register_crash_handler, requeue_signal, unregister_crash_handler,
    CRASH_SIGNALS,
};
pub use trace::{register_trace_handler, unregister_trace_handler};
