// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::alt_stack;
use crate::{SignalError, SignalHandler};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Fatal signals taken over by [`register_crash_handler`], in table order.
pub const CRASH_SIGNALS: [Signal; 8] = [
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGSEGV,
    Signal::SIGTRAP,
    Signal::SIGSYS,
    Signal::SIGSTKFLT,
];

// One slot per entry of CRASH_SIGNALS, holding the disposition that was
// active immediately before registration. Slots are written one at a time as
// registration walks the table, so a partial registration can still be
// unwound by `unregister_crash_handler`.
static mut SAVED_ACTIONS: [Option<SigAction>; CRASH_SIGNALS.len()] = [None; CRASH_SIGNALS.len()];

/// Registers `handler` for every signal in [`CRASH_SIGNALS`] and installs the
/// alternate signal stack, so the handler runs even when the thread stack is
/// exhausted. Handlers execute with all signals masked (`SigSet::all()`); no
/// second signal of any kind is delivered to a thread while its handler runs.
///
/// PRECONDITIONS:
///     `handler` is async-signal-safe (see the crate docs).
/// SAFETY:
///     Registration functions are not reentrant; calls to
///     `register_crash_handler` / `unregister_crash_handler` /
///     `ignore_crash_signals` must be serialized by the caller.
/// ATOMICITY:
///     Not atomic. If a `sigaction` call fails partway through the table the
///     error is returned with the already-installed entries left in place:
///     rolling back automatically would issue more fallible system calls in a
///     half-configured state. Callers needing a clean slate call
///     `unregister_crash_handler`, which skips never-populated slots.
pub fn register_crash_handler(handler: SignalHandler) -> Result<(), SignalError> {
    alt_stack::install()?;

    let sig_action = SigAction::new(
        SigHandler::SigAction(handler),
        SaFlags::SA_RESTART | SaFlags::SA_SIGINFO | SaFlags::SA_ONSTACK,
        SigSet::all(),
    );

    for (slot, sig) in CRASH_SIGNALS.iter().enumerate() {
        // SAFETY: `handler` is async-signal-safe per the caller contract, and
        // the previous action is saved before the next signal is touched.
        let old = unsafe { signal::sigaction(*sig, &sig_action)? };
        unsafe { SAVED_ACTIONS[slot] = Some(old) };
    }
    Ok(())
}

/// Restores, for every monitored signal, the disposition that was saved by
/// [`register_crash_handler`]. All slots are attempted even after a failure;
/// the last error wins. Slots that were never populated (partial
/// registration, or already restored) are skipped.
///
/// SAFETY:
///     Must be serialized with the other registration functions by the
///     caller.
pub fn unregister_crash_handler() -> Result<(), SignalError> {
    let mut last_error = None;
    for (slot, sig) in CRASH_SIGNALS.iter().enumerate() {
        let Some(saved) = (unsafe { SAVED_ACTIONS[slot] }) else {
            continue;
        };
        // SAFETY: `saved` came out of a previous sigaction call.
        match unsafe { signal::sigaction(*sig, &saved) } {
            Ok(_) => unsafe { SAVED_ACTIONS[slot] = None },
            Err(errno) => last_error = Some(errno),
        }
    }
    match last_error {
        None => Ok(()),
        Some(errno) => Err(errno.into()),
    }
}

/// Forces the OS default disposition on every monitored signal, regardless of
/// what was saved at registration. This is the "give up entirely" path, used
/// when handing off to another crash-handling subsystem or during forced
/// shutdown. All signals are attempted; the last error wins.
pub fn ignore_crash_signals() -> Result<(), SignalError> {
    let sig_action = SigAction::new(SigHandler::SigDfl, SaFlags::SA_RESTART, SigSet::empty());

    let mut last_error = None;
    for sig in CRASH_SIGNALS {
        // SAFETY: resets to SIG_DFL, which is always a valid disposition.
        if let Err(errno) = unsafe { signal::sigaction(sig, &sig_action) } {
            last_error = Some(errno);
        }
    }
    match last_error {
        None => Ok(()),
        Some(errno) => Err(errno.into()),
    }
}

/// Re-delivers `info`'s signal to the current thread, but only when it is
/// SIGABRT or was sent from user space (`si_code <= 0`, the `SI_FROMUSER`
/// test). Hardware faults raised by the kernel are synchronous to the
/// faulting instruction; re-queueing those through a generic signal-queue
/// syscall would not reproduce the original fault, so they are a successful
/// no-op here.
///
/// Goes through `rt_tgsigqueueinfo` directly: at crash time the libc wrapper
/// surface is off-limits, and the raw syscall works even then. When the
/// signal is actually queued, control typically never returns to the caller.
pub fn requeue_signal(info: &libc::siginfo_t) -> Result<(), SignalError> {
    if info.si_signo != libc::SIGABRT && info.si_code > 0 {
        return Ok(());
    }
    // SAFETY: targets our own pid/tid with a live siginfo_t.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_rt_tgsigqueueinfo,
            libc::getpid() as libc::c_long,
            libc::syscall(libc::SYS_gettid),
            info.si_signo as libc::c_long,
            info as *const libc::siginfo_t,
        )
    };
    if rc != 0 {
        return Err(Errno::last().into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_table_covers_the_monitored_set() {
        assert_eq!(CRASH_SIGNALS.len(), 8);
        for sig in CRASH_SIGNALS {
            assert_eq!(CRASH_SIGNALS.iter().filter(|s| **s == sig).count(), 1);
        }
        assert!(CRASH_SIGNALS.contains(&Signal::SIGSEGV));
        assert!(CRASH_SIGNALS.contains(&Signal::SIGSTKFLT));
        assert!(!CRASH_SIGNALS.contains(&Signal::SIGQUIT));
    }

    #[test]
    fn test_requeue_ignores_kernel_raised_faults() {
        // A kernel-origin SIGSEGV (si_code SEGV_MAPERR) must not be
        // forwarded, so this is safe to call with no handler installed.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        info.si_signo = libc::SIGSEGV;
        info.si_code = 1; // SEGV_MAPERR
        requeue_signal(&info).unwrap();
    }
}
