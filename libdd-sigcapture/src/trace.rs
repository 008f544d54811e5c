// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::{SignalError, SignalHandler};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};

const TRACE_SIGNAL: Signal = Signal::SIGQUIT;

// Everything needed to make trace registration fully reversible: both the
// thread mask and the disposition as they were before `register_trace_handler`.
#[derive(Clone, Copy)]
struct TraceState {
    prev_mask: SigSet,
    prev_action: SigAction,
}

static mut TRACE_STATE: Option<TraceState> = None;

/// Registers `handler` for SIGQUIT, the on-demand trace signal, and unblocks
/// it for the calling thread. No alternate stack is involved: the trace path
/// is not expected to run under stack exhaustion.
///
/// PRECONDITIONS:
///     `handler` is async-signal-safe (see the crate docs). The caller should
///     be the main thread, where diagnostic signals are conventionally
///     delivered; this is expected, not enforced.
/// SAFETY:
///     Must be serialized with `unregister_trace_handler` by the caller.
/// ATOMICITY:
///     A failed registration leaves no state behind: if the sigaction call
///     fails the previously-saved mask is restored before the error is
///     returned.
pub fn register_trace_handler(handler: SignalHandler) -> Result<(), SignalError> {
    let mut unblock = SigSet::empty();
    unblock.add(TRACE_SIGNAL);
    let mut prev_mask = SigSet::empty();
    signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&unblock), Some(&mut prev_mask))?;

    let sig_action = SigAction::new(
        SigHandler::SigAction(handler),
        SaFlags::SA_RESTART | SaFlags::SA_SIGINFO,
        SigSet::all(),
    );
    // SAFETY: `handler` is async-signal-safe per the caller contract.
    let prev_action = match unsafe { signal::sigaction(TRACE_SIGNAL, &sig_action) } {
        Ok(action) => action,
        Err(errno) => {
            let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&prev_mask), None);
            return Err(errno.into());
        }
    };

    unsafe { TRACE_STATE = Some(TraceState { prev_mask, prev_action }) };
    Ok(())
}

/// Restores the signal mask saved by [`register_trace_handler`], then the
/// saved SIGQUIT disposition, in that order. Best-effort: this runs on
/// teardown paths where a failure has no safe recovery action, so nothing is
/// returned. No-op if the trace handler was never registered.
pub fn unregister_trace_handler() {
    let Some(state) = (unsafe { TRACE_STATE }) else {
        return;
    };
    unsafe { TRACE_STATE = None };

    let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&state.prev_mask), None);
    // SAFETY: `prev_action` came out of a previous sigaction call.
    let _ = unsafe { signal::sigaction(TRACE_SIGNAL, &state.prev_action) };
}
