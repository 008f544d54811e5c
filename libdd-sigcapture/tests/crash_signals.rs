// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery coverage and disposition round-trip for the crash controller.
//! Everything lives in one test: signal dispositions are process-global, and
//! the harness runs sibling tests on concurrent threads.

use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize};

use libdd_sigcapture::{
    ignore_crash_signals, register_crash_handler, unregister_crash_handler, CRASH_SIGNALS,
};

static HITS: AtomicUsize = AtomicUsize::new(0);
static LAST_SIGNUM: AtomicI32 = AtomicI32::new(0);
static ON_ALT_STACK: AtomicBool = AtomicBool::new(true);

extern "C" fn counting_handler(
    signum: libc::c_int,
    _info: *mut libc::siginfo_t,
    _ucontext: *mut libc::c_void,
) {
    HITS.fetch_add(1, SeqCst);
    LAST_SIGNUM.store(signum, SeqCst);

    // sigaltstack is async-signal-safe; SS_ONSTACK tells us whether this very
    // invocation is running on the alternate stack.
    let mut current = MaybeUninit::<libc::stack_t>::uninit();
    if unsafe { libc::sigaltstack(ptr::null(), current.as_mut_ptr()) } != 0
        || unsafe { current.assume_init() }.ss_flags & libc::SS_ONSTACK == 0
    {
        ON_ALT_STACK.store(false, SeqCst);
    }
}

// glibc's sigaction ORs SA_RESTORER into sa_flags on every install, so a
// restored disposition can differ from its pre-registration snapshot in that
// bit alone. Strip it before comparing.
const SA_RESTORER: libc::c_int = 0x0400_0000;

fn flags_without_restorer(act: &libc::sigaction) -> libc::c_int {
    act.sa_flags & !SA_RESTORER
}

fn query_disposition(signum: libc::c_int) -> libc::sigaction {
    let mut old = MaybeUninit::<libc::sigaction>::uninit();
    assert_eq!(
        unsafe { libc::sigaction(signum, ptr::null(), old.as_mut_ptr()) },
        0
    );
    unsafe { old.assume_init() }
}

#[test]
fn delivery_restore_and_ignore() {
    let before: Vec<libc::sigaction> = CRASH_SIGNALS
        .iter()
        .map(|sig| query_disposition(*sig as i32))
        .collect();

    register_crash_handler(counting_handler).unwrap();

    // Every monitored signal reaches the handler exactly once per send, with
    // the right signal number, on the alternate stack.
    for sig in CRASH_SIGNALS {
        let seen = HITS.load(SeqCst);
        assert_eq!(unsafe { libc::raise(sig as i32) }, 0);
        assert_eq!(HITS.load(SeqCst), seen + 1, "{sig:?} not delivered exactly once");
        assert_eq!(LAST_SIGNUM.load(SeqCst), sig as i32, "wrong signum for {sig:?}");
    }
    assert_eq!(HITS.load(SeqCst), CRASH_SIGNALS.len());
    assert!(ON_ALT_STACK.load(SeqCst), "a handler ran off the alternate stack");

    // Unregister restores each signal to its pre-registration disposition.
    unregister_crash_handler().unwrap();
    for (sig, saved) in CRASH_SIGNALS.iter().zip(&before) {
        let after = query_disposition(*sig as i32);
        assert_eq!(
            saved.sa_sigaction, after.sa_sigaction,
            "{sig:?} disposition not restored"
        );
        assert_eq!(
            flags_without_restorer(saved),
            flags_without_restorer(&after),
            "{sig:?} flags not restored"
        );
    }

    // A second unregister has nothing left to restore and reports success.
    unregister_crash_handler().unwrap();

    // Ignore forces SIG_DFL on the whole set, independent of saved state.
    register_crash_handler(counting_handler).unwrap();
    ignore_crash_signals().unwrap();
    for sig in CRASH_SIGNALS {
        let current = query_disposition(sig as i32);
        assert_eq!(
            current.sa_sigaction,
            libc::SIG_DFL,
            "{sig:?} not reset to default"
        );
    }

    // The saved table still holds the pre-registration dispositions, so
    // unregister recovers them even after ignore.
    unregister_crash_handler().unwrap();
    for (sig, saved) in CRASH_SIGNALS.iter().zip(&before) {
        let after = query_disposition(*sig as i32);
        assert_eq!(
            saved.sa_sigaction, after.sa_sigaction,
            "{sig:?} disposition not recovered after ignore"
        );
    }
}
