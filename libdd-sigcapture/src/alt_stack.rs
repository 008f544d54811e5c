// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::SignalError;
use libc::{
    mmap, sigaltstack, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE,
};
use nix::errno::Errno;
use std::ptr;

/// Usable alternate-stack size: 128 KiB, sized for worst-case handler
/// execution. The default SIGSTKSZ (8 KiB on most Linux targets) is nowhere
/// near enough for real crash-collection handlers.
pub(crate) const SIGNAL_STACK_SIZE: usize = 128 * 1024;

/// Maps an anonymous read/write region of `len` bytes. MAP_ANON pages come
/// back zero-filled.
pub(crate) fn allocate(len: usize) -> Result<*mut libc::c_void, SignalError> {
    // SAFETY: anonymous private mapping; no preconditions.
    let stackp = unsafe {
        mmap(
            ptr::null_mut(),
            len,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANON,
            -1,
            0,
        )
    };
    if stackp == MAP_FAILED {
        return Err(SignalError::OutOfMemory);
    }
    Ok(stackp)
}

/// Allocates the alternate signal stack and installs it via `sigaltstack`,
/// with a guard page at the low end.
/// Inspired by <https://github.com/rust-lang/rust/pull/69969/files>
///
/// The mapping is never unmapped: once the kernel has accepted it, it belongs
/// to the signal-delivery machinery until process exit, and crash handling
/// must stay valid that long.
pub(crate) fn install() -> Result<(), SignalError> {
    let page_size = page_size::get();
    let stackp = allocate(SIGNAL_STACK_SIZE + page_size)?;

    // SAFETY: `stackp` is a fresh mapping at least one page long.
    if unsafe { libc::mprotect(stackp, page_size, PROT_NONE) } != 0 {
        return Err(Errno::last().into());
    }

    let stack = libc::stack_t {
        // SAFETY: the mapping extends SIGNAL_STACK_SIZE bytes past the guard
        // page.
        ss_sp: unsafe { stackp.add(page_size) },
        ss_flags: 0,
        ss_size: SIGNAL_STACK_SIZE,
    };
    // SAFETY: `stack` describes live writable memory that stays mapped for
    // the rest of the process.
    if unsafe { sigaltstack(&stack, ptr::null_mut()) } != 0 {
        return Err(Errno::last().into());
    }
    Ok(())
}
