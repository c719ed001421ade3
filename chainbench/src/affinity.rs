/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! One-shot CPU core pinning.

use std::io;
use std::mem;

use tracing::info;

/// Number of CPUs a `cpu_set_t` can describe.
pub const MAX_CORES: usize = libc::CPU_SETSIZE as usize;

/// Restrict the calling thread (and threads it spawns later) to `core`.
pub fn pin_to_core(core: usize) -> io::Result<()> {
    if core >= MAX_CORES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("core {core} exceeds the {MAX_CORES}-entry CPU set"),
        ));
    }
    // SAFETY: `set` is a plain bitmask initialised by CPU_ZERO before use;
    // the size passed matches its type.
    let ret = unsafe {
        let mut set: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    info!(core, "pinned to CPU core");
    Ok(())
}
