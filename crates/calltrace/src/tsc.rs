//! Hardware cycle counter used to bound call durations.

/// A source of cycle timestamps.
///
/// Sessions hold one of these so the counter can be swapped out,
/// which keeps emitted documents deterministic under test.
pub type Clock = fn() -> u64;

/// Reads the free-running cycle counter of the current CPU.
///
/// Returns 0 on targets without a counter we can read from user space.
/// Never blocks and never fails.
#[inline]
pub fn now() -> u64 {
    imp::read()
}

#[cfg(target_arch = "x86_64")]
mod imp {
    #[inline]
    pub fn read() -> u64 {
        // SAFETY: `rdtsc` is available on every x86_64 CPU and has no side effects.
        unsafe { core::arch::x86_64::_rdtsc() }
    }
}

#[cfg(target_arch = "x86")]
mod imp {
    #[inline]
    pub fn read() -> u64 {
        // SAFETY: `rdtsc` has no side effects.
        unsafe { core::arch::x86::_rdtsc() }
    }
}

#[cfg(target_arch = "aarch64")]
mod imp {
    #[inline]
    pub fn read() -> u64 {
        let cnt: u64;
        // SAFETY: cntvct_el0 is readable from EL0 on all supported operating systems.
        unsafe {
            core::arch::asm!("mrs {}, cntvct_el0", out(reg) cnt, options(nomem, nostack));
        }
        cnt
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
mod imp {
    #[inline]
    pub fn read() -> u64 {
        0
    }
}
