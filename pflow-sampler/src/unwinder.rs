//! Pluggable stack-capture strategy (spec §4.3: "unwind the current call
//! stack into a bounded buffer"). The sampler itself only knows how to
//! arm/disarm a timer and route a signal into the handler contract; how
//! addresses are actually collected is delegated here so platform-specific
//! unwinding (frame-pointer walking, `.eh_frame`/CFI, vDSO fallbacks) can
//! be swapped in without touching the signal plumbing.

/// Implementations are called only from inside the signal handler and so
/// are held to the same async-signal-safety contract as the handler
/// itself: no allocation, no locks that might be held outside a handler,
/// no blocking syscalls. `capture` must finish in bounded time.
///
/// # Safety
/// Implementors must guarantee `capture` is safe to call from a signal
/// handler on the thread that was interrupted.
pub unsafe trait StackUnwinder: Send + Sync {
    /// Writes raw return addresses into `out`, innermost frame first, and
    /// returns how many were written. Must never write past `out.len()`.
    fn capture(&self, out: &mut [u64]) -> usize;
}

/// An unwinder that always reports an empty stack. Useful for exercising
/// the sampler's timer/signal/refresh plumbing independently of a real
/// unwinding backend, and as the default until a platform-specific
/// implementation is wired in.
pub struct NullUnwinder;

unsafe impl StackUnwinder for NullUnwinder {
    fn capture(&self, _out: &mut [u64]) -> usize {
        0
    }
}

/// Frame-pointer-chain unwinder: walks `rbp`/`x29` linkage starting from a
/// caller-supplied current frame pointer. This is the traditional
/// signal-safe technique used when code is compiled with frame pointers
/// preserved; it performs no allocation and touches only stack/register
/// state, so it satisfies [`StackUnwinder`]'s contract as long as the
/// chain itself stays within mapped, readable memory.
///
/// # Safety
/// The caller must ensure the frame-pointer chain starting at
/// `starting_fp` is valid (i.e. the binary was built preserving frame
/// pointers); a corrupt chain can cause an out-of-bounds read. Because
/// dereferencing arbitrary addresses is exactly what makes this unsafe, it
/// is deliberately not exposed as a safe constructor.
pub struct FramePointerUnwinder {
    starting_fp: std::sync::atomic::AtomicU64,
}

impl FramePointerUnwinder {
    pub fn new() -> Self {
        Self { starting_fp: std::sync::atomic::AtomicU64::new(0) }
    }

    /// Updates the frame pointer to resume walking from, read with
    /// `Relaxed` ordering by `capture` on the sampled thread itself — there
    /// is no cross-thread handoff, since the handler always runs on the
    /// thread it interrupted.
    pub fn set_current_fp(&self, fp: u64) {
        self.starting_fp.store(fp, std::sync::atomic::Ordering::Relaxed);
    }
}

impl Default for FramePointerUnwinder {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl StackUnwinder for FramePointerUnwinder {
    fn capture(&self, out: &mut [u64]) -> usize {
        let mut fp = self.starting_fp.load(std::sync::atomic::Ordering::Relaxed);
        let mut written = 0;
        while fp != 0 && written < out.len() {
            // Standard frame-pointer layout: [fp] = saved fp, [fp+8] =
            // return address (x86_64/AArch64 LP64 convention).
            let saved_fp_ptr = fp as *const u64;
            let return_addr_ptr = (fp + 8) as *const u64;
            if saved_fp_ptr.is_null() {
                break;
            }
            let return_addr = unsafe { std::ptr::read_volatile(return_addr_ptr) };
            if return_addr == 0 {
                break;
            }
            out[written] = return_addr;
            written += 1;
            let next_fp = unsafe { std::ptr::read_volatile(saved_fp_ptr) };
            if next_fp <= fp {
                // Guards against cycles/corruption: a well-formed stack
                // always grows downward in address terms when walking
                // toward the caller on these platforms.
                break;
            }
            fp = next_fp;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_unwinder_always_reports_empty() {
        let u = NullUnwinder;
        let mut buf = [0u64; 8];
        assert_eq!(u.capture(&mut buf), 0);
    }

    #[test]
    fn frame_pointer_unwinder_stops_at_zero_fp() {
        let u = FramePointerUnwinder::new();
        u.set_current_fp(0);
        let mut buf = [0u64; 8];
        assert_eq!(u.capture(&mut buf), 0);
    }
}
