//! Stack growth for the recursive passes.
//!
//! The parser, scanner, printer and interpreter recurse once per nesting level. Each
//! recursive step goes through [`ensure_sufficient_stack`], which switches to a fresh
//! segment when the current one runs low, so the nesting and call-depth limits are the
//! only bound on depth.

/// Grows the stack before running `f` when less than the red zone remains.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    /// Minimum stack space to keep available.
    const RED_ZONE: usize = 128 * 1024;

    /// Size of each new stack segment.
    const STACK_PER_RECURSION: usize = 1024 * 1024;

    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// WASM manages its own stack.
#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(n: u32) -> u32 {
        ensure_sufficient_stack(|| {
            let pad = std::hint::black_box([0u8; 512]);
            if n == 0 {
                u32::from(pad[0])
            } else {
                depth(n - 1) + 1
            }
        })
    }

    #[test]
    fn deep_recursion_does_not_overflow() {
        assert_eq!(depth(50_000), 50_000);
    }
}
