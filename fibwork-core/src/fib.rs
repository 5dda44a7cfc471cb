//! The Fibonacci function computed by the worker.
//!
//! The sequence is seeded with `fib(0) = fib(1) = 1`, one position ahead of
//! the textbook sequence. Stored results depend on this, so it must not be
//! "corrected".

use crate::error::FibError;
use crate::index::Index;

/// Compute the value for `index` iteratively in constant space.
///
/// # Errors
/// Returns [`FibError::Overflow`] if the value does not fit in a `u64`. A
/// policy-checked [`Index`] never triggers this.
pub fn fib(index: Index) -> Result<u64, FibError> {
    let n = index.get();
    if n < 2 {
        return Ok(1);
    }

    let (mut a, mut b) = (1u64, 1u64);
    for _ in 2..=n {
        let next = a.checked_add(b).ok_or(FibError::Overflow { index: n })?;
        a = b;
        b = next;
    }
    Ok(b)
}
