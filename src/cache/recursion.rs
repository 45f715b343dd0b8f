//! Recursion tracking for nested render passes.
//!
//! Uses `tokio::task_local!` so the level belongs to the logical call chain
//! instead of the process: a render pass awaited from inside a renderer sees the
//! outer level, while a spawned task starts again from zero.

use std::cell::Cell;
use std::future::Future;

tokio::task_local! {
    static LEVEL: Cell<usize>;
}

/// Current nesting level of cache-aware render passes in this task.
///
/// Returns zero outside of any [`scope`].
pub fn level() -> usize {
    LEVEL.try_with(Cell::get).unwrap_or(0)
}

/// Whether a render pass is already active in this task.
pub fn is_recursive() -> bool {
    level() > 0
}

/// Increase the level until the returned guard is dropped.
///
/// Outside of a [`scope`] there is no counter to update and the guard is inert.
pub fn enter() -> RecursionGuard {
    let active = LEVEL.try_with(|level| level.set(level.get() + 1)).is_ok();
    RecursionGuard { active }
}

/// Run `future` with a recursion counter available.
///
/// Reuses the counter of an enclosing scope so nested passes accumulate.
pub async fn scope<F>(future: F) -> F::Output
where
    F: Future,
{
    if LEVEL.try_with(|_| ()).is_ok() {
        future.await
    } else {
        LEVEL.scope(Cell::new(0), future).await
    }
}

/// Scoped increment of the recursion level; the matching decrement runs on
/// drop, including unwinding and early returns.
#[must_use = "the recursion level drops back as soon as the guard is dropped"]
pub struct RecursionGuard {
    active: bool,
}

impl Drop for RecursionGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = LEVEL.try_with(|level| level.set(level.get().saturating_sub(1)));
        }
    }
}
