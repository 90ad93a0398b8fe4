//! Loom compatibility shim.
//!
//! When compiled with `cfg(loom)`, re-exports loom's concurrency primitives.
//! Otherwise, re-exports the standard `core::sync::atomic` types.
//!
//! This allows the bitmap and pool to be tested under loom's deterministic
//! scheduler without code changes.

// ---------------------------------------------------------------------------
// Loom mode
// ---------------------------------------------------------------------------

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Normal mode
// ---------------------------------------------------------------------------

#[cfg(not(loom))]
pub(crate) use core::sync::atomic::{AtomicU64, Ordering};
