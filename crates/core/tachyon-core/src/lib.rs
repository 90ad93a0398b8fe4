//! Lock-free substrate for the tachyon runtime.
//!
//! This crate contains the allocation-light concurrency building blocks the
//! runtime crate is assembled from: bit math, an atomic readiness bitmap,
//! and a bitmap-indexed object pool. None of these types know anything
//! about tasks or executors, which keeps them testable in isolation with
//! `cargo test`, loom, and miri.

pub mod bitmap;
pub mod bits;
pub mod pool;

pub(crate) mod loom_compat;

pub use bitmap::AtomicBitmap;
pub use pool::{ObjectPool, PoolFull, PoolRef};
