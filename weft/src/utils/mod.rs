//! Utilities for memory-efficient data structures.
//!
//! This module provides low-level utilities used internally by the runtime.
//! In particular, it exposes a generational [`Slab`] used as the arena
//! backing run-queue carts, so that stale handles are detected instead of
//! aliasing a reused slot.

mod slab;

pub(crate) use slab::{Key, Slab};
