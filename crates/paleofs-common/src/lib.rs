//! Allocation and usage bookkeeping shared across every paleofs engine.
//!
//! Nothing in this crate knows about a particular on-disk layout; it models
//! the abstract notions of "this alloc-unit is free/used" ([`alloc`]) and
//! "this alloc-unit belongs to this file" ([`usage`]) that `spec.md` §4.2–4.3
//! describe, plus the character-set folding an engine needs to compare
//! catalog names (`charset`).

pub mod alloc;
pub mod charset;
pub mod owner;
pub mod usage;

pub use alloc::{AllocError, AllocMap};
pub use owner::{FileId, Owner};
pub use usage::{Conflict, SetOwnerOutcome, UsageReport, VolumeUsage};
