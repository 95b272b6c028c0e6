//! Local/remote synchronization.
//!
//! # Responsibility
//! - Own the single in-memory `RotationState`.
//! - Persist every mutation locally and, when attached, remotely.
//! - Apply remote change notifications with last-write-wins semantics.
//!
//! # Invariants
//! - Local writes are always attempted; remote failures never revert them.
//! - An incoming snapshot equal to the current state is a no-op.

pub mod coordinator;
pub mod status;
