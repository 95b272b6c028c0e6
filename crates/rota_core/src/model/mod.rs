//! Rotation domain model.
//!
//! # Responsibility
//! - Define the single aggregate persisted by local and remote stores.
//! - Keep every mutation synchronous and free of I/O.
//!
//! # Invariants
//! - The aggregate is replaced wholesale on reset or remote adoption, never
//!   merged field by field.

pub mod rotation;
