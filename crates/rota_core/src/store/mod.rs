//! Persistence adapters.
//!
//! # Responsibility
//! - `local`: synchronous durable key-value storage, the durability backstop.
//! - `remote`: optional shared document store contract and handles.
//! - `memory_remote`, `dir_remote`: concrete remote backends.

pub mod dir_remote;
pub mod local;
pub mod memory_remote;
pub mod remote;
