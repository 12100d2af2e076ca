//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! plan trees and return deterministic outputs suitable for tests.

pub mod bindings;
pub mod contract;
pub mod invariants;
pub mod path;
pub mod selector;
pub mod state_update;
pub mod types;
