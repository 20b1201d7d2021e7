//! Integration test utilities for the realtime messaging stack
//!
//! Runs real clients against an in-process broker and an in-memory
//! persistence fake, so end-to-end scenarios cover the same code paths
//! as production without sockets or a database.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
