//! Test infrastructure for the mapping layer.
//!
//! This module provides entity fixtures, manager constructors and a store
//! wrapper that injects failures and delays.

#![allow(dead_code)]

pub mod fixtures;
pub mod stores;

// Re-export commonly used items
pub use fixtures::*;
pub use stores::*;
