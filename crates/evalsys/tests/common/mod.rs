//! Shared test utilities for evalsys integration tests.
//!
//! This module provides:
//! - `TestHarness` with an in-memory database, a manual clock and settings
//! - Builders for evaluations and their groups
//! - Recording doubles for the transport, status sink and page pause

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
