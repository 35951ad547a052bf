//! Shared test utilities for mailsweep integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against a temporary SQLite file, or
//!   against PostgreSQL when `MAILSWEEP_TEST_DATABASE_URL` is set
//! - `contract`, the behaviour every job store backend must show

pub mod contract;
pub mod harness;

pub use harness::{postgres_url, TestHarness};
