//! Deterministic, pure logic shared by the fix pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod context;
pub mod decision;
pub mod failure_scan;
pub mod lifecycle;
pub mod pr_body;
pub mod repo_ref;
pub mod response;
pub mod types;
