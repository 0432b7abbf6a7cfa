//! Core domain types
//!
//! This module contains the core domain structures used across Launchpad crates.
//! The agent owns and mutates job records; clients only ever see snapshots.

pub mod job;
pub mod launch;
pub mod run;
