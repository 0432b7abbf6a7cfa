//! Launchpad Core
//!
//! Core types shared by the launch agent, its HTTP client and the CLI.
//!
//! This crate contains:
//! - Domain types: launch specifications, job records and pipeline stages
//! - DTOs: Data transfer objects for the agent API and the upstream launch queue

pub mod domain;
pub mod dto;
