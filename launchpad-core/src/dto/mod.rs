//! Data Transfer Objects
//!
//! DTOs exchanged between the agent, its clients and the upstream launch
//! queue. Domain records are sent as-is; these types cover requests,
//! acknowledgements and lightweight summaries.

pub mod agent;
pub mod job;
pub mod queue;
