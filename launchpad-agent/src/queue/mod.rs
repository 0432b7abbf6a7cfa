//! Upstream launch queue
//!
//! When the agent is configured with a base URL it pulls launch requests
//! from the project's queue, feeds them to the scheduler and reports their
//! results back.

mod poller;

pub use poller::{QueuePoller, QueueSettings};
