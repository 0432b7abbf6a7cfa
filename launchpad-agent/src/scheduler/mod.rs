//! Scheduler layer for the agent
//!
//! Owns the launch queue and the slot pool, and drives every admitted job
//! through build, push, launch and run by dispatching adapter calls to
//! their own tasks.

pub mod agent;
pub mod ops;
pub mod settings;
pub mod sink;
pub mod slots;

pub use agent::{Agent, AgentHandle};
pub use settings::SchedulerSettings;
pub use sink::ChannelSink;
