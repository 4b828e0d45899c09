pub mod registry;

pub use registry::{upsert, Agent, AgentDetails};
