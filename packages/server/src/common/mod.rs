pub mod hash;
pub mod id;
pub mod pagination;

pub use hash::request_hash;
pub use id::{AgentId, CommitmentId, ContractId, JobId};
