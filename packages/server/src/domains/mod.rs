pub mod agents;
pub mod commitments;
pub mod contracts;
pub mod jobs;
