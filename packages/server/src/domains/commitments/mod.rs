pub mod commitment;
pub mod reaper;

pub use commitment::{heartbeat, Commitment, HeartbeatInstruction, HeartbeatReply};
