pub mod contract;
pub mod engine;

pub use contract::{Contract, Outcome};
pub use engine::{ContractView, WorkFilter, WorkResult};
