//! Built-in plugins.

pub mod auto_task;
pub mod generators;
pub mod lanes;
pub mod message_policy;
pub mod proof;

pub use auto_task::AutoTaskPlugin;
pub use generators::{GeneratedTaskSpec, GeneratorInput, GeneratorRegistry};
pub use lanes::LanePlugin;
pub use message_policy::{default_policies, MessagePolicyPlugin};
pub use proof::ProofPlugin;
