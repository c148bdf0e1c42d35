pub mod engine;

pub use engine::{Engine, Node, NodeId, NodeState};
