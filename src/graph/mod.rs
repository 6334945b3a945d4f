pub mod analysis;
pub mod builder;
pub mod error;
pub mod readiness;
pub mod traversal;

pub use builder::{DependencyGraph, GraphNode, build};
pub use error::GraphError;
pub use readiness::Readiness;
