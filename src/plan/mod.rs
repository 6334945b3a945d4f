pub mod loader;
pub mod registry;
pub mod types;

use thiserror::Error;

use crate::node::NodeSpec;
use crate::node::behavior::Operations;
use crate::plan::registry::BehaviorRegistry;
use crate::plan::types::RunSpec;

pub use loader::{load, parse};

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid run spec in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("node '{node}' refers to unknown behavior '{behavior}'")]
    UnknownBehavior { node: String, behavior: String },
}

impl RunSpec {
    /// Resolve declared nodes against `registry` into schedulable nodes.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UnknownBehavior`] for a behavior name the
    /// registry does not know.
    pub fn into_nodes(self, registry: &BehaviorRegistry) -> Result<Vec<NodeSpec>, PlanError> {
        self.nodes
            .into_iter()
            .map(|decl| -> Result<NodeSpec, PlanError> {
                let operations = match &decl.behavior {
                    None => Operations::new(),
                    Some(name) => registry.get(name).cloned().ok_or_else(|| {
                        PlanError::UnknownBehavior {
                            node: decl.id.clone(),
                            behavior: name.clone(),
                        }
                    })?,
                };
                let mut node = NodeSpec::new(decl.id, decl.kind).with_operations(operations);
                node.description = decl.describe;
                node.uses = decl.uses;
                node.depends = decl.depends;
                node.only_after = decl.only_after;
                Ok(node)
            })
            .collect()
    }
}
