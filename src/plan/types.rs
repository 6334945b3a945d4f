use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::node::NodeKind;
use crate::runner::RunConfig;

/// A run specification as read from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigSpec>,
    #[serde(default)]
    pub nodes: Vec<NodeDecl>,
}

/// Optional timeout overrides, in seconds. Zero disables a timeout.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_timeout_secs: Option<u64>,
}

impl ConfigSpec {
    /// Overlay these settings on [`RunConfig::default`].
    pub fn to_run_config(&self) -> RunConfig {
        let timeout = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        let defaults = RunConfig::default();
        RunConfig {
            test_timeout: self
                .test_timeout_secs
                .map_or(defaults.test_timeout, timeout),
            suite_timeout: self
                .suite_timeout_secs
                .map_or(defaults.suite_timeout, timeout),
            drain_timeout: self
                .drain_timeout_secs
                .map_or(defaults.drain_timeout, Duration::from_secs),
        }
    }
}

/// One declared node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeDecl {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub describe: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(default, alias = "onlyAfter", skip_serializing_if = "Vec::is_empty")]
    pub only_after: Vec<String>,
    /// Name of a registered behavior. Absent means no-op operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<String>,
}

impl RunSpec {
    /// Effective run configuration: defaults overlaid with the `config` section.
    pub fn run_config(&self) -> RunConfig {
        self.config
            .as_ref()
            .map(ConfigSpec::to_run_config)
            .unwrap_or_default()
    }
}
