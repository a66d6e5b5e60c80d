//! Configuration-level job model: standalone jobs and named groups, before
//! any name resolution happens.

use std::collections::BTreeMap;

use lockstep_core::config::{JobNodeConfig, NodeType};
use tracing::warn;

/// A standalone job entry, or a group's override of one.
///
/// Invariant: `force_no_dependencies` implies `depends_on` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SingleJobNode {
    params: BTreeMap<String, String>,
    depends_on: Vec<String>,
    force_no_dependencies: bool,
}

impl SingleJobNode {
    /// `depends_on: None` inherits dependencies on merge, `Some(vec![])`
    /// clears them. Duplicate names are dropped, first occurrence kept.
    pub fn new(params: BTreeMap<String, String>, depends_on: Option<Vec<String>>) -> Self {
        let force_no_dependencies = matches!(&depends_on, Some(d) if d.is_empty());
        let mut unique: Vec<String> = Vec::new();
        for name in depends_on.unwrap_or_default() {
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        Self {
            params,
            depends_on: unique,
            force_no_dependencies,
        }
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn force_no_dependencies(&self) -> bool {
        self.force_no_dependencies
    }

    /// Overlay `overriding` on `self`.
    ///
    /// Params are a shallow union, `overriding` wins per key. Dependencies
    /// come from `overriding` when it lists any or explicitly cleared them,
    /// otherwise from `self`.
    pub fn merge(&self, overriding: &SingleJobNode) -> SingleJobNode {
        let mut params = self.params.clone();
        params.extend(
            overriding
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let replace = overriding.force_no_dependencies || !overriding.depends_on.is_empty();
        let (depends_on, force_no_dependencies) = if replace {
            (
                overriding.depends_on.clone(),
                overriding.force_no_dependencies,
            )
        } else {
            (self.depends_on.clone(), self.force_no_dependencies)
        };

        SingleJobNode {
            params,
            depends_on,
            force_no_dependencies,
        }
    }
}

/// A named collection of jobs and nested groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupNode {
    name: String,
    children: BTreeMap<String, JobNode>,
}

impl GroupNode {
    pub fn new(name: impl Into<String>, children: BTreeMap<String, JobNode>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &BTreeMap<String, JobNode> {
        &self.children
    }

    /// As seen by an enclosing scope, a group depends on all its children.
    pub fn depends_on(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobNode {
    Single(SingleJobNode),
    Group(GroupNode),
}

impl JobNode {
    pub fn from_config(name: &str, config: &JobNodeConfig) -> JobNode {
        match config.node_type {
            NodeType::Job => {
                if !config.jobs.is_empty() {
                    warn!(node = name, "`jobs` ignored on a non-group node");
                }
                JobNode::Single(SingleJobNode::new(
                    config.params.clone(),
                    config.depends_on.clone(),
                ))
            }
            NodeType::Group => {
                if !config.params.is_empty() || config.depends_on.is_some() {
                    warn!(group = name, "`params` and `depends_on` ignored on a group node");
                }
                JobNode::Group(GroupNode::new(name, nodes_from_config(&config.jobs)))
            }
        }
    }
}

/// Convert a config table of job/group entries into the node model.
pub fn nodes_from_config(jobs: &BTreeMap<String, JobNodeConfig>) -> BTreeMap<String, JobNode> {
    jobs.iter()
        .map(|(name, cfg)| (name.clone(), JobNode::from_config(name, cfg)))
        .collect()
}
