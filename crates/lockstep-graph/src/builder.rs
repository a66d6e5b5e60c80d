//! Expands a root job or group name into a `Digraph<JobRef>`.
//!
//! Edges point from a dependency to its dependent, so `top_sort` yields
//! layers in execution order. Groups are flattened: their children attach to
//! whatever depends on the group, and the group's entries become the
//! override scope for every name resolved beneath it (nearest scope wins).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

use lockstep_core::{JobMetadata, JobParams};
use tracing::debug;

use crate::digraph::Digraph;
use crate::error::{GraphError, Result};
use crate::node::{GroupNode, JobNode, SingleJobNode};

/// A resolved execution unit. Identity is the job name: within one build a
/// job reached from several dependents collapses into a single `JobRef`.
#[derive(Debug, Clone)]
pub struct JobRef {
    name: String,
    params: JobParams,
}

impl JobRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }
}

impl PartialEq for JobRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for JobRef {}

impl Hash for JobRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Immutable resolver over the configured node tree and the registered jobs.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    nodes: BTreeMap<String, JobNode>,
    metadata: HashMap<String, JobMetadata>,
}

impl GraphBuilder {
    pub fn new(
        nodes: BTreeMap<String, JobNode>,
        metadata: impl IntoIterator<Item = JobMetadata>,
    ) -> Self {
        Self {
            nodes,
            metadata: metadata
                .into_iter()
                .map(|m| (m.name().to_string(), m))
                .collect(),
        }
    }

    /// Whether `name` is a configured node or a registered job.
    pub fn knows(&self, name: &str) -> bool {
        self.nodes.contains_key(name) || self.metadata.contains_key(name)
    }

    pub fn is_group(&self, name: &str) -> bool {
        matches!(self.nodes.get(name), Some(JobNode::Group(_)))
    }

    pub fn metadata(&self, name: &str) -> Option<&JobMetadata> {
        self.metadata.get(name)
    }

    pub fn create_graph(&self, root: &str) -> Result<Digraph<JobRef>> {
        let mut resolution = Resolution {
            builder: self,
            graph: Digraph::new(),
            refs: HashMap::new(),
            path: Vec::new(),
        };
        resolution.visit(root, None, &[])?;
        debug!(
            root,
            jobs = resolution.graph.len(),
            edges = resolution.graph.edge_count(),
            "dependency graph built"
        );
        Ok(resolution.graph)
    }

    /// Layers of `root`'s graph in execution order, dependencies first.
    ///
    /// The topological sort is the authoritative cycle check; the path check
    /// in [`create_graph`](Self::create_graph) only gives a readable chain.
    pub fn execution_plan(&self, root: &str) -> Result<Vec<Vec<JobRef>>> {
        self.create_graph(root)?
            .top_sort()
            .ok_or_else(|| GraphError::CycleDetected {
                root: root.to_string(),
            })
    }
}

enum Resolved<'a> {
    Single(SingleJobNode),
    Group(&'a GroupNode),
}

type Scope<'a> = &'a BTreeMap<String, JobNode>;

/// State of one `create_graph` call.
struct Resolution<'a> {
    builder: &'a GraphBuilder,
    graph: Digraph<JobRef>,
    refs: HashMap<String, JobRef>,
    /// Names on the active descent path, pushed before and popped after
    /// each recursion so sibling branches never see each other.
    path: Vec<String>,
}

impl<'a> Resolution<'a> {
    fn visit(
        &mut self,
        name: &str,
        dependent: Option<&JobRef>,
        scopes: &[Scope<'a>],
    ) -> Result<()> {
        if self.path.iter().any(|n| n == name) {
            return Err(GraphError::Cycle {
                chain: self.chain_to(name),
            });
        }

        match self.resolve(name, scopes)? {
            Resolved::Group(group) => {
                let mut inner = scopes.to_vec();
                inner.push(group.children());
                self.path.push(name.to_string());
                for child in group.depends_on() {
                    self.visit(child, dependent, &inner)?;
                }
                self.path.pop();
            }
            Resolved::Single(node) => {
                let (job_ref, fresh) = match self.refs.get(name) {
                    Some(existing) => (existing.clone(), false),
                    None => (self.new_ref(name, &node)?, true),
                };
                if let Some(dependent) = dependent {
                    self.graph.add_edge(job_ref.clone(), dependent.clone());
                }
                if fresh {
                    self.path.push(name.to_string());
                    for dependency in node.depends_on() {
                        self.visit(dependency, Some(&job_ref), scopes)?;
                    }
                    self.path.pop();
                }
            }
        }
        Ok(())
    }

    fn new_ref(&mut self, name: &str, node: &SingleJobNode) -> Result<JobRef> {
        let metadata = self
            .builder
            .metadata
            .get(name)
            .ok_or_else(|| self.unknown(name))?;
        let params = metadata
            .resolve_params(node.params())
            .map_err(|source| GraphError::Params {
                job: name.to_string(),
                source,
            })?;
        let job_ref = JobRef {
            name: name.to_string(),
            params,
        };
        self.graph.add_vertex(job_ref.clone());
        self.refs.insert(name.to_string(), job_ref.clone());
        Ok(job_ref)
    }

    /// Find the definition of `name` and apply scope overrides, outermost
    /// scope first so the nearest enclosing group wins.
    fn resolve(&self, name: &str, scopes: &[Scope<'a>]) -> Result<Resolved<'a>> {
        let overrides: Vec<&'a JobNode> = scopes
            .iter()
            .copied()
            .filter_map(|s| s.get(name))
            .collect();

        match self.builder.nodes.get(name) {
            Some(JobNode::Group(group)) => {
                let overridden = overrides.iter().any(|o| match o {
                    JobNode::Single(s) => {
                        !s.params().is_empty()
                            || !s.depends_on().is_empty()
                            || s.force_no_dependencies()
                    }
                    JobNode::Group(_) => true,
                });
                if overridden {
                    return Err(GraphError::GroupOverride {
                        name: name.to_string(),
                    });
                }
                Ok(Resolved::Group(group))
            }
            Some(JobNode::Single(base)) => self.merge_overrides(name, base.clone(), &overrides),
            None if self.builder.metadata.contains_key(name) => {
                self.merge_overrides(name, SingleJobNode::default(), &overrides)
            }
            None => match overrides.last().copied() {
                // A group defined inline inside another group.
                Some(JobNode::Group(group)) => Ok(Resolved::Group(group)),
                _ => Err(self.unknown(name)),
            },
        }
    }

    fn merge_overrides(
        &self,
        name: &str,
        base: SingleJobNode,
        overrides: &[&'a JobNode],
    ) -> Result<Resolved<'a>> {
        overrides
            .iter()
            .try_fold(base, |acc, o| match o {
                JobNode::Single(s) => Ok(acc.merge(s)),
                JobNode::Group(_) => Err(GraphError::GroupOverride {
                    name: name.to_string(),
                }),
            })
            .map(Resolved::Single)
    }

    fn chain_to(&self, name: &str) -> String {
        let mut chain = self.path.clone();
        chain.push(name.to_string());
        chain.join(" -> ")
    }

    fn unknown(&self, name: &str) -> GraphError {
        let path = if self.path.is_empty() {
            "<root>".to_string()
        } else {
            self.path.join(" -> ")
        };
        GraphError::UnknownJob {
            name: name.to_string(),
            path,
        }
    }
}
