//! `lockstep-graph` — resolves job and group names into execution plans.
//!
//! [`GraphBuilder`] walks the configured [`JobNode`] tree from a root name,
//! applying group-scoped overrides, and produces a [`Digraph`] of
//! deduplicated [`JobRef`]s whose topological layers are the plan.

pub mod builder;
pub mod digraph;
pub mod error;
pub mod node;

pub use builder::{GraphBuilder, JobRef};
pub use digraph::Digraph;
pub use error::{GraphError, Result};
pub use node::{nodes_from_config, GroupNode, JobNode, SingleJobNode};
