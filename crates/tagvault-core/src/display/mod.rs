//! Tag display: sibling and parent edges, the resolved display graph and
//! the per-service graph cache.

pub mod edges;
pub mod graph;
pub mod resolver;

pub use edges::{EdgeAction, EdgeChange, EdgeKind, EdgeStore};
pub use graph::TagDisplayGraph;
pub use resolver::{load_graph, DisplayGraphs};
