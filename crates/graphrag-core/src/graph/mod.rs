pub mod builder;
pub mod knowledge_graph;
pub mod store;

pub use builder::GraphBuilder;
pub use knowledge_graph::KnowledgeGraph;
pub use store::{GraphQuery, GraphStore, KvGraphStore};

