pub mod fallback;
pub mod hybrid_retriever;

pub use fallback::AdaptiveFallbackRetriever;
pub use hybrid_retriever::{HybridRetriever, HybridRetrieverConfig, Thresholds};
