use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{GraphRagError, Result};

/// Unified embedding provider. A concrete binding (local model, HTTP
/// vendor API, ...) implements this; the HTTP client itself is out of
/// scope for this crate.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;

    /// Whether a just-seen failure is transient (worth falling through to
    /// the next provider) or permanent (worth surfacing immediately).
    fn is_transient(&self, _error: &GraphRagError) -> bool {
        true
    }
}

/// Routes embedding requests to an ordered list of providers, falling
/// through to the next on a transient failure. All providers must agree
/// on dimension; checked once at construction.
pub struct EmbeddingRouter {
    providers: Vec<Box<dyn EmbeddingModel>>,
    dimension: usize,
    cached_dimension: Mutex<Option<usize>>,
}

impl EmbeddingRouter {
    pub fn new(providers: Vec<Box<dyn EmbeddingModel>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(GraphRagError::ConfigInvalid(
                "embedding router requires at least one provider".into(),
            ));
        }
        let dimension = providers[0].dimension();
        for (idx, provider) in providers.iter().enumerate().skip(1) {
            if provider.dimension() != dimension {
                return Err(GraphRagError::ConfigInvalid(format!(
                    "embedding provider {idx} reports dimension {} but provider 0 reports {dimension}",
                    provider.dimension()
                )));
            }
        }
        Ok(Self {
            providers,
            dimension,
            cached_dimension: Mutex::new(None),
        })
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut last_err = None;
        for (idx, provider) in self.providers.iter().enumerate() {
            match provider.embed_one(text).await {
                Ok(vector) => {
                    *self.cached_dimension.lock() = Some(provider.dimension());
                    return Ok(vector);
                }
                Err(e) if provider.is_transient(&e) => {
                    tracing::warn!(provider = idx, error = %e, "embedding provider failed transiently, trying next");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            GraphRagError::EmbeddingFailed("no embedding providers configured".into())
        }))
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_err = None;
        for (idx, provider) in self.providers.iter().enumerate() {
            match provider.embed_batch(texts).await {
                Ok(vectors) => {
                    *self.cached_dimension.lock() = Some(provider.dimension());
                    return Ok(vectors);
                }
                Err(e) if provider.is_transient(&e) => {
                    tracing::warn!(provider = idx, error = %e, "embedding provider failed transiently, trying next");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            GraphRagError::EmbeddingFailed("no embedding providers configured".into())
        }))
    }

    /// Cached after the first successful call; falls back to the
    /// construction-time value before any call has succeeded.
    pub fn dimension(&self) -> usize {
        self.cached_dimension.lock().unwrap_or(self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        dim: usize,
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingModel for FlakyProvider {
        async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(GraphRagError::EmbeddingFailed("transient".into()));
            }
            Ok(vec![text.len() as f32; self.dim])
        }

        fn dimension(&self) -> usize {
            self.dim
        }
    }

    #[tokio::test]
    async fn falls_through_to_next_provider_on_transient_failure() {
        let router = EmbeddingRouter::new(vec![
            Box::new(FlakyProvider {
                dim: 4,
                fail_times: AtomicUsize::new(1),
            }),
            Box::new(FlakyProvider {
                dim: 4,
                fail_times: AtomicUsize::new(0),
            }),
        ])
        .unwrap();

        let vector = router.embed_one("hello").await.unwrap();
        assert_eq!(vector.len(), 4);
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let result = EmbeddingRouter::new(vec![
            Box::new(FlakyProvider {
                dim: 4,
                fail_times: AtomicUsize::new(0),
            }),
            Box::new(FlakyProvider {
                dim: 8,
                fail_times: AtomicUsize::new(0),
            }),
        ]);
        assert!(result.is_err());
    }
}
