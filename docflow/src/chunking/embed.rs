//! The embedding collaborator.

use crate::errors::StepError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;

/// Turns texts into embedding vectors, one per input, in order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds every text.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StepError>;
}

/// An [`Embedder`] backed by a closure.
pub struct FnEmbedder<F> {
    func: F,
}

impl<F> FnEmbedder<F>
where
    F: for<'a> Fn(&'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>, StepError>> + Send + Sync,
{
    /// Wraps `func`.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FnEmbedder<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEmbedder").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Embedder for FnEmbedder<F>
where
    F: for<'a> Fn(&'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>, StepError>> + Send + Sync,
{
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StepError> {
        (self.func)(texts).await
    }
}
