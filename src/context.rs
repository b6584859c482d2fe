//! Ambient request context.
//!
//! Every public controller operation takes an [`AppContext`]. It carries the
//! provenance ids that end up in event envelopes, a tracing span for the
//! request, and a cancellation token observed at every suspension point.

use crate::error::{AppError, AppResult};
use crate::ids::new_request_id;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::Span;

#[derive(Clone, Debug)]
pub struct AppContext {
    user_id: String,
    request_id: String,
    causation_id: String,
    correlation_id: String,
    cancellation: CancellationToken,
    span: Span,
}

impl AppContext {
    pub fn new(
        user_id: impl Into<String>,
        request_id: impl Into<String>,
        causation_id: impl Into<String>,
        correlation_id: impl Into<String>,
        cancellation: CancellationToken,
        span: Span,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            request_id: request_id.into(),
            causation_id: causation_id.into(),
            correlation_id: correlation_id.into(),
            cancellation,
            span,
        }
    }

    /// Context for a top-level request: the request id doubles as causation
    /// and correlation id.
    pub fn for_request(user_id: &str, component: &str, cancellation: CancellationToken) -> Self {
        let request_id = new_request_id();
        let span = tracing::info_span!(
            "command",
            component = %component,
            req_id = %request_id,
            user_id = %user_id
        );
        Self::new(
            user_id,
            request_id.clone(),
            request_id.clone(),
            request_id,
            cancellation,
            span,
        )
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn causation_id(&self) -> &str {
        &self.causation_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns `Cancelled` if the context has been cancelled.
    pub fn check(&self) -> AppResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    /// Runs `fut` until it completes or the context is cancelled, whichever
    /// comes first. The future is dropped (aborted) on cancellation.
    pub async fn run<F, T>(&self, fut: F) -> AppResult<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(AppError::Cancelled),
            out = fut => Ok(out),
        }
    }
}
