use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::{CachePolicy, CacheScope};
use crate::error::Interrupted;

/// Request-scoped context threaded through every backend call.
///
/// It carries the caller's cancellation signal, an optional deadline, and the
/// cache policy for the read being issued. Cache mutators return a copy that
/// shares the same cancellation token and deadline, so attaching a policy
/// never detaches a request from its parent's cancellation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    cache: CacheScope,
}

impl Context {
    /// A context that is never canceled, has no deadline, and bypasses the cache.
    pub fn background() -> Self {
        Self::default()
    }

    /// Turns caching on and resets the policy to empty.
    pub fn with_cache(&self) -> Self {
        Self {
            cache: CacheScope::enabled(),
            ..self.clone()
        }
    }

    /// Replaces the cache policy, keeping whether caching was enabled.
    pub fn with_cache_policy(&self, policy: CachePolicy) -> Self {
        Self {
            cache: CacheScope {
                enabled: self.cache.enabled,
                policy,
            },
            ..self.clone()
        }
    }

    pub fn cache(&self) -> &CacheScope {
        &self.cache
    }

    /// Uses `token` as the cancellation signal.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            token,
            ..self.clone()
        }
    }

    /// A context whose cancellation is triggered by this one, but which can
    /// also be canceled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            ..self.clone()
        }
    }

    /// Sets a deadline; an earlier parent deadline still wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Why the context is done, if it is.
    pub fn err(&self) -> Option<Interrupted> {
        if self.token.is_cancelled() {
            return Some(Interrupted::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupted::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Drives `fut` until it completes, the context is canceled, or the
    /// deadline passes, whichever comes first. An abandoned future is dropped.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        if let Some(reason) = self.err() {
            return Err(reason);
        }

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Canceled),
            _ = expired => Err(Interrupted::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}
