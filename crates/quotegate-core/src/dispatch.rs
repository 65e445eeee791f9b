//! Retry/fallback dispatch for upstream operations.
//!
//! A [`DispatchPolicy`] wraps a primary operation. Transient failures are
//! retried up to the configured bound; once the budget is spent the
//! primary's arguments are projected onto the fallback's own argument type
//! and the fallback runs exactly once.
//!
//! ```text
//! call(args) → primary(args) ─ ok ─────────────────────────────► result
//!                 │ client-facing ─────────────────────────────► error
//!                 │ transient (attempt ≤ retries) → primary(args)
//!                 │ transient (budget spent)
//!                 ▼
//!             fallback(project(&args)) ─ ok / err (final) ─────► result
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::error::Result;

/// Boxed future returned by every wrapped operation.
pub type OpFuture<T> = BoxFuture<'static, Result<T>>;

type PrimaryFn<A, T> = Arc<dyn Fn(A) -> OpFuture<T> + Send + Sync>;
type FallbackFn<A, T> = Arc<dyn Fn(&A) -> OpFuture<T> + Send + Sync>;

/// Secondary acquisition strategy with a narrower argument set.
///
/// The projection from the primary's argument type `A` to the fallback's
/// argument type is fixed at construction, so the primary → fallback
/// argument contract is checked by the compiler.
pub struct Fallback<A, T> {
    name: String,
    call: FallbackFn<A, T>,
}

impl<A, T> Fallback<A, T>
where
    A: 'static,
    T: 'static,
{
    pub fn new<F, P, Op, Fut>(name: impl Into<String>, project: P, op: Op) -> Self
    where
        F: Send + 'static,
        P: Fn(&A) -> F + Send + Sync + 'static,
        Op: Fn(F) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            call: Arc::new(move |args: &A| op(project(args)).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A, T> Clone for Fallback<A, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            call: Arc::clone(&self.call),
        }
    }
}

/// Immutable per-operation dispatch configuration.
pub struct DispatchPolicy<A, T> {
    name: String,
    primary: PrimaryFn<A, T>,
    fallback: Option<Fallback<A, T>>,
    retries: u32,
}

impl<A, T> DispatchPolicy<A, T>
where
    A: Clone + Send + 'static,
    T: Send + 'static,
{
    pub fn new<Op, Fut>(name: impl Into<String>, primary: Op) -> Self
    where
        Op: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            primary: Arc::new(move |args: A| primary(args).boxed()),
            fallback: None,
            retries: 0,
        }
    }

    /// Number of additional primary attempts after the first failure.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn fallback(mut self, fallback: Fallback<A, T>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry_budget(&self) -> u32 {
        self.retries
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Run the primary with retries, then the fallback if one is configured.
    pub async fn call(&self, args: A) -> Result<T> {
        let max_attempts = self.retries.saturating_add(1);
        let mut attempt = 0;

        let last_error = loop {
            attempt += 1;
            match (self.primary)(args.clone()).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = %self.name, attempt, "primary succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_client_facing() => {
                    tracing::debug!(operation = %self.name, error = %e, "client-facing failure, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        operation = %self.name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "primary attempt failed"
                    );
                    if attempt >= max_attempts {
                        break e;
                    }
                }
            }
        };

        match &self.fallback {
            Some(fallback) => {
                tracing::warn!(
                    operation = %self.name,
                    fallback = %fallback.name,
                    error = %last_error,
                    "retries exhausted, invoking fallback"
                );
                (fallback.call)(&args).await
            }
            None => Err(last_error),
        }
    }
}

impl<A, T> Clone for DispatchPolicy<A, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            primary: Arc::clone(&self.primary),
            fallback: self.fallback.clone(),
            retries: self.retries,
        }
    }
}

impl<A, T> fmt::Debug for DispatchPolicy<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchPolicy")
            .field("name", &self.name)
            .field("retries", &self.retries)
            .field("fallback", &self.fallback.as_ref().map(|fb| fb.name.as_str()))
            .finish()
    }
}
