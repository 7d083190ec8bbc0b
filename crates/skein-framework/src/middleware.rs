//! Middleware units and the `next` continuation.
//!
//! Every unit of work registered on a [`Composer`](crate::Composer) is a
//! [`Middleware`]: either a plain function of `(ctx, next)` or an object that
//! can produce such a function on demand. Before composition each unit is
//! flattened into a [`MiddlewareFn`], and [`concat`] links two functions into
//! a pipeline stage by stage.
//!
//! # The `next` protocol
//!
//! A stage receives a [`Next`] and decides whether to call it. Calling it runs
//! everything downstream and resolves once that has settled. Calling it a
//! second time in the same invocation fails with
//! [`MiddlewareError::NextCalledTwice`] without touching the downstream stage.
//!
//! ```rust,ignore
//! let log = from_fn(|ctx: Arc<Context>, next: Next| async move {
//!     let started = std::time::Instant::now();
//!     next.run().await?;
//!     tracing::info!(elapsed = ?started.elapsed(), "update handled");
//!     Ok(())
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::error::MiddlewareError;
use skein_core::BoxError;

/// Outcome of running a middleware stage.
pub type MiddlewareResult = Result<(), BoxError>;

// ============================================================================
// Next
// ============================================================================

/// The continuation handed to a middleware stage.
///
/// Cheap to clone; clones share the same underlying callable, so the
/// at-most-once guard installed by [`concat`] covers all of them.
#[derive(Clone)]
pub struct Next {
    inner: Arc<dyn Fn() -> BoxFuture<'static, MiddlewareResult> + Send + Sync>,
}

impl Next {
    /// Wraps a callable as a continuation.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, MiddlewareResult> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// The end of every chain: resolves immediately.
    pub fn terminal() -> Self {
        Self::new(|| future::ok(()).boxed())
    }

    /// Runs everything downstream of the current stage.
    pub fn run(&self) -> BoxFuture<'static, MiddlewareResult> {
        (self.inner)()
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// A middleware in its uniform, composable form.
pub type MiddlewareFn<C> =
    Arc<dyn Fn(Arc<C>, Next) -> BoxFuture<'static, MiddlewareResult> + Send + Sync>;

/// An object that exposes a middleware function.
///
/// [`Composer`](crate::Composer) implements this; so can any user type that
/// bundles its own chain.
pub trait MiddlewareObj<C>: Send + Sync + 'static {
    /// Returns the function to run for the next invocation.
    fn middleware(&self) -> MiddlewareFn<C>;
}

/// A unit of work registered on a composer.
pub enum Middleware<C> {
    /// A plain `(ctx, next)` function.
    Fn(MiddlewareFn<C>),
    /// An object that produces its function on every invocation.
    Object(Arc<dyn MiddlewareObj<C>>),
}

impl<C> Clone for Middleware<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Fn(f) => Self::Fn(Arc::clone(f)),
            Self::Object(o) => Self::Object(Arc::clone(o)),
        }
    }
}

impl<C> fmt::Debug for Middleware<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fn(_) => f.write_str("Middleware::Fn"),
            Self::Object(_) => f.write_str("Middleware::Object"),
        }
    }
}

impl<C: Send + Sync + 'static> Middleware<C> {
    /// Wraps a middleware object.
    pub fn object(obj: impl MiddlewareObj<C>) -> Self {
        Self::Object(Arc::new(obj))
    }

    /// Normalizes this unit into a plain function.
    ///
    /// The object variant is consulted on every call rather than once, so
    /// middleware added to it after flattening is still picked up.
    pub fn flatten(&self) -> MiddlewareFn<C> {
        match self {
            Self::Fn(f) => Arc::clone(f),
            Self::Object(obj) => {
                let obj = Arc::clone(obj);
                Arc::new(move |ctx: Arc<C>, next: Next| (obj.middleware())(ctx, next))
            }
        }
    }
}

impl<C> From<MiddlewareFn<C>> for Middleware<C> {
    fn from(f: MiddlewareFn<C>) -> Self {
        Self::Fn(f)
    }
}

/// Builds a middleware from an async closure.
///
/// ```rust,ignore
/// let greet = from_fn(|ctx: Arc<Context>, next: Next| async move {
///     ctx.set_state(Greeted(true));
///     next.run().await
/// });
/// ```
pub fn from_fn<C, F, Fut>(f: F) -> Middleware<C>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MiddlewareResult> + Send + 'static,
{
    Middleware::Fn(Arc::new(move |ctx, next| f(ctx, next).boxed()))
}

/// Middleware that calls `next` right away; the identity of composition.
pub fn pass_through<C: Send + Sync + 'static>() -> MiddlewareFn<C> {
    Arc::new(|_ctx: Arc<C>, next: Next| next.run())
}

/// Links two stages: `first` runs with a `next` that invokes `and_then`.
///
/// The `next` given to `first` can be called at most once per invocation.
pub fn concat<C: Send + Sync + 'static>(
    first: MiddlewareFn<C>,
    and_then: MiddlewareFn<C>,
) -> MiddlewareFn<C> {
    Arc::new(move |ctx: Arc<C>, next: Next| {
        let called = AtomicBool::new(false);
        let and_then = Arc::clone(&and_then);
        let downstream_ctx = Arc::clone(&ctx);
        let guarded = Next::new(move || {
            if called.swap(true, Ordering::SeqCst) {
                return future::err::<(), BoxError>(MiddlewareError::NextCalledTwice.into())
                    .boxed();
            }
            and_then(Arc::clone(&downstream_ctx), next.clone())
        });
        first(ctx, guarded)
    })
}
