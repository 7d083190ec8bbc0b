//! The composer: an ordered, derivable middleware chain.
//!
//! A [`Composer`] holds one composed function, built by concatenating
//! everything registered on it in order. Each registration method creates a
//! sub-composer, links it into the acting chain and returns it, so the
//! returned composer can keep growing after it has been installed:
//!
//! ```rust,ignore
//! let bot = Composer::<Context>::new();
//!
//! bot.use_(from_fn(log_updates));
//! bot.filter(|ctx| ctx.update().chat_type() == Some("private"), from_fn(greet))
//!     .use_(from_fn(track_private_chats));
//!
//! bot.error_boundary(
//!     |err, next| async move {
//!         tracing::warn!(%err, "plugin failed");
//!         next.run().await
//!     },
//!     from_fn(flaky_plugin),
//! );
//! ```
//!
//! # Tower Service Integration
//!
//! `Composer<C>` implements `tower::Service<Arc<C>>`: a call runs the chain
//! with the terminal continuation.
//!
//! ```rust,ignore
//! let service = ServiceBuilder::new()
//!     .layer(TimeoutLayer::new(Duration::from_secs(5)))
//!     .service(bot.clone());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context as TaskContext, Poll};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::{Mutex, RwLock};
use tower::Service;
use tracing::{debug, trace};

use crate::error::BotError;
use crate::middleware::{
    Middleware, MiddlewareFn, MiddlewareObj, MiddlewareResult, Next, concat, pass_through,
};
use crate::runner::run;
use skein_core::BoxError;

struct ComposerInner<C> {
    handler: RwLock<MiddlewareFn<C>>,
    frozen: AtomicBool,
}

/// An ordered aggregator of middleware with derivation operators.
///
/// Cloning is cheap and yields a handle to the same chain.
pub struct Composer<C> {
    inner: Arc<ComposerInner<C>>,
}

impl<C> Clone for Composer<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Send + Sync + 'static> Default for Composer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Composer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composer")
            .field("frozen", &self.inner.frozen.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<C: Send + Sync + 'static> Composer<C> {
    /// Creates an empty composer, which passes every context straight through.
    pub fn new() -> Self {
        Self::with_handler(pass_through())
    }

    fn with_handler(handler: MiddlewareFn<C>) -> Self {
        Self {
            inner: Arc::new(ComposerInner {
                handler: RwLock::new(handler),
                frozen: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the chain as currently composed.
    pub fn handler(&self) -> MiddlewareFn<C> {
        Arc::clone(&self.inner.handler.read())
    }

    /// Rejects every further registration on this composer.
    ///
    /// Sub-composers returned earlier are not affected.
    pub fn freeze(&self) {
        if !self.inner.frozen.swap(true, Ordering::AcqRel) {
            trace!("composer frozen");
        }
    }

    /// Returns `true` once [`freeze`](Self::freeze) has been called.
    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::Acquire)
    }

    /// Appends `handler` to the chain.
    ///
    /// # Panics
    ///
    /// Panics if the composer is frozen.
    fn install(&self, handler: MiddlewareFn<C>) {
        assert!(
            !self.is_frozen(),
            "middleware registered on a composer that is already dispatching; \
             register everything before starting the bot"
        );
        let mut current = self.inner.handler.write();
        *current = concat(Arc::clone(&current), handler);
    }

    /// Installs `sub` and hands it back.
    fn attach(&self, sub: Composer<C>) -> Composer<C> {
        self.install(Middleware::from(sub.clone()).flatten());
        sub
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers middleware and returns the sub-composer wrapping it.
    ///
    /// Anything later registered on the returned composer runs at the point
    /// where it was installed.
    pub fn use_(&self, middleware: impl Into<Middleware<C>>) -> Composer<C> {
        self.attach(Composer::from(middleware.into()))
    }

    /// Runs `middleware` only for contexts matching `predicate`; everything
    /// else falls through as if it were absent.
    pub fn filter<P>(&self, predicate: P, middleware: impl Into<Middleware<C>>) -> Composer<C>
    where
        P: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.filter_async(move |ctx| future::ready(predicate(&*ctx)), middleware)
    }

    /// Like [`filter`](Self::filter) with an asynchronous predicate.
    pub fn filter_async<P, Fut>(
        &self,
        predicate: P,
        middleware: impl Into<Middleware<C>>,
    ) -> Composer<C>
    where
        P: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let sub = Composer::from(middleware.into());
        self.branch_async(predicate, sub.clone(), Middleware::Fn(pass_through()));
        sub
    }

    /// Runs `middleware` only for contexts *not* matching `predicate`.
    pub fn drop_if<P>(&self, predicate: P, middleware: impl Into<Middleware<C>>) -> Composer<C>
    where
        P: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.filter(move |ctx| !predicate(ctx), middleware)
    }

    /// Like [`drop_if`](Self::drop_if) with an asynchronous predicate.
    pub fn drop_if_async<P, Fut>(
        &self,
        predicate: P,
        middleware: impl Into<Middleware<C>>,
    ) -> Composer<C>
    where
        P: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.filter_async(move |ctx| predicate(ctx).map(|keep| !keep), middleware)
    }

    /// Runs exactly one of `on_true` and `on_false`, chosen per context.
    pub fn branch<P>(
        &self,
        predicate: P,
        on_true: impl Into<Middleware<C>>,
        on_false: impl Into<Middleware<C>>,
    ) -> Composer<C>
    where
        P: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.branch_async(move |ctx| future::ready(predicate(&*ctx)), on_true, on_false)
    }

    /// Like [`branch`](Self::branch) with an asynchronous predicate.
    pub fn branch_async<P, Fut>(
        &self,
        predicate: P,
        on_true: impl Into<Middleware<C>>,
        on_false: impl Into<Middleware<C>>,
    ) -> Composer<C>
    where
        P: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let on_true = on_true.into();
        let on_false = on_false.into();
        self.lazy(move |ctx| {
            let decision = predicate(ctx);
            let (on_true, on_false) = (on_true.clone(), on_false.clone());
            async move { Ok(if decision.await { on_true } else { on_false }) }
        })
    }

    /// Computes the middleware to run per context and runs it inline.
    ///
    /// A failing factory fails the stage like any middleware error.
    pub fn lazy<F, Fut>(&self, factory: F) -> Composer<C>
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Middleware<C>, BoxError>> + Send + 'static,
    {
        let lazy: MiddlewareFn<C> = Arc::new(move |ctx: Arc<C>, next: Next| {
            let resolved = factory(Arc::clone(&ctx));
            async move {
                let middleware = resolved.await?;
                let chain = middleware.flatten();
                chain(ctx, next).await
            }
            .boxed()
        });
        self.use_(Middleware::Fn(lazy))
    }

    /// Dispatches on a key computed per context.
    ///
    /// Unknown keys and `None` run `fallback`, or pass through when there is
    /// no fallback.
    pub fn route<K, R, Fut>(
        &self,
        router: R,
        routes: HashMap<K, Middleware<C>>,
        fallback: Option<Middleware<C>>,
    ) -> Composer<C>
    where
        K: Eq + Hash + Send + Sync + 'static,
        R: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<K>> + Send + 'static,
    {
        let routes = Arc::new(routes);
        let fallback = fallback.unwrap_or_else(|| Middleware::Fn(pass_through()));
        self.lazy(move |ctx| {
            let key = router(ctx);
            let routes = Arc::clone(&routes);
            let fallback = fallback.clone();
            async move {
                let selected = key.await.and_then(|key| routes.get(&key).cloned());
                Ok(selected.unwrap_or(fallback))
            }
        })
    }

    /// Runs `middleware` concurrently with the rest of the chain.
    ///
    /// The stage settles once both sides have settled, even when one of them
    /// fails early. The first failure is returned. Registrations on the
    /// returned composer run inside the fork.
    pub fn fork(&self, middleware: impl Into<Middleware<C>>) -> Composer<C> {
        let sub = Composer::from(middleware.into());
        let forked = Middleware::from(sub.clone()).flatten();
        self.install(Arc::new(move |ctx: Arc<C>, next: Next| {
            let forked = Arc::clone(&forked);
            async move {
                let first_error = Mutex::new(None);
                let settle = |result: MiddlewareResult| {
                    if let Err(err) = result {
                        let mut slot = first_error.lock();
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                    }
                };
                future::join(
                    async { settle(next.run().await) },
                    async { settle(run(&forked, ctx).await) },
                )
                .await;
                match first_error.into_inner() {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
            .boxed()
        }));
        sub
    }

    /// Confines failures of `middleware` to `handler`.
    ///
    /// The guarded chain gets a continuation that only records that it was
    /// called. On failure the record is cleared and `handler` receives the
    /// wrapped error along with the same continuation. The outer chain resumes
    /// only if the continuation was called.
    pub fn error_boundary<H, Fut>(
        &self,
        handler: H,
        middleware: impl Into<Middleware<C>>,
    ) -> Composer<C>
    where
        H: Fn(BotError<C>, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MiddlewareResult> + Send + 'static,
    {
        let sub = Composer::from(middleware.into());
        let bound = Middleware::from(sub.clone()).flatten();
        let handler = Arc::new(handler);
        self.install(Arc::new(move |ctx: Arc<C>, next: Next| {
            let bound = Arc::clone(&bound);
            let handler = Arc::clone(&handler);
            async move {
                let resumed = Arc::new(AtomicBool::new(false));
                let latch = {
                    let resumed = Arc::clone(&resumed);
                    Next::new(move || {
                        resumed.store(true, Ordering::SeqCst);
                        future::ok(()).boxed()
                    })
                };

                if let Err(error) = bound(Arc::clone(&ctx), latch.clone()).await {
                    resumed.store(false, Ordering::SeqCst);
                    let error = BotError::new(error, ctx);
                    debug!(error = %error, "error caught by boundary");
                    handler(error, latch).await?;
                }

                if resumed.load(Ordering::SeqCst) {
                    next.run().await
                } else {
                    Ok(())
                }
            }
            .boxed()
        }));
        sub
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl<C: Send + Sync + 'static> From<Middleware<C>> for Composer<C> {
    fn from(middleware: Middleware<C>) -> Self {
        Self::with_handler(middleware.flatten())
    }
}

impl<C: Send + Sync + 'static> FromIterator<Middleware<C>> for Composer<C> {
    fn from_iter<I: IntoIterator<Item = Middleware<C>>>(iter: I) -> Self {
        let handler = iter
            .into_iter()
            .map(|m| m.flatten())
            .reduce(concat)
            .unwrap_or_else(pass_through);
        Self::with_handler(handler)
    }
}

impl<C: Send + Sync + 'static> MiddlewareObj<C> for Composer<C> {
    fn middleware(&self) -> MiddlewareFn<C> {
        self.handler()
    }
}

impl<C: Send + Sync + 'static> From<Composer<C>> for Middleware<C> {
    fn from(composer: Composer<C>) -> Self {
        Middleware::Object(Arc::new(composer))
    }
}

impl<C: Send + Sync + 'static> From<Vec<Middleware<C>>> for Middleware<C> {
    fn from(list: Vec<Middleware<C>>) -> Self {
        list.into_iter().collect::<Composer<C>>().into()
    }
}

// =============================================================================
// Tower Service Implementation
// =============================================================================

impl<C: Send + Sync + 'static> Service<Arc<C>> for Composer<C> {
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, MiddlewareResult>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<C>) -> Self::Future {
        let chain = self.handler();
        async move { run(&chain, ctx).await }.boxed()
    }
}
