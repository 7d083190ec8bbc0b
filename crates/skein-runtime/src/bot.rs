//! The bot: a root composer wired to an update source.
//!
//! A [`Bot`] owns the root [`Composer`], builds one context per update and
//! runs the chain for it. [`Bot::start`] drives the long-polling loop:
//!
//! ```text
//! Stopped --start--> Polling --fetch--> HandlingBatch --> Polling ...
//!                       |
//!                     stop --> Draining (fetch cancelled, confirm) --> Stopped
//! ```
//!
//! Updates are handled strictly one after another. The id of an update is
//! recorded before its chain runs, so the next fetch confirms it even when
//! the chain failed.
//!
//! # Example
//!
//! ```rust,ignore
//! use skein_runtime::Bot;
//!
//! let bot = Bot::builder(source)
//!     .catch(|err| async move {
//!         tracing::error!(error = %err, "update failed");
//!         Ok(())
//!     })
//!     .build();
//!
//! bot.composer().command("start", reply_hello);
//! bot.run_until_signal().await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info, info_span, warn};

use crate::config::{PollingConfig, RetryConfig, SkeinConfig};
use crate::error::{RunError, RunResult};
use crate::retry::with_retries;
use skein_core::{ApiError, BotInfo, BoxError, GetUpdatesParams, Update, UpdateSource};
use skein_framework::{BotError, Composer, Context, UpdateContext, run};

type ContextFactory<C> = Arc<dyn Fn(Update, Option<BotInfo>) -> C + Send + Sync>;
type ErrorHandler<C> =
    Arc<dyn Fn(BotError<C>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

// =============================================================================
// Polling Session
// =============================================================================

/// State of one `start()` call.
struct PollingState {
    running: AtomicBool,
    cancel: CancellationToken,
    /// Held while stopping and while advancing the offset, so the offset
    /// read by the confirm fetch covers every update the loop has taken.
    gate: Mutex<()>,
}

impl PollingState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            gate: Mutex::new(()),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Records `update_id` as taken. Returns `false`, storing nothing, once
    /// the session is stopped.
    fn advance(&self, last_update_id: &AtomicI64, update_id: i64) -> bool {
        let _gate = self.gate.lock();
        if !self.is_running() {
            return false;
        }
        last_update_id.store(update_id, Ordering::Release);
        true
    }

    /// Marks the session stopped. Returns `false` if it already was.
    fn halt(&self) -> bool {
        let _gate = self.gate.lock();
        self.running.swap(false, Ordering::AcqRel)
    }
}

/// Clears the session slot when `start()` returns or is dropped.
struct SessionGuard<'a> {
    slot: &'a Mutex<Option<Arc<PollingState>>>,
    state: Arc<PollingState>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, &self.state)) {
            *slot = None;
        }
    }
}

// =============================================================================
// Bot
// =============================================================================

struct BotInner<C, S> {
    source: S,
    composer: Composer<C>,
    context_factory: ContextFactory<C>,
    error_handler: Option<ErrorHandler<C>>,
    me: RwLock<Option<BotInfo>>,
    polling: PollingConfig,
    retry: RetryConfig,
    last_update_id: AtomicI64,
    session: Mutex<Option<Arc<PollingState>>>,
}

/// A bot dispatching updates from `S` through a chain over contexts `C`.
///
/// Cloning is cheap and every clone controls the same bot, so one clone can
/// call [`stop`](Self::stop) while another is inside [`start`](Self::start).
pub struct Bot<C, S> {
    inner: Arc<BotInner<C, S>>,
}

impl<C, S> Clone for Bot<C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: UpdateSource> Bot<Context, S> {
    /// Creates a builder for a bot using the default [`Context`].
    pub fn builder(source: S) -> BotBuilder<Context, S> {
        BotBuilder::new(source, Context::new)
    }
}

impl<C: UpdateContext, S: UpdateSource> Bot<C, S> {
    /// Creates a builder for a bot with a custom context type.
    pub fn builder_with_context<F>(source: S, factory: F) -> BotBuilder<C, S>
    where
        F: Fn(Update, Option<BotInfo>) -> C + Send + Sync + 'static,
    {
        BotBuilder::new(source, factory)
    }

    /// The root composer. Register middleware here before starting.
    pub fn composer(&self) -> &Composer<C> {
        &self.inner.composer
    }

    /// The update source.
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Identity of the bot, once known.
    pub fn me(&self) -> Option<BotInfo> {
        self.inner.me.read().clone()
    }

    /// Returns `true` once the bot identity is known.
    pub fn is_inited(&self) -> bool {
        self.inner.me.read().is_some()
    }

    /// Returns `true` while a polling session is active and not stopping.
    pub fn is_running(&self) -> bool {
        self.inner
            .session
            .lock()
            .as_ref()
            .is_some_and(|s| s.is_running())
    }

    /// Id of the last update handed to the chain.
    pub fn last_update_id(&self) -> i64 {
        self.inner.last_update_id.load(Ordering::Acquire)
    }

    /// Fetches the bot identity, retrying transient failures.
    ///
    /// Does nothing if the identity is already known.
    pub async fn init(&self) -> RunResult<()> {
        self.init_with(&CancellationToken::new()).await
    }

    async fn init_with(&self, cancel: &CancellationToken) -> RunResult<()> {
        if self.is_inited() {
            return Ok(());
        }

        let source = &self.inner.source;
        let me = with_retries(move || source.get_me(), &self.inner.retry, cancel)
            .await
            .map_err(RunError::Init)?;

        info!(id = me.id, username = ?me.username, "Bot initialized");
        *self.inner.me.write() = Some(me);
        Ok(())
    }

    /// Runs the chain for a single update.
    ///
    /// The root composer is frozen first. Middleware errors come back wrapped
    /// together with the context they failed on.
    pub async fn handle_update(&self, update: Update) -> Result<(), BotError<C>> {
        self.inner.composer.freeze();

        let span = debug_span!(
            "update",
            update_id = update.update_id,
            kind = update.kind().unwrap_or("unknown")
        );
        let ctx = Arc::new((self.inner.context_factory)(update, self.me()));
        let handler = self.inner.composer.handler();

        async move {
            debug!("Dispatching update");
            run(&handler, Arc::clone(&ctx))
                .await
                .map_err(|error| BotError::new(error, ctx))
        }
        .instrument(span)
        .await
    }

    /// Starts long polling and returns when the loop exits.
    ///
    /// Returns `Ok(())` right away if the bot is already running, and
    /// `Ok(())` after a [`stop`](Self::stop).
    pub async fn start(&self) -> RunResult<()> {
        let state = {
            let mut slot = self.inner.session.lock();
            if slot.is_some() {
                warn!("Bot is already running");
                return Ok(());
            }
            let state = Arc::new(PollingState::new());
            *slot = Some(Arc::clone(&state));
            state
        };
        let _guard = SessionGuard {
            slot: &self.inner.session,
            state: Arc::clone(&state),
        };

        self.poll(&state).instrument(info_span!("polling")).await
    }

    async fn poll(&self, session: &PollingState) -> RunResult<()> {
        let cancel = &session.cancel;

        match self.init_with(cancel).await {
            Err(RunError::Init(ApiError::Cancelled)) => {
                debug!("Stopped during initialization");
                return Ok(());
            }
            result => result?,
        }

        let source = &self.inner.source;
        let drop_pending = self.inner.polling.drop_pending_updates;
        match with_retries(
            move || source.delete_webhook(drop_pending),
            &self.inner.retry,
            cancel,
        )
        .await
        {
            Ok(_) => {}
            Err(ApiError::Cancelled) => return Ok(()),
            Err(e) => return Err(RunError::DeleteWebhook(e)),
        }

        self.inner.composer.freeze();
        info!(
            username = ?self.me().and_then(|me| me.username),
            "Polling started"
        );

        let mut allowed_updates = self.inner.polling.allowed_updates.clone();

        while session.is_running() {
            let params = GetUpdatesParams {
                offset: self.last_update_id() + 1,
                limit: self.inner.polling.limit,
                timeout: self.inner.polling.timeout_secs,
                allowed_updates: allowed_updates.clone(),
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = source.get_updates(&params) => result,
            };

            let updates = match result {
                Ok(updates) => updates,
                Err(error) => {
                    self.handle_polling_error(session, error).await?;
                    continue;
                }
            };

            // The remote keeps the last value.
            allowed_updates = None;

            if !updates.is_empty() {
                debug!(count = updates.len(), offset = params.offset, "Received updates");
            }

            for update in updates {
                let update_id = update.update_id;
                if !session.advance(&self.inner.last_update_id, update_id) {
                    break;
                }

                if let Err(err) = self.handle_update(update).await {
                    self.handle_bot_error(update_id, err).await?;
                }
            }
        }

        info!("Polling stopped");
        Ok(())
    }

    async fn handle_polling_error(
        &self,
        session: &PollingState,
        error: ApiError,
    ) -> RunResult<()> {
        if !session.is_running() {
            return Ok(());
        }

        if error.is_fatal_for_polling() {
            error!(error = %error, "Polling failed, stopping");
            return Err(RunError::Polling(error));
        }

        let delay = error
            .retry_after()
            .unwrap_or_else(|| self.inner.polling.error_retry_delay());
        warn!(error = %error, delay = ?delay, "Failed to fetch updates, retrying");

        tokio::select! {
            biased;
            _ = session.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
        Ok(())
    }

    async fn handle_bot_error(&self, update_id: i64, err: BotError<C>) -> RunResult<()> {
        match &self.inner.error_handler {
            Some(handler) => handler(err).await.map_err(|e| {
                error!(update_id, error = %e, "Error handler failed, stopping");
                RunError::ErrorHandler(e)
            }),
            None => {
                error!(
                    update_id,
                    error = %err,
                    "No error handler installed, stopping bot"
                );
                self.stop().await;
                let message = err.message().to_owned();
                let (source, _) = err.into_parts();
                Err(RunError::UnhandledBotError {
                    update_id,
                    message,
                    source,
                })
            }
        }
    }

    /// Stops polling.
    ///
    /// Cancels the fetch in flight, then confirms every handled update with a
    /// final fetch of one update, whose result is discarded. Does nothing if
    /// the bot is not running or already stopping.
    pub async fn stop(&self) {
        let Some(session) = self.inner.session.lock().clone() else {
            debug!("Bot is not running");
            return;
        };
        if !session.halt() {
            return;
        }

        info!("Stopping bot");
        session.cancel.cancel();

        let params = GetUpdatesParams {
            offset: self.last_update_id() + 1,
            limit: 1,
            timeout: 0,
            allowed_updates: None,
        };
        match self.inner.source.get_updates(&params).await {
            Ok(_) => debug!(offset = params.offset, "Confirmed handled updates"),
            Err(e) => warn!(offset = params.offset, error = %e, "Failed to confirm handled updates"),
        }
    }

    /// Polls until `shutdown` completes, then stops.
    pub async fn run_until<F>(&self, shutdown: F) -> RunResult<()>
    where
        F: Future<Output = ()>,
    {
        let polling = self.start();
        tokio::pin!(polling);

        tokio::select! {
            result = &mut polling => result,
            _ = shutdown => {
                self.stop().await;
                polling.await
            }
        }
    }

    /// Polls until Ctrl+C or SIGTERM.
    pub async fn run_until_signal(&self) -> RunResult<()> {
        info!("Press Ctrl+C to stop");
        self.run_until(wait_for_shutdown()).await
    }
}

/// Waits for shutdown signals (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                wait_for_ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = wait_for_ctrl_c() => {}
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            futures::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// BotBuilder
// =============================================================================

/// Builder for [`Bot`].
pub struct BotBuilder<C, S> {
    source: S,
    context_factory: ContextFactory<C>,
    composer: Option<Composer<C>>,
    error_handler: Option<ErrorHandler<C>>,
    me: Option<BotInfo>,
    polling: PollingConfig,
    retry: RetryConfig,
}

impl<C: UpdateContext, S: UpdateSource> BotBuilder<C, S> {
    fn new<F>(source: S, factory: F) -> Self
    where
        F: Fn(Update, Option<BotInfo>) -> C + Send + Sync + 'static,
    {
        Self {
            source,
            context_factory: Arc::new(factory),
            composer: None,
            error_handler: None,
            me: None,
            polling: PollingConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Uses `composer` as the root chain.
    pub fn composer(mut self, composer: Composer<C>) -> Self {
        self.composer = Some(composer);
        self
    }

    /// Installs the handler for errors raised while handling an update.
    ///
    /// Without one, the first such error stops the bot and is returned from
    /// [`Bot::start`]. An error returned by the handler stops the bot too.
    pub fn catch<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(BotError<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.error_handler = Some(Arc::new(move |err| handler(err).boxed()));
        self
    }

    /// Provides the bot identity, skipping the identity call on start.
    pub fn bot_info(mut self, me: BotInfo) -> Self {
        self.me = Some(me);
        self
    }

    /// Sets the polling options.
    pub fn polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Sets the backoff of the identity and webhook calls.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Takes the polling and retry sections of a loaded configuration.
    pub fn config(self, config: &SkeinConfig) -> Self {
        self.polling(config.polling.clone())
            .retry(config.retry.clone())
    }

    /// Builds the bot.
    pub fn build(self) -> Bot<C, S> {
        Bot {
            inner: Arc::new(BotInner {
                source: self.source,
                composer: self.composer.unwrap_or_default(),
                context_factory: self.context_factory,
                error_handler: self.error_handler,
                me: RwLock::new(self.me),
                polling: self.polling,
                retry: self.retry,
                last_update_id: AtomicI64::new(0),
                session: Mutex::new(None),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use skein_core::ApiResult;
    use skein_framework::{Next, from_fn};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct IdentitySource {
        get_me_calls: AtomicUsize,
    }

    #[async_trait]
    impl UpdateSource for IdentitySource {
        async fn get_updates(&self, _params: &GetUpdatesParams) -> ApiResult<Vec<Update>> {
            Ok(Vec::new())
        }

        async fn get_me(&self) -> ApiResult<BotInfo> {
            let n = self.get_me_calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Err(ApiError::network("connection reset"));
            }
            Ok(BotInfo {
                id: 42,
                is_bot: true,
                first_name: "Test".into(),
                username: Some("test_bot".into()),
            })
        }

        async fn delete_webhook(&self, _drop_pending_updates: bool) -> ApiResult<bool> {
            Ok(true)
        }
    }

    fn text_update(id: i64, text: &str) -> Update {
        Update::new(
            id,
            "message",
            json!({ "message_id": 1, "chat": { "id": 1, "type": "private" }, "text": text }),
        )
    }

    #[tokio::test]
    async fn test_init_retries_and_caches_identity() {
        let bot = Bot::builder(IdentitySource::default()).build();
        assert!(!bot.is_inited());

        bot.init().await.unwrap();
        bot.init().await.unwrap();

        assert_eq!(bot.me().unwrap().username.as_deref(), Some("test_bot"));
        assert_eq!(bot.source().get_me_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bot_info_skips_init() {
        let bot = Bot::builder(IdentitySource::default())
            .bot_info(BotInfo {
                id: 1,
                is_bot: true,
                first_name: "Known".into(),
                username: None,
            })
            .build();

        bot.init().await.unwrap();
        assert_eq!(bot.source().get_me_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handle_update_freezes_and_wraps_errors() {
        let bot = Bot::builder(IdentitySource::default()).build();
        bot.composer().use_(from_fn(|ctx: Arc<Context>, _next: Next| async move {
            Err::<(), BoxError>(format!("failed on {}", ctx.update().update_id).into())
        }));

        let err = bot.handle_update(text_update(9, "hi")).await.unwrap_err();

        assert!(bot.composer().is_frozen());
        assert_eq!(err.ctx().update().update_id, 9);
        assert_eq!(err.error().to_string(), "failed on 9");
    }

    #[tokio::test]
    async fn test_custom_context_factory() {
        struct Tagged {
            update: Update,
            tag: &'static str,
        }

        impl UpdateContext for Tagged {
            fn update(&self) -> &Update {
                &self.update
            }
        }

        let seen = Arc::new(Mutex::new(None));
        let bot = Bot::builder_with_context(IdentitySource::default(), |update, _me| Tagged {
            update,
            tag: "custom",
        })
        .build();

        let s = seen.clone();
        bot.composer().use_(from_fn(move |ctx: Arc<Tagged>, next: Next| {
            *s.lock() = Some(ctx.tag);
            next.run()
        }));

        bot.handle_update(text_update(1, "hi")).await.unwrap();
        assert_eq!(*seen.lock(), Some("custom"));
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let bot = Bot::builder(IdentitySource::default()).build();
        bot.stop().await;
        assert!(!bot.is_running());
    }

    #[test]
    fn test_halted_session_takes_no_more_updates() {
        let state = PollingState::new();
        let last = AtomicI64::new(0);

        assert!(state.advance(&last, 5));
        assert!(state.halt());
        assert!(!state.halt());

        assert!(!state.advance(&last, 6));
        assert_eq!(last.load(Ordering::Acquire), 5);
    }

    #[test]
    fn test_halt_waits_for_advance_in_progress() {
        let state = Arc::new(PollingState::new());
        let last = Arc::new(AtomicI64::new(0));

        let gate = state.gate.lock();
        let halting = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || state.halt())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(state.is_running());

        // The loop stores while holding the gate; halt only proceeds after.
        last.store(9, Ordering::Release);
        drop(gate);

        assert!(halting.join().unwrap());
        assert!(!state.is_running());
        assert_eq!(last.load(Ordering::Acquire), 9);
    }
}
