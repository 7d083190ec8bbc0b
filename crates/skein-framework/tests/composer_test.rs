use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Barrier;
use tokio_test::{assert_err, assert_ok};

use skein_core::{BoxError, Update};
use skein_framework::{
    BotError, Composer, Context, Middleware, MiddlewareError, Next, UpdateContext, concat,
    from_fn, run,
};

type Log = Arc<Mutex<Vec<String>>>;

fn counting_next(counter: &Arc<AtomicUsize>) -> Next {
    let counter = counter.clone();
    Next::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        future::ok(()).boxed()
    })
}

fn enter_exit(log: &Log, name: &'static str) -> Middleware<()> {
    let log = log.clone();
    from_fn(move |_ctx: Arc<()>, next: Next| {
        let log = log.clone();
        async move {
            log.lock().push(format!("{name}-enter"));
            next.run().await?;
            log.lock().push(format!("{name}-exit"));
            Ok(())
        }
    })
}

#[tokio::test]
async fn test_next_called_twice_is_rejected() {
    let downstream = Arc::new(AtomicUsize::new(0));
    let second_call = Arc::new(Mutex::new(None));

    let s = second_call.clone();
    let first = from_fn(move |_ctx: Arc<()>, next: Next| {
        let s = s.clone();
        async move {
            next.run().await?;
            *s.lock() = Some(next.run().await);
            Ok(())
        }
    });
    let d = downstream.clone();
    let second = from_fn(move |_ctx: Arc<()>, next: Next| {
        d.fetch_add(1, Ordering::SeqCst);
        next.run()
    });

    let chain = concat(first.flatten(), second.flatten());
    assert_ok!(chain(Arc::new(()), Next::terminal()).await);

    let err = assert_err!(second_call.lock().take().unwrap());
    assert!(matches!(
        err.downcast_ref::<MiddlewareError>(),
        Some(MiddlewareError::NextCalledTwice)
    ));
    assert_eq!(downstream.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_composer_is_pass_through() {
    let calls = Arc::new(AtomicUsize::new(0));
    let composer = Composer::<()>::new();

    assert_ok!(composer.handler()(Arc::new(()), counting_next(&calls)).await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_use_preserves_onion_order() {
    let log: Log = Arc::default();
    let composer = Composer::new();
    composer.use_(enter_exit(&log, "A"));
    composer.use_(enter_exit(&log, "B"));
    composer.use_(enter_exit(&log, "C"));

    assert_ok!(run(&composer.handler(), Arc::new(())).await);
    assert_eq!(
        *log.lock(),
        vec!["A-enter", "B-enter", "C-enter", "C-exit", "B-exit", "A-exit"]
    );
}

#[tokio::test]
async fn test_filter_runs_middleware_iff_predicate_holds() {
    let hits = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));
    let composer = Composer::<u32>::new();

    let h = hits.clone();
    composer.filter(
        |n: &u32| *n > 5,
        from_fn(move |_ctx: Arc<u32>, _next: Next| {
            h.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }),
    );
    let a = after.clone();
    composer.use_(from_fn(move |_ctx: Arc<u32>, next: Next| {
        a.fetch_add(1, Ordering::SeqCst);
        next.run()
    }));

    assert_ok!(run(&composer.handler(), Arc::new(10)).await);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 0);

    assert_ok!(run(&composer.handler(), Arc::new(1)).await);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_filter_async_predicate() {
    let hits = Arc::new(AtomicUsize::new(0));
    let composer = Composer::<u32>::new();

    let h = hits.clone();
    composer.filter_async(
        |n: Arc<u32>| async move {
            tokio::task::yield_now().await;
            *n % 2 == 0
        },
        from_fn(move |_ctx: Arc<u32>, next: Next| {
            h.fetch_add(1, Ordering::SeqCst);
            next.run()
        }),
    );

    for n in 0..4 {
        assert_ok!(run(&composer.handler(), Arc::new(n)).await);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fork_runs_concurrently_with_continuation() {
    let barrier = Arc::new(Barrier::new(2));
    let fork_done = Arc::new(AtomicBool::new(false));
    let composer = Composer::<()>::new();

    let (b, done) = (barrier.clone(), fork_done.clone());
    composer.fork(from_fn(move |_ctx: Arc<()>, next: Next| {
        let (b, done) = (b.clone(), done.clone());
        async move {
            b.wait().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            done.store(true, Ordering::SeqCst);
            next.run().await
        }
    }));
    let b = barrier.clone();
    composer.use_(from_fn(move |_ctx: Arc<()>, next: Next| {
        let b = b.clone();
        async move {
            b.wait().await;
            next.run().await
        }
    }));

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        run(&composer.handler(), Arc::new(())),
    )
    .await;
    assert_ok!(assert_ok!(outcome));
    assert!(fork_done.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_fork_failure_waits_for_continuation() {
    let continued = Arc::new(AtomicBool::new(false));
    let composer = Composer::<()>::new();
    composer.fork(from_fn(|_ctx: Arc<()>, _next: Next| async {
        Err::<(), BoxError>("fork failed".into())
    }));
    let c = continued.clone();
    composer.use_(from_fn(move |_ctx: Arc<()>, _next: Next| {
        let c = c.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            c.store(true, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        }
    }));

    let err = assert_err!(run(&composer.handler(), Arc::new(())).await);
    assert_eq!(err.to_string(), "fork failed");
    assert!(continued.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_fork_returns_first_failure() {
    let forked = Arc::new(AtomicBool::new(false));
    let composer = Composer::<()>::new();
    let f = forked.clone();
    composer.fork(from_fn(move |_ctx: Arc<()>, _next: Next| {
        let f = f.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            f.store(true, Ordering::SeqCst);
            Err::<(), BoxError>("fork failed".into())
        }
    }));
    composer.use_(from_fn(|_ctx: Arc<()>, _next: Next| async {
        Err::<(), BoxError>("continuation failed".into())
    }));

    let err = assert_err!(run(&composer.handler(), Arc::new(())).await);
    assert_eq!(err.to_string(), "continuation failed");
    assert!(forked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_error_boundary_contains_errors() {
    let caught = Arc::new(Mutex::new(Vec::new()));
    let after = Arc::new(AtomicUsize::new(0));
    let composer = Composer::<()>::new();

    let c = caught.clone();
    composer.error_boundary(
        move |err: BotError<()>, _next: Next| {
            c.lock().push(err.error().to_string());
            async { Ok(()) }
        },
        from_fn(|_ctx: Arc<()>, _next: Next| async { Err::<(), BoxError>("inside".into()) }),
    );
    let a = after.clone();
    composer.use_(from_fn(move |_ctx: Arc<()>, next: Next| {
        a.fetch_add(1, Ordering::SeqCst);
        next.run()
    }));

    assert_ok!(run(&composer.handler(), Arc::new(())).await);
    assert_eq!(*caught.lock(), vec!["inside"]);
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_error_boundary_handler_can_rethrow() {
    let composer = Composer::<()>::new();
    composer.error_boundary(
        |err: BotError<()>, _next: Next| async move { Err(err.into_parts().0) },
        from_fn(|_ctx: Arc<()>, _next: Next| async { Err::<(), BoxError>("again".into()) }),
    );

    let err = assert_err!(run(&composer.handler(), Arc::new(())).await);
    assert_eq!(err.to_string(), "again");
}

#[tokio::test]
async fn test_error_boundary_passes_through_on_success() {
    let after = Arc::new(AtomicUsize::new(0));
    let composer = Composer::<()>::new();

    composer.error_boundary(
        |_err: BotError<()>, _next: Next| async { Ok(()) },
        from_fn(|_ctx: Arc<()>, next: Next| next.run()),
    );
    let a = after.clone();
    composer.use_(from_fn(move |_ctx: Arc<()>, next: Next| {
        a.fetch_add(1, Ordering::SeqCst);
        next.run()
    }));

    assert_ok!(run(&composer.handler(), Arc::new(())).await);
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_text_filter_skips_photo_message() {
    let replied = Arc::new(AtomicBool::new(false));
    let composer = Composer::<Context>::new();

    let r = replied.clone();
    composer.filter(
        |ctx: &Context| ctx.update().text().is_some(),
        from_fn(move |_ctx: Arc<Context>, _next: Next| {
            r.store(true, Ordering::SeqCst);
            async { Ok(()) }
        }),
    );

    let photo = Update::new(
        1,
        "message",
        json!({ "chat": { "id": 1, "type": "private" }, "photo": [{ "file_id": "abc" }] }),
    );
    assert_ok!(run(&composer.handler(), Arc::new(Context::new(photo, None))).await);
    assert!(!replied.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_error_boundary_resumes_outer_chain() {
    let outer_next = Arc::new(AtomicUsize::new(0));
    let composer = Composer::<()>::new();

    composer.error_boundary(
        |_err: BotError<()>, next: Next| async move { next.run().await },
        from_fn(|_ctx: Arc<()>, _next: Next| async { Err::<(), BoxError>("inner".into()) }),
    );

    let chain = composer.handler();
    assert_ok!(chain(Arc::new(()), counting_next(&outer_next)).await);
    assert_eq!(outer_next.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_on_and_command_dispatch() {
    let log: Arc<Mutex<Vec<String>>> = Arc::default();
    let composer = Composer::<Context>::new();

    let l = log.clone();
    composer.command(
        "start",
        from_fn(move |ctx: Arc<Context>, _next: Next| {
            let args = ctx.get_match().map(|m| m.matched).unwrap_or_default();
            l.lock().push(format!("start:{args}"));
            async { Ok(()) }
        }),
    );
    let l = log.clone();
    composer.on(
        "message:text",
        from_fn(move |ctx: Arc<Context>, _next: Next| {
            l.lock().push(ctx.update().text().unwrap_or_default().to_string());
            async { Ok(()) }
        }),
    );

    for (id, text) in [(1, "/start promo"), (2, "hello")] {
        let update = Update::new(id, "message", json!({ "text": text }));
        assert_ok!(run(&composer.handler(), Arc::new(Context::new(update, None))).await);
    }
    assert_eq!(*log.lock(), vec!["start:promo", "hello"]);
}
