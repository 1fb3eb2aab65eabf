//! The per-entity request queue (spec §4.4): strict FIFO per top-level
//! entity, with a nested-call bypass so a script calling itself through an
//! RPC proxy can't self-deadlock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::oneshot;

use crate::context::{self, HandlerFn, HandlerResult, RequestContext};

pub type DoneCallback = Box<dyn FnOnce(HandlerResult) + Send>;

#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    /// No further entries are accepted once this one is enqueued.
    pub close: bool,
    pub wait_pers: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("request queue {0:?} is shutting down")]
pub struct QueueClosed(pub String);

/// A handle to a queued (non-nested) entry, letting the session cancel it
/// before it's picked up (spec §4.4 `canceled` flag; §5 "no mid-execution
/// cancellation").
#[derive(Clone)]
pub struct EntryHandle {
    canceled: Arc<AtomicBool>,
}

impl EntryHandle {
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

struct Entry {
    tag: String,
    session: Option<Arc<dyn std::any::Any + Send + Sync>>,
    func: HandlerFn,
    callback: Option<DoneCallback>,
    wait_pers: bool,
    canceled: Arc<AtomicBool>,
}

struct InProgress {
    tag: String,
    ctx: Arc<RequestContext>,
}

struct State {
    queue: VecDeque<Entry>,
    in_progress: Option<InProgress>,
    closing: bool,
    close_callback: Option<oneshot::Sender<()>>,
}

/// One queue: either a top-level entity's, or a named global queue
/// (`_PRELOGIN`, `_PERSGET`, …).
pub struct RequestQueue {
    pub name: String,
    pub owner_label: String,
    persistence: Arc<gs_persistence::PersistenceCache>,
    state: StdMutex<State>,
}

impl RequestQueue {
    pub fn new(
        name: impl Into<String>,
        owner_label: impl Into<String>,
        persistence: Arc<gs_persistence::PersistenceCache>,
    ) -> Arc<RequestQueue> {
        Arc::new(RequestQueue {
            name: name.into(),
            owner_label: owner_label.into(),
            persistence,
            state: StdMutex::new(State {
                queue: VecDeque::new(),
                in_progress: None,
                closing: false,
                close_callback: None,
            }),
        })
    }

    /// `push(tag, func, callback, options)` (spec §4.4).
    pub fn push(
        self: &Arc<Self>,
        tag: impl Into<String>,
        session: Option<Arc<dyn std::any::Any + Send + Sync>>,
        func: HandlerFn,
        callback: Option<DoneCallback>,
        options: PushOptions,
    ) -> Result<Option<EntryHandle>, QueueClosed> {
        let tag = tag.into();
        let mut state = self.state.lock().unwrap();

        if state.closing {
            drop(state);
            if let Some(cb) = callback {
                cb(Err(QueueClosed(self.name.clone()).into()));
            }
            return Err(QueueClosed(self.name.clone()));
        }

        if let Some(in_progress) = &state.in_progress {
            if tag.starts_with(&in_progress.tag) {
                let parent = in_progress.ctx.clone();
                drop(state);
                self.dispatch_nested(tag, parent, func, callback);
                return Ok(None);
            }
        }

        let canceled = Arc::new(AtomicBool::new(false));
        state.queue.push_back(Entry {
            tag,
            session,
            func,
            callback,
            wait_pers: options.wait_pers,
            canceled: canceled.clone(),
        });
        if options.close {
            state.closing = true;
        }
        drop(state);

        self.kick();
        Ok(Some(EntryHandle { canceled }))
    }

    fn dispatch_nested(
        self: &Arc<Self>,
        tag: String,
        parent_ctx: Arc<RequestContext>,
        func: HandlerFn,
        callback: Option<DoneCallback>,
    ) {
        tracing::debug!(tag, queue = %self.name, "nested call bypassing queue");
        tokio::spawn(async move {
            let result = context::run_nested(parent_ctx, |ctx| func(ctx)).await;
            if let Some(cb) = callback {
                cb(result);
            }
        });
    }

    /// Deferred scheduler kick (spec §4.4 "kick the scheduler via a
    /// deferred call so multiple rapid pushes batch into one poll"):
    /// spawning a task rather than calling `next` inline means several
    /// `push`es made back-to-back see the same `in_progress` snapshot and
    /// only the first actually dequeues.
    fn kick(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move { this.next().await });
    }

    async fn next(self: Arc<Self>) {
        let entry = {
            let mut state = self.state.lock().unwrap();
            if state.in_progress.is_some() {
                return;
            }
            match state.queue.pop_front() {
                Some(entry) => Some(entry),
                None => {
                    if state.closing {
                        if let Some(cb) = state.close_callback.take() {
                            let _ = cb.send(());
                        }
                    }
                    None
                }
            }
        };
        let Some(entry) = entry else { return };
        self.handle(entry).await;
    }

    async fn handle(self: Arc<Self>, entry: Entry) {
        if entry.canceled.load(Ordering::SeqCst) {
            self.kick();
            return;
        }

        let ctx = Arc::new(RequestContext::new(
            entry.tag.clone(),
            self.owner_label.clone(),
            entry.session.clone(),
            self.clone(),
            self.persistence.clone(),
        ));

        {
            let mut state = self.state.lock().unwrap();
            state.in_progress = Some(InProgress { tag: entry.tag, ctx: ctx.clone() });
        }

        let context::RunHandle { caller, queue_done } =
            context::run(ctx, |ctx| (entry.func)(ctx), entry.wait_pers);

        if let Some(callback) = entry.callback {
            tokio::spawn(async move {
                let result = caller
                    .await
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("request context dropped before completing")));
                callback(result);
            });
        }

        // Hold the queue slot until persistence has actually finished,
        // regardless of `wait_pers` — only the caller's callback may fire
        // early (spec §4.3 step 5, §4.4 "still before the next queue entry").
        let _ = queue_done.await;
        self.state.lock().unwrap().in_progress = None;
        self.kick();
    }

    /// Request a drain: reject further pushes, and resolve once the last
    /// entry (queued or in-flight) finishes.
    pub fn shutdown(self: &Arc<Self>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap();
        state.closing = true;
        state.close_callback = Some(tx);
        drop(state);
        self.kick();
        rx
    }

    pub fn is_closing(&self) -> bool {
        self.state.lock().unwrap().closing
    }
}
