//! Execution contexts and their confinement domains.
//!
//! A [`Context`] is a handle to one [`Session`] pinned to one thread:
//!
//! - the **main** context belongs to the thread that created the stack and
//!   runs work inline on that thread
//! - **background** and **sandbox** contexts each own a worker thread that
//!   runs submitted work in order and exits once the last handle is dropped
//!
//! The handle itself is `Send + Sync` and can be passed anywhere; the session
//! and its records never leave the context's thread. Work is submitted as a
//! closure that receives the session:
//!
//! ```ignore
//! let ctx = stack.background_context()?;
//! let n = ctx.perform_and_wait(|session| session.count("Person", &Predicate::All))?;
//! ```
//!
//! Using the main context from another thread is a confinement violation:
//! it is logged and rejected with [`CoreError::ConfinementViolation`] before
//! any record is touched.

use crate::coordinator::StoreSlot;
use crate::error::{CoreError, CoreResult};
use crate::session::Session;
use crate::types::{ContextId, ContextKind};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{mpsc, Arc};
use std::task::{Context as TaskContext, Poll};
use std::thread::{self, ThreadId};
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce(&Session) + Send>;

thread_local! {
    /// Sessions of every context whose domain is the current thread.
    static SESSIONS: RefCell<HashMap<ContextId, Session>> = RefCell::new(HashMap::new());
}

/// A handle to a confined context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ContextId,
    kind: ContextKind,
    store: Arc<StoreSlot>,
    domain: Domain,
}

enum Domain {
    /// Work runs inline on the owning thread.
    Owner(ThreadId),
    /// Work is queued to a dedicated worker.
    Worker { thread: ThreadId, jobs: mpsc::Sender<Job> },
}

impl Context {
    /// Creates a main context owned by `owner`.
    pub(crate) fn main(store: Arc<StoreSlot>, owner: ThreadId) -> Self {
        let id = ContextId::next();
        tracing::debug!(context = %id, kind = %ContextKind::Main, "created context");
        Self {
            inner: Arc::new(ContextInner {
                id,
                kind: ContextKind::Main,
                store,
                domain: Domain::Owner(owner),
            }),
        }
    }

    /// Creates a context with its own worker thread.
    pub(crate) fn spawn(kind: ContextKind, store: Arc<StoreSlot>) -> CoreResult<Self> {
        let id = ContextId::next();
        let (jobs, queue) = mpsc::channel::<Job>();
        let worker_store = Arc::clone(&store);
        let handle = thread::Builder::new()
            .name(format!("stackdb-{kind}-{}", id.as_u64()))
            .spawn(move || run_worker(id, kind, worker_store, queue))?;
        let thread = handle.thread().id();
        tracing::debug!(context = %id, %kind, "created context");

        Ok(Self {
            inner: Arc::new(ContextInner {
                id,
                kind,
                store,
                domain: Domain::Worker { thread, jobs },
            }),
        })
    }

    /// Context identifier.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Context kind.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.inner.kind
    }

    /// The thread all of this context's work runs on.
    #[must_use]
    pub fn domain_thread(&self) -> ThreadId {
        match &self.inner.domain {
            Domain::Owner(owner) => *owner,
            Domain::Worker { thread, .. } => *thread,
        }
    }

    /// Returns true if the caller is on this context's thread.
    #[must_use]
    pub fn is_on_domain(&self) -> bool {
        thread::current().id() == self.domain_thread()
    }

    /// Returns true if the store behind this context is open.
    #[must_use]
    pub fn is_store_available(&self) -> bool {
        self.inner.store.is_available()
    }

    /// Fails with a logged [`CoreError::ConfinementViolation`] unless the
    /// caller is on this context's thread.
    ///
    /// # Errors
    ///
    /// Returns the violation when called from another thread.
    pub fn assert_on_domain(&self) -> CoreResult<()> {
        let current = thread::current().id();
        let owner = self.domain_thread();
        if current == owner {
            return Ok(());
        }
        tracing::error!(
            context = %self.inner.id,
            kind = %self.inner.kind,
            ?owner,
            ?current,
            "context used outside its execution domain"
        );
        Err(CoreError::ConfinementViolation {
            context: self.inner.id,
            owner,
            current,
        })
    }

    /// The session, for direct use on the context's own thread.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfinementViolation`] from any other thread.
    pub fn session(&self) -> CoreResult<Session> {
        self.assert_on_domain()?;
        let session = SESSIONS.with(|sessions| {
            sessions
                .borrow_mut()
                .entry(self.inner.id)
                .or_insert_with(|| Session::new(self.inner.id, self.inner.kind, Arc::clone(&self.inner.store)))
                .clone()
        });
        Ok(session)
    }

    /// Submits `work` to the context without waiting.
    ///
    /// The main context runs it immediately on the calling thread; other
    /// contexts queue it to their worker.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfinementViolation`] for a main context used
    /// off its thread and [`CoreError::ContextClosed`] if the worker is gone.
    pub fn perform<F>(&self, work: F) -> CoreResult<()>
    where
        F: FnOnce(&Session) + Send + 'static,
    {
        match &self.inner.domain {
            Domain::Owner(_) => {
                let session = self.session()?;
                work(&session);
                Ok(())
            }
            Domain::Worker { jobs, .. } => jobs
                .send(Box::new(work))
                .map_err(|_| CoreError::ContextClosed(self.inner.id)),
        }
    }

    /// Runs `work` on the context and blocks until it returns.
    ///
    /// Called from the context's own thread, `work` runs inline.
    ///
    /// # Errors
    ///
    /// Returns whatever `work` returns, or the submission errors of
    /// [`perform`](Self::perform).
    pub fn perform_and_wait<F, T>(&self, work: F) -> CoreResult<T>
    where
        F: FnOnce(&Session) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_on_domain() || matches!(self.inner.domain, Domain::Owner(_)) {
            let session = self.session()?;
            return work(&session);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.perform(move |session| {
            let _ = tx.send(work(session));
        })?;
        rx.recv().map_err(|_| CoreError::ContextClosed(self.inner.id))?
    }

    /// Runs `work` on the context and returns a future of its result.
    ///
    /// The future does not need a particular runtime; it completes when the
    /// worker finishes the job.
    pub fn perform_async<F, T>(&self, work: F) -> PendingResult<T>
    where
        F: FnOnce(&Session) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let submitted = match &self.inner.domain {
            Domain::Owner(_) => {
                let _ = tx.send(self.session().and_then(|session| work(&session)));
                Ok(())
            }
            Domain::Worker { .. } => self.perform(move |session| {
                let _ = tx.send(work(session));
            }),
        };
        PendingResult {
            context: self.inner.id,
            rx,
            error: submitted.err(),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("thread", &self.domain_thread())
            .finish()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Domain::Owner(owner) = self.domain {
            if thread::current().id() == owner {
                let _ = SESSIONS.try_with(|sessions| {
                    if let Ok(mut sessions) = sessions.try_borrow_mut() {
                        sessions.remove(&self.id);
                    }
                });
            }
        }
        tracing::debug!(context = %self.id, kind = %self.kind, "released context");
    }
}

fn run_worker(id: ContextId, kind: ContextKind, store: Arc<StoreSlot>, queue: mpsc::Receiver<Job>) {
    let session = Session::new(id, kind, store);
    SESSIONS.with(|sessions| sessions.borrow_mut().insert(id, session.clone()));

    while let Ok(job) = queue.recv() {
        if panic::catch_unwind(AssertUnwindSafe(|| job(&session))).is_err() {
            tracing::error!(context = %id, %kind, "work submitted to context panicked");
        }
    }

    SESSIONS.with(|sessions| sessions.borrow_mut().remove(&id));
    tracing::debug!(context = %id, %kind, "context worker finished");
}

/// Future returned by [`Context::perform_async`].
#[derive(Debug)]
pub struct PendingResult<T> {
    context: ContextId,
    rx: oneshot::Receiver<CoreResult<T>>,
    error: Option<CoreError>,
}

impl<T> Future for PendingResult<T> {
    type Output = CoreResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(error) = this.error.take() {
            return Poll::Ready(Err(error));
        }
        let context = this.context;
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(CoreError::ContextClosed(context))))
    }
}
