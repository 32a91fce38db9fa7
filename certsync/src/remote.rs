//! Remote call contracts.
//!
//! The sync core never encodes a remote call itself. Collaborators hand it
//! a [`RemoteRead`] (one read, issued on either channel) or a
//! [`RemoteWrite`] (one mutation) and the core decides when and how often
//! to invoke them.

use crate::error::TransportError;
use async_trait::async_trait;
use certsync_types::{FetchRequest, Identity};
use std::future::Future;
use std::marker::PhantomData;

/// A remote read that can be issued on the query or the update channel.
#[async_trait]
pub trait RemoteRead<T>: Send + Sync {
    /// Issues the read. `request.certified` selects the channel.
    async fn fetch(&self, request: FetchRequest) -> Result<T, TransportError>;
}

/// A remote mutation.
#[async_trait]
pub trait RemoteWrite<A>: Send + Sync
where
    A: Send + 'static,
{
    /// Applies `args` on behalf of `identity`.
    async fn mutate(&self, identity: Identity, args: A) -> Result<(), TransportError>;
}

/// [`RemoteRead`] backed by a closure.
pub struct FnRead<F, T> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

/// Wraps `f` as a [`RemoteRead`].
pub fn read_fn<F, Fut, T>(f: F) -> FnRead<F, T>
where
    F: Fn(FetchRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, TransportError>> + Send,
    T: Send,
{
    FnRead {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, T> RemoteRead<T> for FnRead<F, T>
where
    F: Fn(FetchRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, TransportError>> + Send,
    T: Send,
{
    async fn fetch(&self, request: FetchRequest) -> Result<T, TransportError> {
        (self.f)(request).await
    }
}

/// Scripted remotes for testing.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::hash::Hash;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// What one channel of a [`MockRead`] answers.
    #[derive(Debug, Clone)]
    pub struct ChannelScript<T> {
        pub result: Result<T, TransportError>,
        pub delay: Duration,
        /// Hold the answer until [`MockRead::release`] is called.
        pub gated: bool,
    }

    impl<T> ChannelScript<T> {
        /// Answers `value` immediately.
        pub fn ok(value: T) -> Self {
            Self {
                result: Ok(value),
                delay: Duration::ZERO,
                gated: false,
            }
        }

        /// Fails immediately with `message`.
        pub fn err(message: &str) -> Self {
            Self {
                result: Err(TransportError::new(message)),
                delay: Duration::ZERO,
                gated: false,
            }
        }

        /// Answers after `delay`.
        pub fn after(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Answers only once released.
        pub fn gated(mut self) -> Self {
            self.gated = true;
            self
        }
    }

    /// A read with one script per channel that records every call.
    pub struct MockRead<T> {
        query: ChannelScript<T>,
        update: ChannelScript<T>,
        calls: Mutex<Vec<FetchRequest>>,
        called: Notify,
        query_gate: Notify,
        update_gate: Notify,
    }

    impl<T: Clone + Send + Sync> MockRead<T> {
        /// Creates a mock answering `query` on the uncertified channel and
        /// `update` on the certified one.
        pub fn new(query: ChannelScript<T>, update: ChannelScript<T>) -> Arc<Self> {
            Arc::new(Self {
                query,
                update,
                calls: Mutex::new(Vec::new()),
                called: Notify::new(),
                query_gate: Notify::new(),
                update_gate: Notify::new(),
            })
        }

        /// Every request received so far, in call order.
        pub fn calls(&self) -> Vec<FetchRequest> {
            self.calls.lock().unwrap().clone()
        }

        /// Number of requests received so far.
        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Waits until at least `n` requests were received.
        pub async fn wait_for_calls(&self, n: usize) {
            loop {
                let notified = self.called.notified();
                if self.call_count() >= n {
                    return;
                }
                notified.await;
            }
        }

        /// Lets a gated channel answer.
        pub fn release(&self, certified: bool) {
            if certified {
                self.update_gate.notify_one();
            } else {
                self.query_gate.notify_one();
            }
        }
    }

    #[async_trait]
    impl<T: Clone + Send + Sync> RemoteRead<T> for MockRead<T> {
        async fn fetch(&self, request: FetchRequest) -> Result<T, TransportError> {
            self.calls.lock().unwrap().push(request);
            self.called.notify_waiters();

            let (script, gate) = if request.certified {
                (&self.update, &self.update_gate)
            } else {
                (&self.query, &self.query_gate)
            };
            if script.gated {
                gate.notified().await;
            }
            if !script.delay.is_zero() {
                tokio::time::sleep(script.delay).await;
            }
            script.result.clone()
        }
    }

    /// A write that fails for scripted arguments and records the rest.
    pub struct MockWrite<A> {
        failing: HashSet<A>,
        delays: HashMap<A, Duration>,
        applied: Mutex<Vec<(Identity, A)>>,
        started: Mutex<Vec<A>>,
    }

    impl<A> MockWrite<A>
    where
        A: Eq + Hash + Clone + Send + Sync + 'static,
    {
        /// Creates a mock that rejects every argument in `failing`.
        pub fn new(failing: impl IntoIterator<Item = A>) -> Arc<Self> {
            Arc::new(Self {
                failing: failing.into_iter().collect(),
                delays: HashMap::new(),
                applied: Mutex::new(Vec::new()),
                started: Mutex::new(Vec::new()),
            })
        }

        /// Creates a mock with per-argument latency.
        pub fn with_delays(
            failing: impl IntoIterator<Item = A>,
            delays: impl IntoIterator<Item = (A, Duration)>,
        ) -> Arc<Self> {
            Arc::new(Self {
                failing: failing.into_iter().collect(),
                delays: delays.into_iter().collect(),
                applied: Mutex::new(Vec::new()),
                started: Mutex::new(Vec::new()),
            })
        }

        /// Successful writes in completion order.
        pub fn applied(&self) -> Vec<(Identity, A)> {
            self.applied.lock().unwrap().clone()
        }

        /// Every write that started, in start order.
        pub fn started(&self) -> Vec<A> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<A> RemoteWrite<A> for MockWrite<A>
    where
        A: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    {
        async fn mutate(&self, identity: Identity, args: A) -> Result<(), TransportError> {
            self.started.lock().unwrap().push(args.clone());
            if let Some(delay) = self.delays.get(&args) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing.contains(&args) {
                return Err(TransportError::new(format!("rejected {args:?}")));
            }
            self.applied.lock().unwrap().push((identity, args));
            Ok(())
        }
    }
}
