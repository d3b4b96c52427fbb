//! Credential negotiation before a remote source is opened.
//!
//! Asking for credentials can take arbitrarily long (a user typing a password),
//! so it never blocks the caller: [`ConnectionNegotiator::negotiate`] hands the
//! request to a [`CredentialProvider`] and returns a [`Negotiation`] handle. The
//! completion callback runs exactly once, and only after credentials were
//! provided, declined or the negotiation was cancelled.

use crate::error::NegotiationError;
use chainsaw_framework::{ConnectionConfig, Credentials};
use chainsaw_vfs::{VfsManager, VfsUri};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

const WAIT_TICK: Duration = Duration::from_secs(1);

/// asks a user (or anything else) for credentials
pub trait CredentialProvider: Send + Sync {
    /// Called on a negotiation worker thread. The provider must eventually call
    /// [`CredentialResponder::provide`] or [`CredentialResponder::cancel`], from
    /// any thread; until then the source stays unopened.
    fn request_credentials(&self, redacted_uri: &str, responder: CredentialResponder);
}

#[derive(Debug)]
enum SlotState {
    Waiting,
    Provided(Credentials),
    Declined,
    Cancelled,
}

#[derive(Debug)]
struct Slot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Waiting),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// the first answer wins
    fn settle(&self, answer: SlotState) {
        let mut state = self.lock();
        if matches!(*state, SlotState::Waiting) {
            *state = answer;
            self.changed.notify_all();
        }
    }
}

/// the provider's way back to a pending negotiation
#[derive(Debug, Clone)]
pub struct CredentialResponder {
    slot: Arc<Slot>,
}

impl CredentialResponder {
    pub fn provide(&self, credentials: Credentials) {
        self.slot.settle(SlotState::Provided(credentials));
    }

    /// the user declined to enter credentials
    pub fn cancel(&self) {
        self.slot.settle(SlotState::Declined);
    }
}

/// handle to an in-flight negotiation
pub struct Negotiation {
    slot: Arc<Slot>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Negotiation {
    fn completed() -> Self {
        Self {
            slot: Arc::new(Slot::new()),
            worker: None,
        }
    }

    /// Abandon the negotiation; the completion callback reports `Cancelled`.
    /// No effect once credentials were provided.
    pub fn cancel(&self) {
        self.slot.settle(SlotState::Cancelled);
    }

    pub fn is_pending(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// wait for the completion callback to have run
    pub fn wait(mut self) {
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            log::error!("ConnectionNegotiator: negotiation thread panicked");
        }
    }
}

/// Ensures a connection has credentials before its source is opened.
pub struct ConnectionNegotiator {
    vfs: Arc<VfsManager>,
    provider: Option<Arc<dyn CredentialProvider>>,
    /// credentials already entered this session, keyed by redacted URI
    cache: Arc<Mutex<HashMap<String, Credentials>>>,
}

impl ConnectionNegotiator {
    pub fn new(vfs: Arc<VfsManager>, provider: Option<Arc<dyn CredentialProvider>>) -> Self {
        Self {
            vfs,
            provider,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `true` when opening `config` would need credentials nobody has supplied yet
    pub fn needs_credentials(&self, config: &ConnectionConfig) -> bool {
        if config.credentials.is_some() || !config.prompt_for_user_info {
            return false;
        }
        // sockets are not VFS locations and never authenticate
        self.vfs.requires_credentials(&config.uri)
            && VfsUri::parse(&config.uri).is_ok_and(|uri| uri.user().is_none())
    }

    /// Run the negotiation for `config` and call `on_done` with the connection
    /// to open, or with the reason it must not be opened.
    ///
    /// Completes on the calling thread when no prompt is needed or the
    /// credentials are cached; otherwise on a worker thread.
    pub fn negotiate<F>(&self, config: ConnectionConfig, on_done: F) -> Negotiation
    where
        F: FnOnce(Result<ConnectionConfig, NegotiationError>) + Send + 'static,
    {
        self.negotiate_with(config, on_done, |name, work| {
            thread::Builder::new().name(name).spawn(work)
        })
    }

    fn negotiate_with<F, S>(&self, config: ConnectionConfig, on_done: F, spawn: S) -> Negotiation
    where
        F: FnOnce(Result<ConnectionConfig, NegotiationError>) + Send + 'static,
        S: FnOnce(String, Box<dyn FnOnce() + Send>) -> io::Result<thread::JoinHandle<()>>,
    {
        if !self.needs_credentials(&config) {
            on_done(Ok(config));
            return Negotiation::completed();
        }

        let key = redacted(&config.uri);
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(credentials) = cached {
            log::debug!("ConnectionNegotiator: reusing credentials for {}", key);
            on_done(Ok(config.with_credentials(credentials)));
            return Negotiation::completed();
        }

        let Some(provider) = self.provider.clone() else {
            log::warn!("ConnectionNegotiator: {} needs credentials but nobody can provide them", key);
            on_done(Err(NegotiationError::NoProvider(key)));
            return Negotiation::completed();
        };

        let slot = Arc::new(Slot::new());
        let responder = CredentialResponder { slot: slot.clone() };
        let cache = self.cache.clone();
        let worker_slot = slot.clone();
        let worker_key = key.clone();
        // shared so a failed spawn can still report
        let on_done = Arc::new(Mutex::new(Some(on_done)));
        let worker_done = on_done.clone();

        let spawned = spawn(
            format!("negotiate-{}", key),
            Box::new(move || {
                log::info!("ConnectionNegotiator: requesting credentials for {}", worker_key);
                provider.request_credentials(&worker_key, responder);

                let answer = {
                    let mut state = worker_slot.lock();
                    while matches!(*state, SlotState::Waiting) {
                        state = match worker_slot.changed.wait_timeout(state, WAIT_TICK) {
                            Ok((guard, _)) => guard,
                            Err(poisoned) => poisoned.into_inner().0,
                        };
                    }
                    std::mem::replace(&mut *state, SlotState::Cancelled)
                };

                match answer {
                    SlotState::Provided(credentials) => {
                        cache
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(worker_key, credentials.clone());
                        finish(&worker_done, Ok(config.with_credentials(credentials)));
                    }
                    SlotState::Declined => {
                        log::info!("ConnectionNegotiator: credentials declined for {}", worker_key);
                        finish(&worker_done, Err(NegotiationError::Declined(worker_key)));
                    }
                    SlotState::Cancelled | SlotState::Waiting => {
                        log::debug!("ConnectionNegotiator: negotiation for {} cancelled", worker_key);
                        finish(&worker_done, Err(NegotiationError::Cancelled(worker_key)));
                    }
                }
            }),
        );

        match spawned {
            Ok(worker) => Negotiation {
                slot,
                worker: Some(worker),
            },
            Err(e) => {
                log::error!("ConnectionNegotiator: failed to spawn negotiation for {}: {}", key, e);
                finish(&on_done, Err(NegotiationError::Unavailable(key, e.to_string())));
                Negotiation::completed()
            }
        }
    }

    /// forget every cached credential
    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn finish<F>(on_done: &Mutex<Option<F>>, result: Result<ConnectionConfig, NegotiationError>)
where
    F: FnOnce(Result<ConnectionConfig, NegotiationError>),
{
    let on_done = on_done.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(on_done) = on_done {
        on_done(result);
    }
}

fn redacted(uri: &str) -> String {
    VfsUri::parse(uri)
        .map(|u| u.redacted())
        .unwrap_or_else(|_| chainsaw_vfs::redact(uri))
}
