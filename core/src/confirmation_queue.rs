//! Serializes command confirmations so that the user only ever sees one
//! prompt at a time.
//!
//! Requests are exposed in arrival order through a [`watch`] channel. Each
//! caller gets its own [`oneshot::Receiver`] which resolves when *its*
//! request is answered, independently of how many requests are still queued
//! behind it.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio::sync::watch;
use tracing::debug;

use crate::protocol::CommandConfirmation;
use crate::protocol::ConfirmationPrompt;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    pub id: u64,
    pub prompt: ConfirmationPrompt,
}

struct Pending {
    request: ConfirmationRequest,
    tx: oneshot::Sender<CommandConfirmation>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    current: Option<Pending>,
    backlog: VecDeque<Pending>,
}

pub struct ConfirmationQueue {
    state: Mutex<State>,
    current_tx: watch::Sender<Option<ConfirmationRequest>>,
}

impl Default for ConfirmationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationQueue {
    pub fn new() -> Self {
        let (current_tx, _) = watch::channel(None);
        Self {
            state: Mutex::new(State::default()),
            current_tx,
        }
    }

    /// Adds a prompt to the queue. If nothing is being shown it becomes the
    /// current prompt right away.
    pub fn enqueue(&self, prompt: ConfirmationPrompt) -> oneshot::Receiver<CommandConfirmation> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;

        let pending = Pending {
            request: ConfirmationRequest { id, prompt },
            tx,
        };
        if state.current.is_none() {
            debug!("confirmation {id} is current");
            state.current = Some(pending);
            self.publish(&state);
        } else {
            debug!("confirmation {id} queued behind {} others", state.backlog.len() + 1);
            state.backlog.push_back(pending);
        }
        rx
    }

    /// Answers the current request. Returns `false` (and does nothing) if
    /// `id` is not the request currently exposed.
    pub fn resolve(&self, id: u64, confirmation: CommandConfirmation) -> bool {
        let mut state = self.lock();
        let is_current = state
            .current
            .as_ref()
            .is_some_and(|pending| pending.request.id == id);
        if !is_current {
            debug!("ignoring stale confirmation {id}");
            return false;
        }

        if let Some(pending) = state.current.take() {
            // The requester may have gone away (e.g. the turn was cancelled).
            let _ = pending.tx.send(confirmation);
        }
        state.current = state.backlog.pop_front();
        self.publish(&state);
        true
    }

    /// Drops every pending request. Their receivers observe a closed channel.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.current = None;
        state.backlog.clear();
        self.publish(&state);
    }

    /// The prompt currently shown to the user, if any.
    pub fn current(&self) -> Option<ConfirmationRequest> {
        self.current_tx.borrow().clone()
    }

    pub fn len(&self) -> usize {
        let state = self.lock();
        state.backlog.len() + usize::from(state.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ConfirmationRequest>> {
        self.current_tx.subscribe()
    }

    fn publish(&self, state: &State) {
        let current = state.current.as_ref().map(|pending| pending.request.clone());
        self.current_tx.send_replace(current);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
