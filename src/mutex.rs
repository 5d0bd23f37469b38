//! The Ricart-Agrawala coordinator every peer runs: the request state
//! machine, the outstanding-reply set and the deferred-reply queue.

use crate::clock::{LamportClock, RequestFingerprint};
use crate::log;
use crate::message::{AccessRelease, AccessRequest, AccessResponse};
use color_print::cformat;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Released,
    Wanted,
    Held,
}

struct DeferredReply {
    client_id: i32,
    token: Arc<Notify>,
}

struct CoreState {
    state: PeerState,
    current_request: Option<RequestFingerprint>,
    request_number: i32,
    deferred: Vec<DeferredReply>,
}

/// Shared across the inbound connection tasks, the outbound fan-out tasks
/// and the workload driver. The state machine sits under one mutex, the
/// outstanding-reply set under another; nothing awaits a suspension while
/// holding either.
pub struct MutexCore {
    pub id: i32,
    pub clock: LamportClock,
    peers: Vec<String>,
    state: Mutex<CoreState>,
    outstanding: Mutex<HashSet<String>>,
    all_replies: Notify,
}

impl MutexCore {
    pub fn new(id: i32, peers: Vec<String>) -> Self {
        Self {
            id,
            clock: LamportClock::new(),
            peers,
            state: Mutex::new(CoreState {
                state: PeerState::Released,
                current_request: None,
                request_number: 0,
                deferred: Vec::new(),
            }),
            outstanding: Mutex::new(HashSet::new()),
            all_replies: Notify::new(),
        }
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub async fn state(&self) -> PeerState {
        self.state.lock().await.state
    }

    pub async fn request_number(&self) -> i32 {
        self.state.lock().await.request_number
    }

    pub async fn deferred_count(&self) -> usize {
        self.state.lock().await.deferred.len()
    }

    /// Transition RELEASED -> WANTED and produce the request to fan out.
    /// Fills the outstanding-reply set with every configured peer; with no
    /// peers configured the following [`Self::await_replies`] is immediate.
    pub async fn begin_request(&self) -> AccessRequest {
        let mut state = self.state.lock().await;

        if state.state != PeerState::Released {
            panic!(
                "Requested the critical section while in state {:?}.",
                state.state
            );
        }

        let timestamp = self.clock.tick().await;
        state.state = PeerState::Wanted;
        state.request_number += 1;
        state.current_request = Some(RequestFingerprint {
            timestamp,
            id: self.id,
        });

        log::info(&cformat!(
            "State: <bold>RELEASED -> WANTED</bold> (req #{}, TS: {}).",
            state.request_number,
            timestamp
        ));

        {
            let mut outstanding = self.outstanding.lock().await;
            outstanding.clear();
            outstanding.extend(self.peers.iter().cloned());
        }

        AccessRequest {
            client_id: self.id,
            lamport_timestamp: timestamp,
            request_number: state.request_number,
        }
    }

    /// An affirmative reply arrived for the current request.
    pub async fn record_reply(&self, address: &str, timestamp: i64) {
        self.clock.observe(timestamp).await;
        self.remove_outstanding(address).await;
    }

    /// The target never answered. It counts as granted for this cycle so
    /// one crashed peer cannot block the rest; it stays configured and is
    /// contacted again next cycle.
    pub async fn record_unreachable(&self, address: &str) {
        self.remove_outstanding(address).await;
    }

    async fn remove_outstanding(&self, address: &str) {
        let mut outstanding = self.outstanding.lock().await;

        // only the removal that empties the set signals the waiter
        if outstanding.remove(address) && outstanding.is_empty() {
            self.all_replies.notify_one();
        }
    }

    /// Suspend until every outstanding reply has arrived or been written
    /// off as unreachable.
    pub async fn await_replies(&self) {
        loop {
            let all_received = self.all_replies.notified();
            if self.outstanding.lock().await.is_empty() {
                return;
            }
            all_received.await;
        }
    }

    /// Transition WANTED -> HELD. The outstanding set has been consumed by
    /// the time this runs.
    pub async fn enter_critical(&self) {
        let mut state = self.state.lock().await;

        if state.state != PeerState::Wanted {
            panic!(
                "Entered the critical section while in state {:?}.",
                state.state
            );
        }

        state.state = PeerState::Held;
        log::info(&cformat!(
            "State: <bold>WANTED -> HELD</bold> (TS: {}).",
            self.clock.now().await
        ));
    }

    /// Transition HELD -> RELEASED, wake every deferred requester and
    /// produce the advisory release to fan out. The deferred queue is empty
    /// again before this returns.
    pub async fn release(&self) -> AccessRelease {
        let deferred = {
            let mut state = self.state.lock().await;

            if state.state != PeerState::Held {
                panic!(
                    "Released the critical section while in state {:?}.",
                    state.state
                );
            }

            state.state = PeerState::Released;
            state.current_request = None;
            std::mem::take(&mut state.deferred)
        };

        log::info(&cformat!(
            "State: <bold>HELD -> RELEASED</bold>, waking <bold>{}</bold> deferred requester(s).",
            deferred.len()
        ));

        for reply in &deferred {
            log::info(&cformat!(
                "Waking the deferred request of client <bold>{}</bold>.",
                reply.client_id
            ));
            reply.token.notify_one();
        }

        let timestamp = self.clock.tick().await;
        AccessRelease {
            client_id: self.id,
            lamport_timestamp: timestamp,
        }
    }

    /// Inbound `RequestAccess`. Decides under the state lock, but waits on
    /// the suspension token with the lock released, so the holder can leave
    /// HELD while requests are parked here. The response is always
    /// affirmative; deferral only delays it.
    pub async fn handle_request(&self, request: AccessRequest) -> AccessResponse {
        self.clock.observe(request.lamport_timestamp).await;

        log::info(&cformat!(
            "Request from client <bold>{}</bold> (TS: {}, req #{}).",
            request.client_id,
            request.lamport_timestamp,
            request.request_number
        ));

        let theirs = RequestFingerprint {
            timestamp: request.lamport_timestamp,
            id: request.client_id,
        };

        let token = {
            let mut state = self.state.lock().await;

            match state.state {
                PeerState::Released => None,
                PeerState::Held => Some(Self::defer(&mut state, theirs)),
                PeerState::Wanted => match state.current_request {
                    Some(mine) if mine < theirs => Some(Self::defer(&mut state, theirs)),
                    _ => None,
                },
            }
        };

        if let Some(token) = token {
            token.notified().await;
            log::info(&cformat!(
                "Sending the deferred OK to client <bold>{}</bold>.",
                theirs.id
            ));
        } else {
            log::info(&cformat!(
                "Granting client <bold>{}</bold> immediately.",
                theirs.id
            ));
        }

        AccessResponse {
            access_granted: true,
            lamport_timestamp: self.clock.tick().await,
            responder_id: self.id,
        }
    }

    fn defer(state: &mut CoreState, theirs: RequestFingerprint) -> Arc<Notify> {
        log::info(&cformat!(
            "Defer from <bold>{}</bold> (I am {:?}).",
            theirs.id,
            state.state
        ));

        let token = Arc::new(Notify::new());
        state.deferred.push(DeferredReply {
            client_id: theirs.id,
            token: token.clone(),
        });
        token
    }

    /// Inbound `ReleaseAccess`. Purely advisory: deferred waiters were
    /// already granted through their tokens, so only the clock moves.
    pub async fn handle_release(&self, release: AccessRelease) {
        self.clock.observe(release.lamport_timestamp).await;
        log::info(&cformat!(
            "Client <bold>{}</bold> released the resource (TS: {}).",
            release.client_id,
            release.lamport_timestamp
        ));
    }
}
