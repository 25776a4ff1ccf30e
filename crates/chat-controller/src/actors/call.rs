//! `CallActor` - singleton call signaling coordinator.
//!
//! Owns every live call session and the peer-pair index. A session moves
//! Ringing -> Active -> ended, or Ringing -> ended via reject, hangup, or
//! ring timeout. Ended sessions are removed immediately, so signaling for
//! a finished call fails with an invalid-transition error instead of
//! acting on stale state.
//!
//! # Ring timeout
//!
//! Each invite arms a timer task holding a child cancellation token.
//! Answering, rejecting, or hanging up cancels the token, so the timeout
//! fires at most once and never after the call was resolved. The timeout
//! event travels through the actor mailbox like any other message, which
//! keeps all state transitions serialized.

use crate::errors::ChatError;

use super::messages::CallMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::{CallId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::registry::SessionRegistry;
use crate::transport::{CallMedia, ServerFrame};

/// Default channel buffer size for the call mailbox.
const CALL_CHANNEL_BUFFER: usize = 500;

/// State of a live call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Invite delivered, ring window running.
    Ringing,
    /// Callee accepted; media flows out of band.
    Active,
}

/// A live call session.
#[derive(Debug)]
struct CallSession {
    caller_id: UserId,
    callee_id: UserId,
    media: CallMedia,
    state: CallState,
    /// Cancelling this token disarms the ring timer.
    ring_timer: CancellationToken,
}

/// Normalized peer-pair key; invites in either direction collide.
fn pair_key(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Handle to the `CallActor`.
#[derive(Clone, Debug)]
pub struct CallHandle {
    sender: mpsc::Sender<CallMessage>,
    cancel_token: CancellationToken,
}

impl CallHandle {
    /// Invite `callee_id` to a call. Returns the new call ID.
    pub async fn invite(
        &self,
        caller_id: UserId,
        callee_id: UserId,
        media: CallMedia,
    ) -> Result<CallId, ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CallMessage::Invite {
                caller_id,
                callee_id,
                media,
                respond_to: tx,
            })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))?
    }

    /// Accept a ringing call (callee only).
    pub async fn accept(&self, call_id: CallId, user_id: UserId) -> Result<(), ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CallMessage::Accept {
                call_id,
                user_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))?
    }

    /// Reject a ringing call (callee only).
    pub async fn reject(&self, call_id: CallId, user_id: UserId) -> Result<(), ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CallMessage::Reject {
                call_id,
                user_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))?
    }

    /// Hang up a ringing or active call (either party).
    pub async fn hangup(&self, call_id: CallId, user_id: UserId) -> Result<(), ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CallMessage::Hangup {
                call_id,
                user_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))?
    }

    /// Current state of a call, or None if it has ended.
    pub async fn get_state(&self, call_id: CallId) -> Result<Option<CallState>, ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CallMessage::GetState {
                call_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))
    }

    /// Media kind of a call, or None if it has ended.
    pub async fn get_media(&self, call_id: CallId) -> Result<Option<CallMedia>, ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CallMessage::GetMedia {
                call_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the call actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `CallActor` implementation.
pub struct CallActor {
    /// Message receiver.
    receiver: mpsc::Receiver<CallMessage>,
    /// Own sender, cloned into ring timer tasks.
    self_sender: mpsc::Sender<CallMessage>,
    /// Cancellation token (child of controller's token).
    cancel_token: CancellationToken,
    /// Live sessions by call ID.
    calls: HashMap<CallId, CallSession>,
    /// Normalized peer pair -> live call ID.
    by_pair: HashMap<(UserId, UserId), CallId>,
    /// Registry for user-addressed signaling delivery.
    registry: Arc<SessionRegistry>,
    /// Ring window before an unanswered invite times out.
    ring_window: Duration,
    /// Shared actor metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl CallActor {
    /// Spawn the call coordinator.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        cancel_token: CancellationToken,
        registry: Arc<SessionRegistry>,
        ring_window: Duration,
        metrics: Arc<ActorMetrics>,
    ) -> (CallHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CALL_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            calls: HashMap::new(),
            by_pair: HashMap::new(),
            registry,
            ring_window,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Call, "call-coordinator"),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CallHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "chat.actor.call")]
    async fn run(mut self) {
        info!(target: "chat.actor.call", "CallActor started");

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "chat.actor.call",
                        live_calls = self.calls.len(),
                        "CallActor received cancellation signal"
                    );
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(target: "chat.actor.call", "CallActor channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "chat.actor.call",
            messages_processed = self.mailbox.messages_processed(),
            "CallActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: CallMessage) {
        match message {
            CallMessage::Invite {
                caller_id,
                callee_id,
                media,
                respond_to,
            } => {
                let result = self.handle_invite(caller_id, callee_id, media);
                let _ = respond_to.send(result);
            }

            CallMessage::Accept {
                call_id,
                user_id,
                respond_to,
            } => {
                let result = self.handle_accept(call_id, user_id);
                let _ = respond_to.send(result);
            }

            CallMessage::Reject {
                call_id,
                user_id,
                respond_to,
            } => {
                let result = self.handle_reject(call_id, user_id);
                let _ = respond_to.send(result);
            }

            CallMessage::Hangup {
                call_id,
                user_id,
                respond_to,
            } => {
                let result = self.handle_hangup(call_id, user_id);
                let _ = respond_to.send(result);
            }

            CallMessage::RingTimeout { call_id } => {
                self.handle_ring_timeout(call_id);
            }

            CallMessage::GetState {
                call_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.calls.get(&call_id).map(|s| s.state));
            }

            CallMessage::GetMedia {
                call_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.calls.get(&call_id).map(|s| s.media));
            }
        }
    }

    /// Start a new call, or reject a duplicate for the peer pair.
    #[instrument(skip_all, fields(caller_id = %caller_id, callee_id = %callee_id))]
    fn handle_invite(
        &mut self,
        caller_id: UserId,
        callee_id: UserId,
        media: CallMedia,
    ) -> Result<CallId, ChatError> {
        if caller_id == callee_id {
            return Err(ChatError::InvalidTransition(
                "cannot call yourself".to_string(),
            ));
        }

        let key = pair_key(caller_id, callee_id);
        if self.by_pair.contains_key(&key) {
            debug!(
                target: "chat.actor.call",
                "Duplicate invite for peer pair"
            );
            return Err(ChatError::DuplicateInvite);
        }

        let call_id = CallId::new();
        let ring_timer = self.cancel_token.child_token();

        self.calls.insert(
            call_id,
            CallSession {
                caller_id,
                callee_id,
                media,
                state: CallState::Ringing,
                ring_timer: ring_timer.clone(),
            },
        );
        self.by_pair.insert(key, call_id);
        self.metrics.call_started();

        // Arm the ring timer. Resolving the call cancels the token, so the
        // timeout message is sent at most once.
        let sender = self.self_sender.clone();
        let ring_window = self.ring_window;
        tokio::spawn(async move {
            tokio::select! {
                () = ring_timer.cancelled() => {}
                () = tokio::time::sleep(ring_window) => {
                    let _ = sender.send(CallMessage::RingTimeout { call_id }).await;
                }
            }
        });

        // Ring every device the callee has. An offline callee still rings
        // out the window; the caller learns the outcome via timeout.
        let delivered = self.registry.deliver_to_user(
            callee_id,
            &ServerFrame::CallInvite {
                call_id,
                caller_id,
                media,
            },
        );
        info!(
            target: "chat.actor.call",
            call_id = %call_id,
            callee_devices = delivered,
            "Call ringing"
        );

        Ok(call_id)
    }

    /// Callee accepts: Ringing -> Active.
    #[instrument(skip_all, fields(call_id = %call_id, user_id = %user_id))]
    fn handle_accept(&mut self, call_id: CallId, user_id: UserId) -> Result<(), ChatError> {
        let session = self.calls.get_mut(&call_id).ok_or_else(|| {
            // Ended sessions are removed, so a late accept lands here
            ChatError::InvalidTransition("call already ended".to_string())
        })?;

        if session.state != CallState::Ringing {
            return Err(ChatError::InvalidTransition(
                "call is not ringing".to_string(),
            ));
        }
        if user_id != session.callee_id {
            return Err(ChatError::InvalidTransition(
                "only the callee can accept".to_string(),
            ));
        }

        let caller_id = session.caller_id;
        let callee_id = session.callee_id;

        // The caller dropped every connection while the callee was ringing.
        // Going active would connect the callee to nobody; resolve the
        // session as unanswered instead.
        if !self.registry.is_online(caller_id) {
            self.end_call(call_id);
            self.registry
                .deliver_to_user(callee_id, &ServerFrame::CallTimeout { call_id });
            info!(
                target: "chat.actor.call",
                call_id = %call_id,
                "Accept with caller offline, call resolved as unanswered"
            );
            return Err(ChatError::InvalidTransition(
                "caller is no longer connected".to_string(),
            ));
        }

        session.ring_timer.cancel();
        session.state = CallState::Active;

        self.registry
            .deliver_to_user(caller_id, &ServerFrame::CallAccepted { call_id });

        info!(target: "chat.actor.call", call_id = %call_id, "Call active");
        Ok(())
    }

    /// Callee rejects: Ringing -> ended.
    #[instrument(skip_all, fields(call_id = %call_id, user_id = %user_id))]
    fn handle_reject(&mut self, call_id: CallId, user_id: UserId) -> Result<(), ChatError> {
        let session = self
            .calls
            .get(&call_id)
            .ok_or_else(|| ChatError::InvalidTransition("call already ended".to_string()))?;

        if session.state != CallState::Ringing {
            return Err(ChatError::InvalidTransition(
                "call is not ringing".to_string(),
            ));
        }
        if user_id != session.callee_id {
            return Err(ChatError::InvalidTransition(
                "only the callee can reject".to_string(),
            ));
        }

        let caller_id = session.caller_id;
        self.end_call(call_id);
        self.registry
            .deliver_to_user(caller_id, &ServerFrame::CallRejected { call_id });

        info!(target: "chat.actor.call", call_id = %call_id, "Call rejected");
        Ok(())
    }

    /// Either party hangs up a ringing or active call.
    #[instrument(skip_all, fields(call_id = %call_id, user_id = %user_id))]
    fn handle_hangup(&mut self, call_id: CallId, user_id: UserId) -> Result<(), ChatError> {
        let session = self
            .calls
            .get(&call_id)
            .ok_or_else(|| ChatError::CallNotFound(call_id.to_string()))?;

        if user_id != session.caller_id && user_id != session.callee_id {
            return Err(ChatError::InvalidTransition(
                "not a party to this call".to_string(),
            ));
        }

        // Notify the other party
        let other = if user_id == session.caller_id {
            session.callee_id
        } else {
            session.caller_id
        };

        self.end_call(call_id);
        self.registry
            .deliver_to_user(other, &ServerFrame::CallHungUp { call_id });

        info!(target: "chat.actor.call", call_id = %call_id, "Call hung up");
        Ok(())
    }

    /// Ring window elapsed without an answer.
    #[instrument(skip_all, fields(call_id = %call_id))]
    fn handle_ring_timeout(&mut self, call_id: CallId) {
        let Some(session) = self.calls.get(&call_id) else {
            // Resolved between timer fire and mailbox processing
            return;
        };

        if session.state != CallState::Ringing {
            return;
        }

        let caller_id = session.caller_id;
        self.end_call(call_id);
        self.registry
            .deliver_to_user(caller_id, &ServerFrame::CallTimeout { call_id });

        info!(target: "chat.actor.call", call_id = %call_id, "Call timed out unanswered");
    }

    /// Remove a session and its pair index entry, disarming the timer.
    fn end_call(&mut self, call_id: CallId) {
        if let Some(session) = self.calls.remove(&call_id) {
            session.ring_timer.cancel();
            self.by_pair
                .remove(&pair_key(session.caller_id, session.callee_id));
            self.metrics.call_ended();
        } else {
            warn!(
                target: "chat.actor.call",
                call_id = %call_id,
                "end_call for unknown session"
            );
        }
    }
}
