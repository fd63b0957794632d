//! Per-request progress broadcaster
//!
//! Assigns sequence numbers and forwards events to the request's stream in
//! one critical section, so the order a subscriber observes is the order
//! numbers were handed out. Sending never waits: the stream channel is
//! unbounded and a dropped subscriber does not stall the pipeline.

use futures::Stream;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::bus::{RequestEvent, SharedEventBus};
use super::types::{ProgressEvent, ProgressPayload};
use crate::state::types::RequestId;

struct BroadcastState {
    next_seq: u64,
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
    emitted: usize,
}

pub struct ProgressBroadcaster {
    request_id: RequestId,
    state: Mutex<BroadcastState>,
    bus: Option<SharedEventBus>,
}

impl ProgressBroadcaster {
    /// Broadcaster and the stream its events arrive on
    pub fn channel(request_id: impl Into<RequestId>) -> (Self, ProgressStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let broadcaster = Self {
            request_id: request_id.into(),
            state: Mutex::new(BroadcastState {
                next_seq: 1,
                sender: Some(sender),
                emitted: 0,
            }),
            bus: None,
        };
        (broadcaster, ProgressStream { receiver })
    }

    /// Also publish every event on a process-wide bus
    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Sequence and forward one event. Returns its sequence number, or
    /// `None` once a terminal event has been emitted.
    pub fn emit(&self, payload: ProgressPayload) -> Option<u64> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let sender = state.sender.as_ref()?;

        let seq = state.next_seq;
        let event = ProgressEvent { seq, payload };
        let terminal = event.is_terminal();
        trace!(request_id = %self.request_id, seq, event_type = event.event_type(), "Emitting");

        if let Some(bus) = &self.bus {
            bus.publish(RequestEvent {
                request_id: self.request_id.clone(),
                event: event.clone(),
            });
        }
        if sender.send(event).is_err() {
            debug!(request_id = %self.request_id, seq, "Progress subscriber gone");
        }

        state.next_seq += 1;
        state.emitted += 1;
        if terminal {
            // Dropping the sender ends the stream
            state.sender = None;
        }
        Some(seq)
    }

    pub fn is_terminated(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .sender
            .is_none()
    }

    /// Events emitted so far
    pub fn emitted(&self) -> usize {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).emitted
    }
}

/// Ordered progress events of one request; ends after the terminal event
#[derive(Debug)]
pub struct ProgressStream {
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
    /// Next event, `None` after the terminal one
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
