use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use crate::update::StatusUpdate;

type Senders = Vec<(u64, mpsc::UnboundedSender<StatusUpdate>)>;

/// Per-execution fan-out of status updates.
#[derive(Default)]
pub(crate) struct Subscribers {
  next_id: AtomicU64,
  // Unbounded so a slow subscriber never stalls the update path. Volume is
  // a handful of updates per step.
  channels: Mutex<HashMap<String, Senders>>,
}

impl Subscribers {
  pub(crate) fn subscribe(self: &Arc<Self>, execution_id: &str) -> Subscription {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let (sender, receiver) = mpsc::unbounded_channel();

    self
      .channels
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(execution_id.to_string())
      .or_default()
      .push((id, sender));

    Subscription {
      id,
      execution_id: execution_id.to_string(),
      receiver,
      registry: Arc::downgrade(self),
    }
  }

  /// Send to every live subscriber of the update's execution.
  pub(crate) fn forward(&self, update: &StatusUpdate) {
    let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(senders) = channels.get_mut(&update.execution_id) {
      senders.retain(|(_, sender)| sender.send(update.clone()).is_ok());
      if senders.is_empty() {
        channels.remove(&update.execution_id);
      }
    }
  }

  /// Drop every subscriber of an execution. Their streams end.
  pub(crate) fn close(&self, execution_id: &str) {
    self
      .channels
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(execution_id);
  }

  fn remove(&self, execution_id: &str, id: u64) {
    let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(senders) = channels.get_mut(execution_id) {
      senders.retain(|(sender_id, _)| *sender_id != id);
      if senders.is_empty() {
        channels.remove(execution_id);
      }
    }
  }

  #[cfg(test)]
  fn count(&self, execution_id: &str) -> usize {
    self
      .channels
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(execution_id)
      .map_or(0, Vec::len)
  }
}

/// Status updates for one execution, in the order the orchestrator applied
/// them.
///
/// Ends when unsubscribed, dropped, or when the execution is purged.
pub struct Subscription {
  id: u64,
  execution_id: String,
  receiver: mpsc::UnboundedReceiver<StatusUpdate>,
  registry: Weak<Subscribers>,
}

impl Subscription {
  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  /// Wait for the next update. `None` once the subscription has ended.
  pub async fn recv(&mut self) -> Option<StatusUpdate> {
    self.receiver.recv().await
  }

  pub fn try_recv(&mut self) -> Option<StatusUpdate> {
    self.receiver.try_recv().ok()
  }

  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(registry) = self.registry.upgrade() {
      registry.remove(&self.execution_id, self.id);
    }
  }
}

impl Stream for Subscription {
  type Item = StatusUpdate;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.receiver.poll_recv(cx)
  }
}

/// Handle for a callback registered with
/// [`Orchestrator::on_update`](crate::Orchestrator::on_update).
///
/// The callback stops when this is unsubscribed or dropped.
pub struct Unsubscribe {
  _guard: DropGuard,
}

impl Unsubscribe {
  pub(crate) fn new(guard: DropGuard) -> Self {
    Self { _guard: guard }
  }

  pub fn unsubscribe(self) {}
}
