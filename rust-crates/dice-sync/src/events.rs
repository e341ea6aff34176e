use crate::config::{
    EVENT_POLL_INTERVAL,
    RESULT_HISTORY_CAPACITY,
};
use alloy::primitives::{
    Address,
    TxHash,
    U256,
};
use chrono::{
    DateTime,
    Utc,
};
use futures::Stream;
use generated_abi::rolled_face;
use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    task::{
        Context,
        Poll,
    },
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Won,
    Lost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlayerWon,
    PlayerLost,
}

/// A decoded contract event as it comes off the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameEvent {
    PlayerWon {
        player: Address,
        bet_amount: U256,
        winning_amount: U256,
        rolled_number: U256,
        tx_hash: Option<TxHash>,
    },
    PlayerLost {
        player: Address,
        bet_amount: U256,
        rolled_number: U256,
        tx_hash: Option<TxHash>,
    },
}

impl GameEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GameEvent::PlayerWon { .. } => EventKind::PlayerWon,
            GameEvent::PlayerLost { .. } => EventKind::PlayerLost,
        }
    }

    pub fn player(&self) -> Address {
        match self {
            GameEvent::PlayerWon { player, .. } | GameEvent::PlayerLost { player, .. } => *player,
        }
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            GameEvent::PlayerWon { tx_hash, .. } | GameEvent::PlayerLost { tx_hash, .. } => {
                *tx_hash
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameResult {
    pub player: Address,
    pub outcome: Outcome,
    pub bet_amount: U256,
    pub winning_amount: Option<U256>,
    pub rolled_number: u8,
    pub transaction_hash: Option<TxHash>,
    pub observed_at: DateTime<Utc>,
}

impl GameResult {
    /// `None` when the rolled number is not a die face.
    pub fn from_event(event: &GameEvent, observed_at: DateTime<Utc>) -> Option<Self> {
        let (outcome, bet_amount, winning_amount, rolled) = match event {
            GameEvent::PlayerWon {
                bet_amount,
                winning_amount,
                rolled_number,
                ..
            } => (Outcome::Won, *bet_amount, Some(*winning_amount), *rolled_number),
            GameEvent::PlayerLost {
                bet_amount,
                rolled_number,
                ..
            } => (Outcome::Lost, *bet_amount, None, *rolled_number),
        };
        Some(Self {
            player: event.player(),
            outcome,
            bet_amount,
            winning_amount,
            rolled_number: rolled_face(rolled)?,
            transaction_hash: event.tx_hash(),
            observed_at,
        })
    }
}

/// Produces batches of contract events in chain order.
pub trait EventSource: Send + 'static {
    fn next_event_batch(
        &mut self,
    ) -> impl Future<Output = anyhow::Result<Vec<GameEvent>>> + Send;
}

/// Filters the shared won/lost streams down to the effective address.
#[derive(Debug)]
pub struct EventCorrelator {
    effective_address: Option<Address>,
    latest: Option<GameResult>,
    history: VecDeque<GameResult>,
    capacity: usize,
}

impl Default for EventCorrelator {
    fn default() -> Self {
        Self::new(RESULT_HISTORY_CAPACITY)
    }
}

impl EventCorrelator {
    pub fn new(capacity: usize) -> Self {
        Self {
            effective_address: None,
            latest: None,
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn effective_address(&self) -> Option<Address> {
        self.effective_address
    }

    /// Retargets the filter. Results of the previous address are dropped.
    pub fn set_effective_address(&mut self, address: Option<Address>) {
        if self.effective_address != address {
            self.effective_address = address;
            self.latest = None;
            self.history.clear();
        }
    }

    /// Applies one batch and returns the results accepted from it, oldest first.
    pub fn ingest(&mut self, batch: &[GameEvent]) -> Vec<GameResult> {
        let Some(me) = self.effective_address else {
            tracing::trace!(events = batch.len(), "no effective address; batch dropped");
            return Vec::new();
        };

        let mut accepted = Vec::new();
        for event in batch {
            if event.player() != me {
                tracing::trace!(player = %event.player(), "event for another player");
                continue;
            }
            let Some(result) = GameResult::from_event(event, Utc::now()) else {
                tracing::warn!(?event, "event carries a rolled number outside 1..=6; dropped");
                continue;
            };
            tracing::debug!(outcome = ?result.outcome, rolled = result.rolled_number, "game result");
            self.history.push_front(result.clone());
            self.history.truncate(self.capacity);
            self.latest = Some(result.clone());
            accepted.push(result);
        }
        accepted
    }

    pub fn latest(&self) -> Option<&GameResult> {
        self.latest.as_ref()
    }

    /// Newest first.
    pub fn history(&self) -> impl Iterator<Item = &GameResult> {
        self.history.iter()
    }

    pub fn clear_latest(&mut self) {
        self.latest = None;
    }
}

/// A running subscription to an [`EventSource`], also usable as a [`Stream`] of batches.
/// Dropping it stops the forwarding task.
pub struct EventSubscription {
    receiver: Option<mpsc::Receiver<Vec<GameEvent>>>,
    task: JoinHandle<()>,
}

impl EventSubscription {
    pub fn spawn<S: EventSource>(mut source: S, kinds: &[EventKind]) -> Self {
        let kinds = kinds.to_vec();
        let (sender, receiver) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            loop {
                match source.next_event_batch().await {
                    Ok(batch) => {
                        let batch: Vec<_> = batch
                            .into_iter()
                            .filter(|event| kinds.contains(&event.kind()))
                            .collect();
                        if batch.is_empty() {
                            continue;
                        }
                        if sender.send(batch).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "event source failed; retrying");
                        tokio::time::sleep(EVENT_POLL_INTERVAL).await;
                    }
                }
            }
            tracing::debug!("event subscription closed");
        });
        Self {
            receiver: Some(receiver),
            task,
        }
    }

    /// Waits for the next batch. `None` once unsubscribed.
    pub async fn next_batch(&mut self) -> Option<Vec<GameEvent>> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }

    pub fn unsubscribe(&mut self) {
        self.task.abort();
        self.receiver = None;
    }
}

impl Stream for EventSubscription {
    type Item = Vec<GameEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
