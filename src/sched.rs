//! Block-Height Timers
//!
//! Interface to the external scheduler. The contract is weak on purpose:
//! a requested timer fires at or after its deadline, at least once,
//! possibly more than once, and in rare failure modes not at all. Every
//! consumer tolerates duplicate fires, and the round sweep backstops a
//! lost fire.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::game::types::{BlockHeight, GameId, Phase};

/// Logical input carried by a deferred callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimerKey {
    /// Fires the vote timeout of one round.
    RoundVote {
        /// Owning game.
        game_id: GameId,
        /// Round number.
        round: u8,
        /// Voting phase.
        phase: Phase,
    },
    /// Fires the quorum timeout of one lobby.
    Lobby {
        /// Owning game.
        game_id: GameId,
    },
}

impl TimerKey {
    /// Wire encoding handed to the external scheduler.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode a callback payload back into its logical input.
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Scheduler request failure. Fatal for the event being processed,
/// same as a gateway failure.
#[derive(Debug, Clone, Error)]
pub enum SchedError {
    /// The schedule request could not be submitted.
    #[error("scheduler request failed: {0}")]
    Request(String),
}

/// Deferred-callback scheduler owned by an external component.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Request that `key` be delivered back at or after `fire_at_block`.
    async fn schedule(&self, key: TimerKey, fire_at_block: BlockHeight) -> Result<(), SchedError>;
}

/// Recording scheduler for tests and the demo driver.
///
/// Stores requests and drains the ones due at a given height so a test
/// can play the external scheduler's role - including delivering a
/// timer twice.
#[derive(Default)]
pub struct RecordingScheduler {
    pending: Mutex<Vec<(TimerKey, BlockHeight)>>,
}

impl RecordingScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// All requests made so far, in request order.
    pub async fn requests(&self) -> Vec<(TimerKey, BlockHeight)> {
        self.pending.lock().await.clone()
    }

    /// Remove and return the timers due at `block_height`.
    pub async fn drain_due(&self, block_height: BlockHeight) -> Vec<TimerKey> {
        let mut pending = self.pending.lock().await;
        let (due, rest): (Vec<_>, Vec<_>) = pending
            .drain(..)
            .partition(|(_, fire_at)| *fire_at <= block_height);
        *pending = rest;
        due.into_iter().map(|(key, _)| key).collect()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn schedule(&self, key: TimerKey, fire_at_block: BlockHeight) -> Result<(), SchedError> {
        self.pending.lock().await.push((key, fire_at_block));
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
