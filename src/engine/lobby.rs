//! Lobby Lifecycle
//!
//! Parallel state machine for pre-game roster assembly:
//! `Open -> Closed` (terminal), or `Open -> (quorum timeout) ->
//! force-closed` with a request - only a request - for an external
//! admin action to close the game on-ledger. Every operation is
//! idempotent under redelivery.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::{EngineConfig, EngineError};
use crate::game::types::{
    BlockHeight, Game, GameId, LobbyPlayerRow, LobbyRecord, Phase,
};
use crate::sched::{Scheduler, TimerKey};
use crate::store::GameStore;

/// What creating a lobby did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LobbyOutcome {
    /// Lobby and game records created; quorum timeout scheduled.
    Created {
        /// Block the quorum timeout will fire at.
        timeout_block: BlockHeight,
    },
    /// Lobby already existed; duplicate creation event.
    AlreadyExists,
}

/// What a join attempt did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// New member; player count incremented.
    Joined {
        /// Player count after the join.
        player_count: u32,
    },
    /// Same (game, player_hash) already joined; no-op.
    AlreadyJoined,
    /// Lobby has closed; join ignored.
    LobbyClosed,
    /// No lobby row; benign out-of-order delivery.
    UnknownLobby,
}

/// External admin action requested (never executed) by this engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminAction {
    /// Close the under-quorum game on the ledger.
    CloseGame {
        /// Game to close.
        game_id: GameId,
    },
}

/// What a quorum-timeout fire did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LobbyTimeoutOutcome {
    /// No lobby row; benign duplicate-delivery race.
    MissingLobby,
    /// Lobby already closed; duplicate fire tolerated.
    AlreadyClosed,
    /// Below quorum; lobby force-closed and an admin action requested.
    ForceClosed {
        /// The requested external action.
        admin_action: AdminAction,
    },
    /// Quorum met; lobby stays open (game start is externally triggered).
    QuorumMet {
        /// Player count at the timeout.
        player_count: u32,
    },
}

/// Lobby state machine.
pub struct LobbyLifecycle {
    store: Arc<dyn GameStore>,
    scheduler: Arc<dyn Scheduler>,
    config: EngineConfig,
}

impl LobbyLifecycle {
    /// Wire the lifecycle to its gateway and scheduler.
    pub fn new(
        store: Arc<dyn GameStore>,
        scheduler: Arc<dyn Scheduler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            config,
        }
    }

    /// Create a lobby and its game record. Idempotent.
    pub async fn create(
        &self,
        game_id: GameId,
        max_players: u32,
        at_block: BlockHeight,
    ) -> Result<LobbyOutcome, EngineError> {
        let timeout_block = at_block + self.config.lobby_timeout_blocks;

        let created = self
            .store
            .insert_lobby_if_absent(&LobbyRecord {
                game_id,
                max_players,
                player_count: 0,
                created_at_block: at_block,
                timeout_block,
                closed: false,
            })
            .await?;
        if !created {
            debug!(game = game_id, block = at_block, "duplicate lobby creation");
            return Ok(LobbyOutcome::AlreadyExists);
        }

        if self.store.game(game_id).await?.is_none() {
            self.store
                .upsert_game(&Game {
                    game_id,
                    player_count: 0,
                    werewolf_count: 0,
                    created_at_block: at_block,
                    round: 0,
                    phase: Phase::Lobby,
                    alive: Vec::new(),
                    finished: false,
                })
                .await?;
        }

        self.scheduler
            .schedule(TimerKey::Lobby { game_id }, timeout_block)
            .await?;

        info!(
            game = game_id,
            max_players,
            block = at_block,
            timeout_block,
            "lobby created"
        );
        Ok(LobbyOutcome::Created { timeout_block })
    }

    /// Join a lobby. Idempotent per (game, player_hash).
    ///
    /// NOTE: `max_players` is deliberately not checked here - joins past
    /// capacity still count, matching the upstream contract's advisory
    /// capacity. Enforcing it would need an upstream ordering review.
    pub async fn join(
        &self,
        game_id: GameId,
        player_hash: [u8; 32],
        at_block: BlockHeight,
    ) -> Result<JoinOutcome, EngineError> {
        let Some(lobby) = self.store.lobby(game_id).await? else {
            warn!(game = game_id, block = at_block, "join for unknown lobby; no-op");
            return Ok(JoinOutcome::UnknownLobby);
        };
        if lobby.closed {
            warn!(
                game = game_id,
                player = %hex::encode(&player_hash[..4]),
                block = at_block,
                "join after lobby closed; ignored"
            );
            return Ok(JoinOutcome::LobbyClosed);
        }

        let inserted = self
            .store
            .insert_lobby_player(&LobbyPlayerRow {
                game_id,
                player_hash,
                joined_at_block: at_block,
            })
            .await?;
        if !inserted {
            debug!(
                game = game_id,
                player = %hex::encode(&player_hash[..4]),
                "duplicate join ignored"
            );
            return Ok(JoinOutcome::AlreadyJoined);
        }

        let player_count = lobby.player_count + 1;
        self.store
            .set_lobby_player_count(game_id, player_count)
            .await?;

        info!(
            game = game_id,
            player = %hex::encode(&player_hash[..4]),
            block = at_block,
            player_count,
            "player joined lobby"
        );
        Ok(JoinOutcome::Joined { player_count })
    }

    /// Close a lobby. Idempotent; closing an absent lobby is a no-op.
    pub async fn close(&self, game_id: GameId) -> Result<(), EngineError> {
        if self.store.lobby(game_id).await?.is_none() {
            warn!(game = game_id, "close for unknown lobby; no-op");
            return Ok(());
        }
        self.store.close_lobby(game_id).await?;
        info!(game = game_id, "lobby closed");
        Ok(())
    }

    /// Quorum timeout: force-close an under-quorum lobby.
    pub async fn on_timeout(
        &self,
        game_id: GameId,
        block_height: BlockHeight,
    ) -> Result<LobbyTimeoutOutcome, EngineError> {
        let Some(lobby) = self.store.lobby(game_id).await? else {
            warn!(game = game_id, block = block_height, "timeout for missing lobby; no-op");
            return Ok(LobbyTimeoutOutcome::MissingLobby);
        };

        if lobby.closed {
            debug!(game = game_id, block = block_height, "duplicate lobby timeout fire");
            return Ok(LobbyTimeoutOutcome::AlreadyClosed);
        }

        if lobby.player_count < self.config.lobby_min_players {
            self.store.close_lobby(game_id).await?;
            warn!(
                game = game_id,
                block = block_height,
                player_count = lobby.player_count,
                min_players = self.config.lobby_min_players,
                "lobby under quorum; force-closed, requesting on-ledger game close"
            );
            return Ok(LobbyTimeoutOutcome::ForceClosed {
                admin_action: AdminAction::CloseGame { game_id },
            });
        }

        // Quorum met: nothing changes; starting the game is an external
        // trigger, not ours
        debug!(
            game = game_id,
            block = block_height,
            player_count = lobby.player_count,
            "lobby quorum met at timeout"
        );
        Ok(LobbyTimeoutOutcome::QuorumMet {
            player_count: lobby.player_count,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
