//! In-Memory Gateway
//!
//! BTreeMap-backed [`GameStore`] used by tests and the demo driver.
//! Iteration order is sorted, matching the ascending-index contract the
//! relational backend provides via ORDER BY.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::hash::Digest32;
use crate::game::types::{
    AliveRow, Game, GameId, LobbyPlayerRow, LobbyRecord, PlayerIdx, PunishReason, Punishment,
    RoundKey, RoundRecord,
};
use crate::store::{GameStore, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    games: BTreeMap<GameId, Game>,
    rounds: BTreeMap<RoundKey, RoundRecord>,
    alive: BTreeMap<RoundKey, BTreeSet<PlayerIdx>>,
    punishments: BTreeMap<(GameId, PlayerIdx, PunishReason), Punishment>,
    lobbies: BTreeMap<GameId, LobbyRecord>,
    lobby_players: BTreeMap<GameId, Vec<LobbyPlayerRow>>,
    roster_leaves: BTreeMap<GameId, Vec<Digest32>>,
}

/// In-memory [`GameStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn game(&self, game_id: GameId) -> StoreResult<Option<Game>> {
        Ok(self.inner.read().await.games.get(&game_id).cloned())
    }

    async fn upsert_game(&self, game: &Game) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .games
            .insert(game.game_id, game.clone());
        Ok(())
    }

    async fn round(&self, key: &RoundKey) -> StoreResult<Option<RoundRecord>> {
        Ok(self.inner.read().await.rounds.get(key).cloned())
    }

    async fn insert_round_if_absent(&self, record: &RoundRecord) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.rounds.contains_key(&record.key) {
            return Ok(false);
        }
        inner.rounds.insert(record.key, record.clone());
        Ok(true)
    }

    async fn set_round_votes(&self, key: &RoundKey, votes_submitted: u32) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let round = inner
            .rounds
            .get_mut(key)
            .ok_or_else(|| StoreError::Gateway(format!("no round row for {key}")))?;
        round.votes_submitted = votes_submitted;
        Ok(())
    }

    async fn mark_round_resolved(&self, key: &RoundKey) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let round = inner
            .rounds
            .get_mut(key)
            .ok_or_else(|| StoreError::Gateway(format!("no round row for {key}")))?;
        round.resolved = true;
        Ok(())
    }

    async fn insert_alive_row(&self, row: &AliveRow) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .alive
            .entry(row.key)
            .or_default()
            .insert(row.player_idx);
        Ok(())
    }

    async fn alive_rows(&self, key: &RoundKey) -> StoreResult<Vec<PlayerIdx>> {
        Ok(self
            .inner
            .read()
            .await
            .alive
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn queue_punishment(&self, punishment: &Punishment) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .punishments
            .entry((
                punishment.game_id,
                punishment.player_idx,
                punishment.reason,
            ))
            .or_insert_with(|| punishment.clone());
        Ok(())
    }

    async fn punishments(&self, game_id: GameId) -> StoreResult<Vec<Punishment>> {
        Ok(self
            .inner
            .read()
            .await
            .punishments
            .values()
            .filter(|p| p.game_id == game_id)
            .cloned()
            .collect())
    }

    async fn lobby(&self, game_id: GameId) -> StoreResult<Option<LobbyRecord>> {
        Ok(self.inner.read().await.lobbies.get(&game_id).cloned())
    }

    async fn insert_lobby_if_absent(&self, lobby: &LobbyRecord) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.lobbies.contains_key(&lobby.game_id) {
            return Ok(false);
        }
        inner.lobbies.insert(lobby.game_id, lobby.clone());
        Ok(true)
    }

    async fn set_lobby_player_count(&self, game_id: GameId, player_count: u32) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let lobby = inner
            .lobbies
            .get_mut(&game_id)
            .ok_or_else(|| StoreError::Gateway(format!("no lobby row for game {game_id}")))?;
        lobby.player_count = player_count;
        Ok(())
    }

    async fn close_lobby(&self, game_id: GameId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let lobby = inner
            .lobbies
            .get_mut(&game_id)
            .ok_or_else(|| StoreError::Gateway(format!("no lobby row for game {game_id}")))?;
        lobby.closed = true;
        Ok(())
    }

    async fn insert_lobby_player(&self, row: &LobbyPlayerRow) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let rows = inner.lobby_players.entry(row.game_id).or_default();
        if rows.iter().any(|r| r.player_hash == row.player_hash) {
            return Ok(false);
        }
        rows.push(row.clone());
        Ok(true)
    }

    async fn lobby_players(&self, game_id: GameId) -> StoreResult<Vec<LobbyPlayerRow>> {
        Ok(self
            .inner
            .read()
            .await
            .lobby_players
            .get(&game_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn roster_leaves(&self, game_id: GameId) -> StoreResult<Option<Vec<Digest32>>> {
        Ok(self.inner.read().await.roster_leaves.get(&game_id).cloned())
    }

    async fn put_roster_leaves(&self, game_id: GameId, leaves: &[Digest32]) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .roster_leaves
            .insert(game_id, leaves.to_vec());
        Ok(())
    }

    async fn overdue_rounds(
        &self,
        game_id: GameId,
        block_height: u64,
    ) -> StoreResult<Vec<RoundKey>> {
        Ok(self
            .inner
            .read()
            .await
            .rounds
            .values()
            .filter(|r| {
                r.key.game_id == game_id
                    && !r.resolved
                    && r.timeout_block.is_some_and(|t| t <= block_height)
            })
            .map(|r| r.key)
            .collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::Phase;

    fn round_key() -> RoundKey {
        RoundKey {
            game_id: 1,
            round: 1,
            phase: Phase::Night,
        }
    }

    #[tokio::test]
    async fn test_round_insert_is_idempotent() {
        let store = MemoryStore::new();
        let record = RoundRecord {
            key: round_key(),
            alive_count: 5,
            votes_submitted: 0,
            timeout_block: Some(150),
            resolved: false,
        };

        assert!(store.insert_round_if_absent(&record).await.unwrap());
        assert!(!store.insert_round_if_absent(&record).await.unwrap());

        // Replay never resets resolved
        store.mark_round_resolved(&record.key).await.unwrap();
        assert!(!store.insert_round_if_absent(&record).await.unwrap());
        assert!(store.round(&record.key).await.unwrap().unwrap().resolved);
    }

    #[tokio::test]
    async fn test_alive_rows_sorted_and_deduped() {
        let store = MemoryStore::new();
        for idx in [3u8, 0, 2, 2, 1] {
            store
                .insert_alive_row(&AliveRow {
                    key: round_key(),
                    player_idx: idx,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.alive_rows(&round_key()).await.unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_punishment_dedup() {
        let store = MemoryStore::new();
        let punishment = Punishment {
            game_id: 1,
            player_idx: 4,
            reason: PunishReason::MissedVote {
                round: 1,
                phase: Phase::Night,
            },
            created_at_block: 200,
            executed: false,
        };

        store.queue_punishment(&punishment).await.unwrap();
        store.queue_punishment(&punishment).await.unwrap();
        assert_eq!(store.punishments(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lobby_player_unique_per_hash() {
        let store = MemoryStore::new();
        let row = LobbyPlayerRow {
            game_id: 1,
            player_hash: [7u8; 32],
            joined_at_block: 101,
        };

        assert!(store.insert_lobby_player(&row).await.unwrap());
        assert!(!store.insert_lobby_player(&row).await.unwrap());
        assert_eq!(store.lobby_players(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overdue_rounds() {
        let store = MemoryStore::new();
        let record = RoundRecord {
            key: round_key(),
            alive_count: 5,
            votes_submitted: 2,
            timeout_block: Some(150),
            resolved: false,
        };
        store.insert_round_if_absent(&record).await.unwrap();

        assert!(store.overdue_rounds(1, 100).await.unwrap().is_empty());
        assert_eq!(store.overdue_rounds(1, 150).await.unwrap(), vec![round_key()]);

        store.mark_round_resolved(&round_key()).await.unwrap();
        assert!(store.overdue_rounds(1, 200).await.unwrap().is_empty());
    }
}
