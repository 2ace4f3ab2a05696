//! Moonhowl Engine
//!
//! Demo driver: runs a full lobby + round lifecycle against the
//! in-memory gateway, playing the roles of the ledger snapshot feed,
//! the external scheduler and the tally authority.

use std::sync::Arc;

use anyhow::Result;
use k256::elliptic_curve::rand_core::OsRng;
use k256::SecretKey;
use tracing::info;
use tracing_subscriber::EnvFilter;

use moonhowl::core::hash::hash_with_domain;
use moonhowl::engine::{Coordinator, EngineConfig};
use moonhowl::game::tally;
use moonhowl::game::types::{Phase, Snapshot};
use moonhowl::sched::{RecordingScheduler, Scheduler, TimerKey};
use moonhowl::store::MemoryStore;
use moonhowl::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Moonhowl Engine v{}", VERSION);

    demo_game().await
}

/// Demo function running one game end to end.
async fn demo_game() -> Result<()> {
    info!("=== Starting Demo Game ===");

    let tally_secret = SecretKey::random(&mut OsRng);
    let store = Arc::new(MemoryStore::new());
    let sched = Arc::new(RecordingScheduler::new());
    let coordinator = Coordinator::new(
        store.clone(),
        sched.clone() as Arc<dyn Scheduler>,
        Some(tally_secret.public_key()),
        EngineConfig::default(),
    );

    // Lobby assembly: created at block 100, six players join
    coordinator.create_lobby(1, 8, 100).await?;
    for i in 0..6u8 {
        let player_hash = hash_with_domain(b"MOONHOWL_DEMO_PLAYER", &[i]);
        coordinator.join_lobby(1, player_hash, 101 + i as u64).await?;
    }

    // Quorum timeout fires at block 250; six players keep it open
    for timer in sched.drain_due(250).await {
        if let TimerKey::Lobby { game_id } = timer {
            let outcome = coordinator.on_lobby_timeout(game_id, 250).await?;
            info!(?outcome, "lobby timeout");
        }
    }

    // External trigger: commit the roster and start the game
    let leaves: Vec<_> = (0..6u8)
        .map(|i| hash_with_domain(b"MOONHOWL_DEMO_LEAF", &[i]))
        .collect();
    coordinator.close_lobby(1).await?;
    coordinator.start_game(1, leaves, 2, 260).await?;

    // Night 1 snapshot opens the round
    let mut snap = Snapshot {
        game_id: 1,
        round: 1,
        phase: Phase::Night,
        alive: vec![0, 1, 2, 3, 4, 5],
        votes_submitted: 0,
        block_height: 261,
    };
    coordinator.process_snapshot(&snap).await?;

    // The werewolves seal their ballots (both target player 4)
    let mut ciphertexts = Vec::new();
    for werewolf in [0u8, 1] {
        let submitted = coordinator
            .submit_ballot(werewolf, 4, 1, Phase::Night, 1)
            .await?;
        info!(
            ciphertext = %hex::encode(&submitted.ciphertext[..8]),
            proof_depth = submitted.proof.depth(),
            "ballot submitted"
        );
        ciphertexts.push(submitted.ciphertext);
    }

    // Ledger counts the two submissions; snapshot reconciles
    snap.votes_submitted = 2;
    snap.block_height = 300;
    coordinator.process_snapshot(&snap).await?;

    // Tally authority opens and resolves
    let votes = tally::open_ballots(&tally_secret, &ciphertexts, 1);
    let outcome = coordinator.resolve_round(&votes, &snap.alive, Phase::Night, 1, 1);
    info!(?outcome, "night 1 resolved by tally authority");

    // Vote timeout fires at block 411; four villagers never act at
    // night, so the highest-indexed living players carry the fallout
    for timer in sched.drain_due(420).await {
        if let TimerKey::RoundVote {
            game_id,
            round,
            phase,
        } = timer
        {
            let outcome = coordinator.on_round_timeout(game_id, round, phase, 420).await?;
            info!(?outcome, "round timeout");
        }
    }

    info!("=== Demo Complete ===");
    Ok(())
}
