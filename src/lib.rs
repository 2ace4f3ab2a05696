//! # Moonhowl Engine
//!
//! Round-based voting and lifecycle engine for Moonhowl, an elimination-style
//! social-deduction game with anonymity-preserving votes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MOONHOWL ENGINE                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── hash.rs     - SHA-256 digests with domain separation    │
//! │  └── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │                                                              │
//! │  crypto/         - Ballot secrecy and membership             │
//! │  ├── merkle.rs   - Fixed-depth roster membership tree        │
//! │  └── ballot.rs   - Vote packing and sealed ballots           │
//! │                                                              │
//! │  game/           - Game records and tallying                 │
//! │  ├── types.rs    - Game/Round/Lobby/Punishment records       │
//! │  └── tally.rs    - Phase-aware vote resolution               │
//! │                                                              │
//! │  engine/         - Lifecycle state machines                  │
//! │  ├── round.rs    - Round open / reconcile / timeout          │
//! │  └── lobby.rs    - Lobby assembly and quorum timeout         │
//! │                                                              │
//! │  store/          - Persistence gateway interface             │
//! │  sched.rs        - Block-height timer interface              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! Everything an observer needs to reproduce an outcome is public:
//! - Round timeouts are block heights, never wall-clock time
//! - Timeout fallout selects the highest-indexed living players
//! - Night tie-breaks draw from a PRNG seeded by public round values
//! - No HashMap in any decision path (BTreeMap for sorted iteration)
//!
//! Ballot contents stay hidden from everyone but the tally authority;
//! eligibility is proven by Merkle membership without revealing position.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod crypto;
pub mod engine;
pub mod game;
pub mod sched;
pub mod store;

// Re-export commonly used types
pub use crate::core::hash::Digest32;
pub use crate::core::rng::DeterministicRng;
pub use crate::crypto::ballot::{BallotPlaintext, SubmittedBallot};
pub use crate::crypto::merkle::{MembershipProof, MembershipTree};
pub use crate::engine::{Coordinator, EngineConfig};
pub use crate::game::tally::TallyOutcome;
pub use crate::game::types::{GameId, Phase, Snapshot};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Blocks a voting round stays open before missed votes are resolved.
pub const VOTE_TIMEOUT_BLOCKS: u64 = 150;

/// Blocks a lobby stays open before the quorum check fires.
pub const LOBBY_TIMEOUT_BLOCKS: u64 = 150;

/// Minimum players for a lobby to survive its quorum timeout.
pub const LOBBY_MIN_PLAYERS: u32 = 5;
