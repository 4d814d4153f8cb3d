//! # Diminish Game Server
//!
//! Authoritative server for a round-based number-elimination game.
//! Participants submit a value each round; the one closest to the
//! weighted average times the multiplier wins, everyone else bleeds
//! hit points, and each elimination activates a new permanent rule
//! until one survivor remains.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DIMINISH SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │                                                              │
//! │  game/           - Game logic (deterministic)                │
//! │  ├── catalog.rs  - Permanent rules and round events          │
//! │  ├── pool.rs     - Undrawn-rule pool and event selection     │
//! │  ├── resolve.rs  - Round resolution                          │
//! │  ├── phase.rs    - Phase machine and timers                  │
//! │  ├── score.rs    - Settlement and standings                  │
//! │  └── state.rs    - Match and participant state               │
//! │                                                              │
//! │  net/            - Networking (non-deterministic)            │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Wire messages and views                   │
//! │  └── registry.rs - Match actors and the 1 Hz scheduler       │
//! │                                                              │
//! │  store.rs        - Match records and the score ledger        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! `core/` and `game/` take no input from the clock or the network:
//! all randomness flows from one seeded Xorshift128+ stream per match
//! and participants iterate in BTreeMap order, so a match replays
//! identically from its seed and command sequence. Time only enters
//! through the `net/` scheduler, which feeds the phase machine
//! one-second ticks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod net;
pub mod store;

// Re-export commonly used types
pub use core::rng::{derive_match_seed, MatchRng};
pub use game::catalog::{PermanentRule, RoundEvent, RoundEventKind};
pub use game::phase::{Effect, GameError, MatchEngine};
pub use game::score::MatchRecord;
pub use game::state::{Match, Participant, ParticipantId, Phase};
pub use net::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Starting and maximum hit points.
pub const MAX_HP: i32 = 10;

/// Default target multiplier.
pub const DEFAULT_MULTIPLIER: f64 = 0.8;

/// Fewest participants a match can start with.
pub const MIN_PARTICIPANTS: usize = 3;

/// Most participants a match can hold.
pub const MAX_PARTICIPANTS: usize = 8;
