//! Core primitives shared by the game engine.

pub mod rng;

pub use rng::{derive_match_seed, MatchRng};
