//! Game logic: rules and events, the modifier pool, round resolution,
//! the phase machine, and settlement.

pub mod catalog;
pub mod phase;
pub mod pool;
pub mod resolve;
pub mod score;
pub mod state;

pub use catalog::{PermanentRule, RoundEvent, RoundEventKind};
pub use phase::{Effect, GameError, MatchEngine};
pub use pool::ModifierPool;
pub use score::{settle, MatchRecord, Standing};
pub use state::{Match, Participant, ParticipantId, Phase};
