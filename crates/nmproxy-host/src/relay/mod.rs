//! Transparent frame relay between two peers.

mod coordinator;
mod direction;
mod types;

pub use coordinator::DuplexRelay;
pub use direction::run_direction;
pub use types::{
    Direction, DirectionReport, ExitOutcome, RelayContext, RelayError, RelayLabels, RelayOptions,
    StreamPair, TerminationReason,
};
