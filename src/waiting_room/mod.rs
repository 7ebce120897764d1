/// Waiting Room Admission Engine
pub mod engine;
pub mod models;

pub use engine::{PollResult, WaitingRoomEngine, WaitingScope};
pub use models::{WaitingPatient, WaitingStatus};
