pub mod delivery;
pub mod generation;
pub mod messages;
pub mod schedules;
pub mod tones;
