pub mod delivery;
pub mod messages;
pub mod schedules;
pub mod tones;
