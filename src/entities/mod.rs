pub mod messages;
pub mod schedules;
