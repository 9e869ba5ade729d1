pub mod delivery_cron;
pub mod tasks;
