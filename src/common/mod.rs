pub mod context;
pub mod env;
pub mod error;
pub mod init;
pub mod redis_pool;
pub mod state;
pub mod tone_catalog;

#[cfg(test)]
pub(crate) mod testing;
