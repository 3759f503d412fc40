pub mod config;
pub mod pipeline;
pub mod telegram_log;
