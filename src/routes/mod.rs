pub mod commands;
pub mod live_state;
pub mod monitoring;
pub mod stats;
