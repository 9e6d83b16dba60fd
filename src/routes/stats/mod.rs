mod handler;

pub use handler::{get_section, get_stats, refresh_stats};
