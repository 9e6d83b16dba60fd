mod handler;

pub use handler::update_live_state;
