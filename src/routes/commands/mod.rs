mod handler;
mod model;

pub use handler::record_command;
pub use model::RecordCommandResponse;
