// 内置数据源

pub mod commands;
pub mod live_state;
pub mod runtime;
pub mod system;

pub use commands::CommandsProvider;
pub use live_state::{LiveState, LiveStateProvider, LiveStateReport};
pub use runtime::RuntimeProvider;
pub use system::SystemProvider;
