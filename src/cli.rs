pub mod app;
pub mod commands;
pub mod setup;

pub use app::build_engine;
pub use commands::{Command, exit_code, run};
