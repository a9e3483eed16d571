pub mod bridge;
pub mod config;
pub mod console_display;
pub mod error;
pub mod gesture;
pub mod harmony;
pub mod landmark_reader;
pub mod mapping;
pub mod melody;
pub mod output;
pub mod performer;
pub mod session;
pub mod simulator;
pub mod types;
pub mod ws_server;

pub use error::{Error, Result};
