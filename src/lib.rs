pub mod api;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod providers;
pub mod service;
pub mod storage;
pub mod types;
pub mod world;

pub use config::{Config, EngineSettings};
pub use error::DungeonError;
pub use service::DungeonService;
pub use types::*;
pub use world::WorldModel;
