pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;

pub use config::EngineConfig;
pub use engine::TutorEngine;
