pub mod app;
pub mod cli;
pub mod config;
pub mod diff;
pub mod history;
pub mod input;
pub mod logging;
pub mod paths;
pub mod scheduler;
pub mod secrets;
pub mod status;
pub mod transform;

pub use app::ClipswapApp;
pub use config::{Config, ConfigManager, Profile, Rule};
pub use history::{DiffPair, HistoryManager, RevertState};
pub use secrets::SecretResolver;
pub use status::StatusWriter;
pub use transform::{
    transform_text, Direction, RevertOutcome, RevertRequest, Transformation, TransformationEngine,
};
