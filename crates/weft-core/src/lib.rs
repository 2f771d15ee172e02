pub mod config;
pub mod error;
pub mod event;
pub mod run;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, WeftError};
pub use event::{EngineEvent, EventBus};
pub use run::RunRecord;
pub use types::*;
