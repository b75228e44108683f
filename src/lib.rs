pub mod chord;
pub mod config;
pub mod console_display;
pub mod data_logger;
pub mod engine;
pub mod error;
pub mod harmony;
pub mod melody;
pub mod orchestrator;
pub mod osc_sender;
pub mod random;
pub mod rhythm;
pub mod scale;
pub mod scheduler;
pub mod simulator;
pub mod sink;
mod textures;
pub mod types;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{ConfigError, EngineError, SinkError};
pub use sink::{ChordObserver, EventSink, NoteObserver};
