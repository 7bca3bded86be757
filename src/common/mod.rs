pub mod config;
pub mod config_commands;
pub mod errors;
pub mod model;

pub use config::EngineConfig;
pub use errors::EngineError;
pub use model::{
    percentage_of, Direction, PeerInfo, SessionKey, TransferRecord, TransferStatus, UniquePaths,
};
