pub mod commands;
pub mod common;
pub mod engine;
pub mod events;
pub mod notify;
pub mod session;
pub mod transfer;
pub mod utils;

pub use commands::{ChannelTransport, SessionCommandFacade, TransportCommand, TransportCommands};
pub use common::{Direction, EngineConfig, EngineError, PeerInfo, SessionKey, TransferRecord, TransferStatus};
pub use engine::Engine;
pub use events::{TransportCallbacks, TransportEvent};
pub use notify::Subscription;
