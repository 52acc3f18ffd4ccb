// crates/tether-client/src/lib.rs
// Client library for keeping a local view of gateway chat sessions in sync

pub mod config;
pub mod error;
pub mod gateway;
pub mod reconnect;
pub mod stream;
pub mod sync;

// Export commonly used items
pub use config::{Cadence, CadenceProfile, ClientConfig};
pub use error::{ClientError, Result};
pub use gateway::GatewayClient;
pub use stream::{EventStream, StreamNotice, StreamOptions};
pub use sync::{SessionSync, SyncSettings, SyncUpdate};
