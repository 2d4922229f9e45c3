pub mod audit;
pub mod client;
pub mod config;
pub mod error;
pub mod providers;
pub mod server;
pub mod translate;
pub mod transport;

pub use client::DispatchClient;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use providers::ProviderKind;
pub use server::{build_router, AppState};
pub use translate::canonical::{CanonicalRequest, CanonicalResponse, StreamEvent};
pub use translate::errors::CanonicalError;
