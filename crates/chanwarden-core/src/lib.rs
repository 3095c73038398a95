//! # Chanwarden Core
//!
//! Domain records, gateway traits, the shared error type and configuration.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::ChanwardenConfig;
pub use error::{ChanwardenError, Result};
pub use traits::{PersistenceGateway, TransportGateway};
pub use types::*;
