pub mod config;
pub mod error;
pub mod types;

pub use config::{ExtractionSettings, ScoutConfig, VisionConfig, VisionProvider};
pub use error::{PriceWatchError, Result};
pub use types::*;
