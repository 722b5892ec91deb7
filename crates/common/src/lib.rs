pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use error::{DecantError, Result};
pub use ids::*;
