pub mod error;
pub mod redis;
pub mod types;

pub use error::{FaasError, Result};
