pub mod config;
pub mod error;
pub mod rate_limit;
pub mod store;
pub mod types;

pub use config::*;
pub use error::*;
pub use rate_limit::*;
pub use store::*;
pub use types::*;
