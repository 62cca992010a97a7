pub mod conversion_client;
pub mod deepseek_provider;
pub mod error;
pub mod llm_provider;
pub mod pacing;

pub use conversion_client::*;
pub use deepseek_provider::*;
pub use error::*;
pub use llm_provider::*;
pub use pacing::*;
