pub mod auth;
pub mod projects;
pub mod system;
pub mod workflow;

pub use auth::*;
pub use projects::*;
pub use system::*;
pub use workflow::*;
