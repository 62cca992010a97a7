pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod server;
pub mod state;
pub mod validation;

pub use error::*;
pub use response::*;
pub use routes::*;
pub use server::*;
pub use state::*;
