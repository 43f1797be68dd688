pub mod auth;
pub mod bootstrap;
mod dto;
mod error;
pub mod logging;
pub mod routes;
mod stream;

pub use auth::{AuthedPlayer, DemoTokenResolver, TokenResolver};
pub use bootstrap::{run_server, ServerConfig};
pub use error::ApiError;
pub use routes::{RouletteServer, ServerContext};
