//! CLI command implementations.

pub mod routes;
pub mod syncs;
pub mod token;

pub use routes::show_routes;
pub use syncs::list_syncs;
pub use token::mint_token;
