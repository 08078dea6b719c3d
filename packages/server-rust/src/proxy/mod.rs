//! Prefix-routing reverse proxy: the terminal stage of the pipeline.
//!
//! - [`routes`]: Immutable prefix → backend table with longest-prefix matching
//! - [`forward`]: Streams matched requests to their backend and relays the reply

pub mod forward;
pub mod routes;

pub use forward::ForwardService;
pub use routes::{RouteError, RouteTable, RouteTarget};
