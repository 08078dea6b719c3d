//! Server lifecycle: listener binding, serving, and graceful shutdown.

pub mod module;
pub mod shutdown;

pub use module::GatewayServer;
pub use shutdown::shutdown_signal;
