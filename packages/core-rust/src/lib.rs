//! acme-gateway core: admission control, credential verification, per-request
//! context, and the error envelope. Nothing in this crate knows about HTTP.

pub mod claims;
pub mod clock;
pub mod context;
pub mod error;
pub mod limiter;

pub use claims::{verify, Claims, VerificationError, ALLOWED_ALGORITHMS};
pub use clock::{Clock, MonotonicClock};
pub use context::{Identity, RequestContext};
pub use error::{ErrorCode, ErrorDetail, ErrorEnvelope, GatewayError};
pub use limiter::{LimiterError, TokenBucket};
