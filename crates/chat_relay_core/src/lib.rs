pub mod domain;
pub mod gate;
pub mod ports;
pub mod rate_limiter;
pub mod relay;
pub mod retry;
pub mod session_store;

#[cfg(test)]
mod test_support;

pub use domain::{Credentials, Role, Session, SessionView, Turn, HISTORY_LIMIT};
pub use gate::{ConcurrencyGate, GateError, GatePermit};
pub use ports::{CompletionService, PortError, PortResult};
pub use rate_limiter::{RateDecision, RateLimitSettings, RateLimiter};
pub use relay::{QueryReply, QueryRequest, Relay, RelayError, RelaySettings, UpstreamFailure};
pub use retry::{call_with_retry, RetryPolicy};
pub use session_store::{SessionGuard, SessionStore};
