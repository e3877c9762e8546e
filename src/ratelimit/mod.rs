//! Rate limiting logic and state management.

mod backoff;
mod clock;
mod gate;
mod keys;
mod policy;
mod window;

pub use backoff::FailedLoginTracker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use gate::{RateLimitDecision, RateLimitGate};
pub use keys::{client_ip, client_ip_from_headers, Flow, IdentityKey, RateKey, UNKNOWN_IP};
pub use policy::{BackoffPolicy, LimitPolicy, RateLimitRule};
pub use window::{evaluate, touch, RateWindow, Transition, Verdict};
