//! Network reachability tracking.
//!
//! `ReachabilityMonitor` holds the online/offline flag, fans transitions out
//! to subscribers, and publishes reconnect events the sync engine listens
//! for. `ConnectivitySource` implementations feed it observations.

pub mod monitor;
pub mod source;

pub use monitor::{ReachabilityEvent, ReachabilityMonitor, Subscription};
pub use source::{ConnectivitySource, ProbeSource, StaticSource};
