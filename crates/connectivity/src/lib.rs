//! Network reachability for the transfer queue.
//!
//! [`ConnectivityMonitor`] holds the current assessment and notifies
//! subscribers on transitions. [`TcpProbe`] is one way to feed it; any
//! other source (an OS network callback, a UI toggle) can call
//! [`ConnectivityMonitor::set_reachable`] directly.
//!
//! Reachability is advisory. A transfer attempt made while "reachable"
//! can still fail with a network error.

mod monitor;
mod probe;

pub use monitor::{ChangeSubscription, ConnectivityMonitor};
pub use probe::{ProbeConfig, TcpProbe};
