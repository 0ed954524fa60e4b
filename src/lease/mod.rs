// Lease management for exclusive task execution
//
// A lease is a time-bounded session issued by the coordination store:
// - created once per task attempt
// - renewed every ttl/2 while the task runs
// - destroyed on every exit path, or expired by the store if we vanish

pub mod lease;
pub mod manager;
pub mod signal;

pub use lease::{ExpiryBehavior, LeaseId, LeaseSpec, DEFAULT_LOCK_DELAY, DEFAULT_TTL};
pub use manager::LeaseManager;
pub use signal::RenewalSignal;
