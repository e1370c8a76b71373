//! Cross-thread coordination primitives shared by contexts and runtimes.

mod cancellation;
mod wait_group;

pub use cancellation::{CancellationToken, Cancelled};
pub use wait_group::{WaitGroup, WaitGroupGuard};
