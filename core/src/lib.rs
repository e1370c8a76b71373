//! # Strand Core
//!
//! Building blocks for the Strand entity-component runtime:
//!
//! - [`list`]: the tombstone [`List`](list::List) with deferred GC and its
//!   slab [`Allocator`](list::Allocator)
//! - [`sync`]: [`CancellationToken`](sync::CancellationToken) and
//!   [`WaitGroup`](sync::WaitGroup) for coordinating runtime threads

pub mod list;
pub mod sync;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
