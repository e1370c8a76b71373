/// What happens when an event is emitted again while one of its emits is
/// still running (a subscriber re-emits the same event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventRecursion {
    /// Nested emits run normally, bounded by
    /// [`MAX_EMIT_DEPTH`](super::MAX_EMIT_DEPTH).
    #[default]
    Allow,
    /// Reaching a subscriber that is already executing panics.
    Disallow,
    /// A nested emit is ignored.
    NotEmit,
    /// The nested pass skips subscribers that are already executing.
    Discard,
    /// The nested pass stops at the first subscriber that is already executing.
    Truncate,
    /// The nested pass skips executing subscribers, and once it returns the
    /// interrupted outer pass stops advancing.
    Deepest,
}
