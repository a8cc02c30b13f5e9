/// Events sent from link callbacks to the TUI.
///
/// Callbacks run on the foreground queue, which the TUI pumps between
/// events, so they only signal; the app does the actual reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The reader stored (or dropped) a chunk.
    DataReady,
}
