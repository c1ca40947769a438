//! Connection status observable by UI surfaces.

/// Where a client's link to the queue currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// First connection attempt in progress.
    Connecting,
    /// Connected; state changes are being delivered.
    Connected,
    /// The link dropped and the client is waiting to retry.
    Reconnecting {
        /// Consecutive failed attempts so far, starting at 1.
        attempt: u32,
    },
    /// The client has stopped, or the last read failed.
    Disconnected,
}

impl ConnectionStatus {
    /// `true` only while [`Self::Connected`].
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}
