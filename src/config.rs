//! Limits, timeouts and per-leg engine configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Resource limits applied to each leg.
///
/// These bound memory use per Connection regardless of what either peer
/// sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload of a single frame.
    ///
    /// Default: 16 MB
    pub max_frame_size: usize,

    /// Maximum size of a reassembled (and decompressed) message.
    ///
    /// Default: 64 MB
    pub max_message_size: usize,

    /// Maximum number of frames in one fragmented message.
    ///
    /// Default: 128
    pub max_fragment_count: usize,

    /// Maximum size of an HTTP handshake head.
    ///
    /// Default: 8 KB
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_fragment_count: 128,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// # Errors
    ///
    /// `Error::MessageTooLarge` if `size` exceeds the maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// `Error::FrameTooLarge` if `size` exceeds the maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// `Error::TooManyFragments` if `count` exceeds the maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<()> {
        if count > self.max_fragment_count {
            Err(Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }
}

/// Bounds on the waits a Connection may perform.
///
/// `None` means the wait is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Establishing the backend transport.
    ///
    /// Default: 10 seconds
    pub connect: Option<Duration>,

    /// Completing both opening handshakes.
    ///
    /// Default: 30 seconds
    pub handshake: Option<Duration>,

    /// Flushing pending writes once a Connection is torn down.
    ///
    /// Default: 5 seconds
    pub close_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Some(Duration::from_secs(10)),
            handshake: Some(Duration::from_secs(30)),
            close_grace: Duration::from_secs(5),
        }
    }
}

impl Timeouts {
    /// Timeouts that never expire, apart from the close grace period.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            connect: None,
            handshake: None,
            close_grace: Duration::from_secs(5),
        }
    }

    /// Set the backend connect timeout.
    #[must_use]
    pub const fn with_connect(mut self, timeout: Option<Duration>) -> Self {
        self.connect = timeout;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_handshake(mut self, timeout: Option<Duration>) -> Self {
        self.handshake = timeout;
        self
    }

    /// Set the close grace period.
    #[must_use]
    pub const fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }
}

/// Configuration of one protocol engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Outgoing messages larger than this are split into several frames.
    ///
    /// Default: 16 KB
    pub fragment_size: usize,

    /// Capacity of the engine's bounded queues (outgoing messages and
    /// decoded incoming messages).
    ///
    /// A full outgoing queue suspends whoever forwards into it, which in
    /// turn stops the source leg from reading.
    ///
    /// Default: 16
    pub queue_depth: usize,

    /// Accept unmasked frames from clients (server role only).
    ///
    /// Violates RFC 6455; useful against broken test clients.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,

    /// Read buffer size.
    ///
    /// Default: 8 KB
    pub read_buffer_size: usize,

    /// Write buffer size.
    ///
    /// Default: 8 KB
    pub write_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            queue_depth: 16,
            accept_unmasked_frames: false,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
        }
    }
}

impl Config {
    /// Configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set fragment size for outgoing messages.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Set queue depth. Zero is raised to one.
    #[must_use]
    pub const fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = if depth == 0 { 1 } else { depth };
        self
    }

    /// Accept unmasked client frames.
    #[must_use]
    pub const fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set write buffer size.
    #[must_use]
    pub const fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(limits.max_message_size, 64 * 1024 * 1024);
        assert_eq!(limits.max_fragment_count, 128);
        assert_eq!(limits.max_handshake_size, 8192);
    }

    #[test]
    fn test_limits_checks() {
        let limits = Limits::new(100, 1000, 4, 512);
        assert!(limits.check_frame_size(100).is_ok());
        assert_eq!(
            limits.check_frame_size(101),
            Err(Error::FrameTooLarge { size: 101, max: 100 })
        );
        assert!(limits.check_message_size(1001).is_err());
        assert!(limits.check_fragment_count(4).is_ok());
        assert!(limits.check_fragment_count(5).is_err());
    }

    #[test]
    fn test_timeouts_default() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.connect, Some(Duration::from_secs(10)));
        assert_eq!(timeouts.handshake, Some(Duration::from_secs(30)));
        assert_eq!(timeouts.close_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_timeouts_builder() {
        let timeouts = Timeouts::default()
            .with_connect(None)
            .with_handshake(Some(Duration::from_millis(250)))
            .with_close_grace(Duration::from_millis(50));
        assert_eq!(timeouts.connect, None);
        assert_eq!(timeouts.handshake, Some(Duration::from_millis(250)));
        assert_eq!(timeouts.close_grace, Duration::from_millis(50));
        assert_eq!(Timeouts::unbounded().handshake, None);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_limits(Limits::new(1024, 4096, 8, 2048))
            .with_fragment_size(512)
            .with_queue_depth(0)
            .with_read_buffer_size(1024)
            .with_write_buffer_size(2048)
            .with_accept_unmasked_frames(true);

        assert_eq!(config.fragment_size, 512);
        assert_eq!(config.queue_depth, 1);
        assert_eq!(config.limits.max_frame_size, 1024);
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.write_buffer_size, 2048);
        assert!(config.accept_unmasked_frames);
        assert!(!Config::default().accept_unmasked_frames);
    }
}
