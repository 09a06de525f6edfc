use std::time::Duration;

/// Errors raised while decoding a response frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame ends before the last byte the decoder reads.
    #[error("frame truncated - required={required} received={received}")]
    Truncated { required: usize, received: usize },
}

/// Errors reported by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no Bluetooth adapter available")]
    AdapterUnavailable,
    #[error("device '{0}' not found")]
    DeviceNotFound(String),
    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(String),
    #[error("notification channel closed")]
    NotificationsClosed,
    /// A failure reported by the device or the underlying stack.
    #[error("device error: {0}")]
    Device(String),
    #[cfg(feature = "bluetooth")]
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluest::Error),
}

/// Outcome of a single failed poll.
///
/// None of these are fatal: the sequencer reports them and moves on to the
/// next command.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot subscribe to notifications: {0}")]
    Subscribe(#[source] TransportError),
    #[error("cannot send command: {0}")]
    Write(#[source] TransportError),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("notification stream ended before a response arrived")]
    NotificationsClosed,
    #[error("cannot decode response: {0}")]
    Decode(#[from] DecodeError),
}

/// A command name that is not part of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command '{0}'")]
pub struct UnknownCommand(pub String);
