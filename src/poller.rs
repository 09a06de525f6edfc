//! Sequential request/response polling over a single notifying characteristic.
//!
//! The BMS protocol carries no correlation between a request and the
//! notification that answers it. Any notification that arrives while a command
//! waits for its reply is taken as that reply, so commands are polled strictly
//! one after the other and notifications are switched off between them.
//!
//! # Example
//!
//! ```no_run
//! # async fn run(transport: impl pqbms_lib::transport::Transport) {
//! use pqbms_lib::poller::Poller;
//! use pqbms_lib::protocol::CommandCatalog;
//! use std::time::Duration;
//!
//! let mut poller = Poller::new(transport);
//! poller.set_timeout(Duration::from_secs(2));
//! for outcome in poller.poll_all(&CommandCatalog::default()).await {
//!     println!("{}: {:?}", outcome.command.name(), outcome.result);
//! }
//! # }
//! ```

use crate::error::Error;
use crate::protocol::{Command, CommandCatalog, Response};
use crate::transport::Transport;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long to wait for the reply to a command.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

// Replies are a single notification; a few more slots absorb duplicates.
const NOTIFICATION_QUEUE_DEPTH: usize = 8;

type Result<T> = std::result::Result<T, Error>;

/// Stages a single command passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Subscribed,
    AwaitingResponse,
    Decoded,
    Unsubscribed,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PollState::Idle => write!(f, "idle"),
            PollState::Subscribed => write!(f, "subscribed"),
            PollState::AwaitingResponse => write!(f, "awaiting response"),
            PollState::Decoded => write!(f, "decoded"),
            PollState::Unsubscribed => write!(f, "unsubscribed"),
        }
    }
}

/// Result of polling one command during a pass.
#[derive(Debug)]
pub struct PollOutcome {
    pub command: &'static Command,
    pub result: Result<Response>,
}

/// Drives the poll cycle for each command over an exclusively owned transport.
#[derive(Debug)]
pub struct Poller<T> {
    transport: T,
    response_timeout: Duration,
}

impl<T: Transport> Poller<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Sets how long each command waits for its reply notification.
    pub fn set_timeout(&mut self, timeout: Duration) {
        log::trace!("set response timeout to {timeout:?}");
        self.response_timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gives the transport back, e.g. to disconnect it.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Polls a single command and decodes its reply.
    ///
    /// Notifications are always switched off again before returning, unless
    /// enabling them failed in the first place.
    pub async fn poll(&mut self, command: &Command) -> Result<Response> {
        let name = command.name();
        log::trace!("{name}: {}", PollState::Idle);

        let (sink, mut notifications) = mpsc::channel(NOTIFICATION_QUEUE_DEPTH);
        self.transport
            .subscribe(sink)
            .await
            .map_err(Error::Subscribe)?;
        log::trace!("{name}: {}", PollState::Subscribed);

        let result = self.exchange(command, &mut notifications).await;

        // Anything still queued belongs to this command and is discarded.
        drop(notifications);
        if let Err(err) = self.transport.unsubscribe().await {
            log::warn!("{name}: cannot unsubscribe from notifications: {err}");
        }
        log::trace!("{name}: {}", PollState::Unsubscribed);

        result
    }

    async fn exchange(
        &mut self,
        command: &Command,
        notifications: &mut mpsc::Receiver<Vec<u8>>,
    ) -> Result<Response> {
        let name = command.name();
        log::trace!("{name}: write bytes: {:02X?}", command.payload());
        self.transport
            .write_no_response(command.payload())
            .await
            .map_err(Error::Write)?;
        log::trace!("{name}: {}", PollState::AwaitingResponse);

        let frame = match tokio::time::timeout(self.response_timeout, notifications.recv()).await {
            Err(_) => return Err(Error::Timeout(self.response_timeout)),
            Ok(None) => return Err(Error::NotificationsClosed),
            Ok(Some(frame)) => frame,
        };
        log::trace!("{name}: receive bytes: {frame:02X?}");

        let response = Response::decode(command.kind(), &frame)?;
        log::trace!("{name}: {}", PollState::Decoded);
        Ok(response)
    }

    /// Polls every command of `catalog` once, in catalog order.
    ///
    /// A failing command is logged and reported in its outcome; the remaining
    /// commands are still polled.
    pub async fn poll_all(&mut self, catalog: &CommandCatalog) -> Vec<PollOutcome> {
        let mut outcomes = Vec::with_capacity(catalog.commands().len());
        for &command in catalog.commands() {
            log::debug!("Polling {}", command.name());
            let result = self.poll(command).await;
            if let Err(err) = &result {
                log::error!("Polling {} failed: {err}", command.name());
            }
            outcomes.push(PollOutcome { command, result });
        }
        outcomes
    }
}
