//! The link between the poller and the BMS characteristic.
//!
//! The BMS answers on the same characteristic it is written to, so a transport
//! is bound to exactly one characteristic and needs no channel argument.

use crate::error::TransportError;
use std::future::Future;
use tokio::sync::mpsc;

/// Sender half handed to the transport on subscribe; each notification payload
/// is pushed into it as received.
pub type NotificationSink = mpsc::Sender<Vec<u8>>;

pub trait Transport {
    /// Starts delivering notifications into `sink`.
    ///
    /// Resolves once notifications are enabled on the device. A previous
    /// subscription, if any, is replaced.
    fn subscribe(
        &mut self,
        sink: NotificationSink,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Stops notification delivery and drops the sink.
    fn unsubscribe(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Writes `payload` without waiting for a write acknowledgement.
    fn write_no_response(
        &mut self,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
