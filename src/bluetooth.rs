//! Bluetooth Low Energy transport built on `bluest`.
//!
//! The BMS exposes one characteristic that accepts commands via write without
//! response and answers them with notifications.
//!
//! # Example
//!
//! ```no_run
//! use pqbms_lib::bluetooth::{self, ConnectOptions};
//! use pqbms_lib::poller::Poller;
//! use pqbms_lib::protocol::CommandCatalog;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pqbms_lib::TransportError> {
//!     let options = ConnectOptions::new("P-24100BNN160-A00714");
//!     let (connection, transport) = bluetooth::connect(&options).await?;
//!
//!     let mut poller = Poller::new(transport);
//!     for outcome in poller.poll_all(&CommandCatalog::default()).await {
//!         println!("{}: {:?}", outcome.command.name(), outcome.result);
//!     }
//!
//!     connection.disconnect().await
//! }
//! ```

use crate::error::TransportError;
use crate::transport::{NotificationSink, Transport};
use bluest::{Adapter, AdvertisingDevice, Characteristic, Device};
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub use bluest::Uuid;

/// Characteristic used for both commands and notifications.
pub const BMS_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30);

type Result<T> = std::result::Result<T, TransportError>;

/// Where to find the BMS.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Advertised local name of the BMS
    pub device_name: String,
    pub characteristic: Uuid,
    /// Total scan time before giving up on finding the BMS
    pub scan_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            characteristic: BMS_CHARACTERISTIC,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

/// An established connection, kept to disconnect once polling is done.
pub struct BleConnection {
    adapter: Adapter,
    device: Device,
}

impl BleConnection {
    /// Disconnect from the BMS
    pub async fn disconnect(self) -> Result<()> {
        self.adapter.disconnect_device(&self.device).await?;
        log::info!("Disconnected");
        Ok(())
    }
}

/// Scans for the BMS by name, connects and locates its characteristic.
pub async fn connect(options: &ConnectOptions) -> Result<(BleConnection, BleTransport)> {
    let adapter = Adapter::default()
        .await
        .ok_or(TransportError::AdapterUnavailable)?;
    adapter.wait_available().await?;

    log::info!("Scanning for BMS device '{}'", options.device_name);
    let found = discover_device(&adapter, &options.device_name, options.scan_timeout).await?;
    adapter.connect_device(&found.device).await?;
    log::info!("Connected to '{}'", options.device_name);

    let characteristic = match find_characteristic(&found.device, options.characteristic).await {
        Ok(characteristic) => characteristic,
        Err(err) => {
            if let Err(disconnect_err) = adapter.disconnect_device(&found.device).await {
                log::warn!("Cannot disconnect after failed discovery: {disconnect_err}");
            }
            return Err(err);
        }
    };

    Ok((
        BleConnection {
            adapter,
            device: found.device,
        },
        BleTransport::new(characteristic),
    ))
}

async fn discover_device(
    adapter: &Adapter,
    device_name: &str,
    scan_timeout: Duration,
) -> Result<AdvertisingDevice> {
    let adapter_events = adapter.scan(&[]).await?;
    scan_for(adapter_events, device_name, scan_timeout, |found: &AdvertisingDevice| {
        let local_name = found.adv_data.local_name.clone();
        let device = found.device.clone();
        async move {
            let name = match local_name {
                Some(name) => name,
                None => device.name_async().await.unwrap_or_default(),
            };
            log::debug!("Found device: {name} [{:?}]", device.id());
            name
        }
    })
    .await
}

/// Waits for an advertisement named `device_name`, for at most `scan_timeout` in total.
async fn scan_for<S, D, F, Fut>(
    mut events: S,
    device_name: &str,
    scan_timeout: Duration,
    mut name_of: F,
) -> Result<D>
where
    S: Stream<Item = D> + Unpin,
    F: FnMut(&D) -> Fut,
    Fut: Future<Output = String>,
{
    let search = async {
        while let Some(found) = events.next().await {
            if name_of(&found).await == device_name {
                return Some(found);
            }
        }
        None
    };
    match timeout(scan_timeout, search).await {
        Ok(Some(found)) => Ok(found),
        Ok(None) | Err(_) => Err(TransportError::DeviceNotFound(device_name.to_string())),
    }
}

async fn find_characteristic(device: &Device, uuid: Uuid) -> Result<Characteristic> {
    for service in device.discover_services().await? {
        for characteristic in service.discover_characteristics().await? {
            log::debug!("Found characteristic: {}", characteristic.uuid());
            if characteristic.uuid() == uuid {
                return Ok(characteristic);
            }
        }
    }
    Err(TransportError::CharacteristicNotFound(uuid.to_string()))
}

/// [`Transport`] over a single BMS characteristic.
///
/// Notifications are forwarded by a background task that lives from
/// `subscribe` to `unsubscribe`. Dropping the task drops the notification
/// stream, which disables notifications on the device.
pub struct BleTransport {
    characteristic: Characteristic,
    listener: Listener,
}

impl BleTransport {
    pub fn new(characteristic: Characteristic) -> Self {
        Self {
            characteristic,
            listener: Listener::default(),
        }
    }
}

/// The task forwarding notifications of the current subscription.
#[derive(Default)]
struct Listener(Option<JoinHandle<()>>);

impl Listener {
    fn start(&mut self, task: JoinHandle<()>) {
        self.abort();
        self.0 = Some(task);
    }

    /// Cancels the task and waits until it, and the stream it owns, is gone.
    async fn stop(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
            let _ = task.await;
        }
    }

    fn abort(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.abort();
    }
}

impl Transport for BleTransport {
    async fn subscribe(&mut self, sink: NotificationSink) -> Result<()> {
        self.listener.stop().await;

        let characteristic = self.characteristic.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let listener = tokio::spawn(async move {
            let mut notifications = match characteristic.notify().await {
                Ok(notifications) => {
                    let _ = ready_tx.send(Ok(()));
                    notifications
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            while let Some(notification) = notifications.next().await {
                match notification {
                    Ok(data) => {
                        log::trace!("RX notification: 0x{}", hex::encode(&data));
                        if sink.send(data).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::warn!("Notification error: {err}");
                        break;
                    }
                }
            }
            log::trace!("End of notification stream");
        });
        self.listener.start(listener);

        match ready_rx.await {
            Ok(result) => Ok(result?),
            Err(_) => {
                self.listener.stop().await;
                Err(TransportError::NotificationsClosed)
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.listener.stop().await;
        Ok(())
    }

    async fn write_no_response(&mut self, payload: &[u8]) -> Result<()> {
        log::trace!("TX: {}", hex::encode(payload));
        self.characteristic.write_without_response(payload).await?;
        Ok(())
    }
}
