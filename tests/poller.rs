use pqbms_lib::poller::Poller;
use pqbms_lib::protocol::{
    BatteryStatus, CommandCatalog, Response, GET_BATTERY_INFO, GET_VERSION, SERIAL_NUMBER,
};
use pqbms_lib::transport::{NotificationSink, Transport};
use pqbms_lib::{DecodeError, Error, TransportError};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Answers writes from a fixed reply table, recording every call.
#[derive(Default)]
struct MockTransport {
    replies: HashMap<Vec<u8>, Vec<u8>>,
    // Replies delivered to the subscription before the current one
    stale_replies: HashMap<Vec<u8>, Vec<u8>>,
    fail_subscribes: HashSet<usize>,
    fail_writes: HashSet<Vec<u8>>,
    drop_sinks: bool,
    fail_unsubscribes: bool,
    sinks: Vec<NotificationSink>,
    active: Option<NotificationSink>,
    subscribes: usize,
    unsubscribes: usize,
    writes: Vec<Vec<u8>>,
}

impl MockTransport {
    fn reply(mut self, request: &[u8], frame: Vec<u8>) -> Self {
        self.replies.insert(request.to_vec(), frame);
        self
    }
}

impl Transport for MockTransport {
    async fn subscribe(&mut self, sink: NotificationSink) -> Result<(), TransportError> {
        self.subscribes += 1;
        if self.fail_subscribes.contains(&self.subscribes) {
            return Err(TransportError::Device("subscribe rejected".to_string()));
        }
        if !self.drop_sinks {
            self.sinks.push(sink.clone());
            self.active = Some(sink);
        }
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        self.unsubscribes += 1;
        self.active = None;
        if self.fail_unsubscribes {
            return Err(TransportError::Device("unsubscribe rejected".to_string()));
        }
        Ok(())
    }

    async fn write_no_response(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.writes.push(payload.to_vec());
        if self.fail_writes.contains(payload) {
            return Err(TransportError::Device("write rejected".to_string()));
        }
        if let (Some(reply), Some(sink)) = (self.replies.get(payload), &self.active) {
            sink.try_send(reply.clone()).unwrap();
        }
        if let Some(reply) = self.stale_replies.get(payload) {
            if let Some(previous) = self.sinks.iter().rev().nth(1) {
                // The receiver of an earlier subscription is gone
                assert!(previous.try_send(reply.clone()).is_err());
            }
        }
        Ok(())
    }
}

fn battery_frame() -> Vec<u8> {
    let mut frame = vec![0; 104];
    frame[12..16].copy_from_slice(&26_400u32.to_le_bytes());
    frame[16..18].copy_from_slice(&3_300u16.to_le_bytes());
    frame[48..52].copy_from_slice(&2_000i32.to_be_bytes());
    frame[90..92].copy_from_slice(&64u16.to_be_bytes());
    frame
}

fn version_frame() -> Vec<u8> {
    let mut frame = vec![0; 8];
    frame.extend_from_slice(&[0x00, 0x04, 0x00, 0x00, 0x00, 0x09, 0x07, 0xE7, 0x0B, 0x02]);
    frame.extend_from_slice(b"H.V.1.0.");
    frame
}

fn serial_frame() -> Vec<u8> {
    vec![0x00, 0x00, 0x10, 0x01, 0x10, 0x55, 0xAA, 0x31, 0x32]
}

fn answering_transport() -> MockTransport {
    MockTransport::default()
        .reply(GET_VERSION.payload(), version_frame())
        .reply(GET_BATTERY_INFO.payload(), battery_frame())
        .reply(SERIAL_NUMBER.payload(), serial_frame())
}

#[tokio::test(start_paused = true)]
async fn full_pass_decodes_every_command() {
    let mut poller = Poller::new(answering_transport());
    let outcomes = poller.poll_all(&CommandCatalog::default()).await;

    assert_eq!(outcomes.len(), 3);
    match &outcomes[0].result {
        Ok(Response::Version(version)) => {
            assert_eq!(version.firmware_version, "4.0.9");
            assert_eq!(version.manufacture_date, "2023-11-2");
            assert_eq!(version.hardware_version, "HV10");
        }
        other => panic!("unexpected version outcome: {other:?}"),
    }
    match &outcomes[1].result {
        Ok(Response::BatteryInfo(info)) => {
            assert_eq!(info.current, 2.0);
            assert_eq!(info.watt, 5.28);
            assert_eq!(info.cell_voltages.len(), 1);
            assert_eq!(info.battery_status, BatteryStatus::Charging);
        }
        other => panic!("unexpected battery outcome: {other:?}"),
    }
    match &outcomes[2].result {
        Ok(Response::SerialNumber(serial)) => assert_eq!(serial.raw, "000010011055aa3132"),
        other => panic!("unexpected serial number outcome: {other:?}"),
    }

    let transport = poller.transport();
    assert_eq!(transport.subscribes, 3);
    assert_eq!(transport.unsubscribes, 3);
    assert_eq!(
        transport.writes,
        vec![
            GET_VERSION.payload().to_vec(),
            GET_BATTERY_INFO.payload().to_vec(),
            SERIAL_NUMBER.payload().to_vec(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn silent_device_times_out_every_command() {
    let mut poller = Poller::new(MockTransport::default());
    poller.set_timeout(Duration::from_secs(1));

    let started = Instant::now();
    let outcomes = poller.poll_all(&CommandCatalog::default()).await;
    let elapsed = started.elapsed();

    assert_eq!(outcomes.len(), 3);
    for outcome in &outcomes {
        assert!(
            matches!(outcome.result, Err(Error::Timeout(t)) if t == Duration::from_secs(1)),
            "{}: {:?}",
            outcome.command.name(),
            outcome.result
        );
    }
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(4));
    assert_eq!(poller.transport().unsubscribes, 3);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_once_per_command_whatever_the_outcome() {
    let transport = MockTransport::default()
        .reply(GET_VERSION.payload(), version_frame())
        .reply(SERIAL_NUMBER.payload(), serial_frame());
    let mut poller = Poller::new(transport);
    let outcomes = poller.poll_all(&CommandCatalog::default()).await;

    assert!(outcomes[0].result.is_ok());
    assert!(matches!(outcomes[1].result, Err(Error::Timeout(_))));
    assert!(outcomes[2].result.is_ok());
    assert_eq!(poller.transport().subscribes, 3);
    assert_eq!(poller.transport().unsubscribes, 3);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_failure_keeps_outcome() {
    let mut transport = MockTransport::default().reply(SERIAL_NUMBER.payload(), serial_frame());
    transport.fail_unsubscribes = true;
    let mut poller = Poller::new(transport);
    let outcomes = poller.poll_all(&CommandCatalog::default()).await;

    assert!(matches!(outcomes[0].result, Err(Error::Timeout(_))));
    assert!(matches!(outcomes[1].result, Err(Error::Timeout(_))));
    match &outcomes[2].result {
        Ok(Response::SerialNumber(serial)) => assert_eq!(serial.raw, "000010011055aa3132"),
        other => panic!("unexpected serial number outcome: {other:?}"),
    }
    assert_eq!(poller.transport().subscribes, 3);
    assert_eq!(poller.transport().unsubscribes, 3);
}

#[tokio::test(start_paused = true)]
async fn subscribe_failure_skips_to_next_command() {
    let mut transport = answering_transport();
    transport.fail_subscribes.insert(1);
    let mut poller = Poller::new(transport);
    let outcomes = poller.poll_all(&CommandCatalog::default()).await;

    assert!(matches!(
        outcomes[0].result,
        Err(Error::Subscribe(TransportError::Device(_)))
    ));
    assert!(outcomes[1].result.is_ok());
    assert!(outcomes[2].result.is_ok());

    let transport = poller.transport();
    // Nothing to cancel for the command that never subscribed
    assert_eq!(transport.unsubscribes, 2);
    assert_eq!(transport.writes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn write_failure_still_unsubscribes() {
    let mut transport = answering_transport();
    transport
        .fail_writes
        .insert(GET_BATTERY_INFO.payload().to_vec());
    let mut poller = Poller::new(transport);
    let outcomes = poller.poll_all(&CommandCatalog::default()).await;

    assert!(outcomes[0].result.is_ok());
    assert!(matches!(outcomes[1].result, Err(Error::Write(_))));
    assert!(outcomes[2].result.is_ok());
    assert_eq!(poller.transport().unsubscribes, 3);
}

#[tokio::test(start_paused = true)]
async fn truncated_reply_is_reported_without_partial_record() {
    let transport = answering_transport().reply(GET_BATTERY_INFO.payload(), vec![0x01; 50]);
    let mut poller = Poller::new(transport);
    let outcomes = poller.poll_all(&CommandCatalog::default()).await;

    assert!(matches!(
        outcomes[1].result,
        Err(Error::Decode(DecodeError::Truncated {
            required: 104,
            received: 50
        }))
    ));
    assert!(outcomes[2].result.is_ok());
    assert_eq!(poller.transport().unsubscribes, 3);
}

#[tokio::test(start_paused = true)]
async fn late_reply_does_not_leak_into_next_command() {
    let mut transport = MockTransport::default().reply(GET_VERSION.payload(), version_frame());
    // The battery reply arrives on the version subscription, after it was cancelled
    transport
        .stale_replies
        .insert(GET_BATTERY_INFO.payload().to_vec(), battery_frame());
    let mut poller = Poller::new(transport);
    let catalog = CommandCatalog::default()
        .select(&["GET_VERSION", "GET_BATTERY_INFO"])
        .unwrap();
    let outcomes = poller.poll_all(&catalog).await;

    assert!(matches!(outcomes[0].result, Ok(Response::Version(_))));
    assert!(matches!(outcomes[1].result, Err(Error::Timeout(_))));
}

#[tokio::test(start_paused = true)]
async fn closed_notification_stream_is_reported() {
    let transport = MockTransport {
        drop_sinks: true,
        ..Default::default()
    };
    let mut poller = Poller::new(transport);
    let result = poller.poll(&GET_VERSION).await;

    assert!(matches!(result, Err(Error::NotificationsClosed)));
    assert_eq!(poller.transport().unsubscribes, 1);
}

#[tokio::test(start_paused = true)]
async fn single_poll_decodes_reply() {
    let mut poller = Poller::new(answering_transport());
    match poller.poll(&GET_BATTERY_INFO).await {
        Ok(Response::BatteryInfo(info)) => assert_eq!(info.soc, 64),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let transport = poller.into_inner();
    assert_eq!(transport.subscribes, 1);
    assert_eq!(transport.unsubscribes, 1);
}
