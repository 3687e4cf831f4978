//! End-to-end protocol tests against the mock meter.

use std::sync::Arc;
use std::time::Duration;

use tc66_core::{
    Error, ErrorKind, FirmwareVariant, GattLink, MockDevice, MockDeviceBuilder, MockResponse,
    Reading, RequestOptions, codec, request_measurement, resolve,
};
use tokio_util::sync::CancellationToken;

async fn measure(device: &MockDevice, cancel: &CancellationToken) -> tc66_core::Result<Reading> {
    let session = resolve(device).await?;
    let frame = request_measurement(device, &session, &RequestOptions::default(), cancel).await?;
    codec::decode(&frame)
}

#[tokio::test(start_paused = true)]
async fn sequential_requests_reuse_one_session() {
    let device = MockDeviceBuilder::new().build();
    let session = resolve(&device).await.unwrap();
    let cancel = CancellationToken::new();

    for step in 1..=3 {
        let reading = Reading::new(f64::from(step), 0.1, f64::from(step) / 10.0);
        device.set_reading(reading).await;
        let frame = request_measurement(&device, &session, &RequestOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(codec::decode(&frame).unwrap(), reading);
    }

    let stats = device.stats();
    assert_eq!(stats.commands, 3);
    assert_eq!(stats.notifications_started, stats.notifications_stopped);
    assert_eq!(stats.listeners_attached, stats.listeners_detached);
}

#[tokio::test(start_paused = true)]
async fn failed_cycle_does_not_poison_the_next() {
    let reading = Reading::new(12.0, 2.0, 24.0);
    let device = MockDeviceBuilder::new()
        .reading(reading)
        .response(MockResponse::Truncated {
            bytes: 64,
            chunk: 16,
        })
        .build();
    let cancel = CancellationToken::new();

    let err = measure(&device, &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cycle);

    // Late fragments from the first exchange must not leak into the second
    assert_eq!(measure(&device, &cancel).await.unwrap(), reading);
}

#[tokio::test(start_paused = true)]
async fn single_fragment_response() {
    let reading = Reading::new(20.0, 3.0, 60.0);
    let device = MockDeviceBuilder::new()
        .reading(reading)
        .response(MockResponse::Chunked { chunk: 192 })
        .build();
    let cancel = CancellationToken::new();

    assert_eq!(measure(&device, &cancel).await.unwrap(), reading);
}

#[tokio::test(start_paused = true)]
async fn raw_fragments_with_empty_notifications() {
    let reading = Reading::new(5.0, 1.0, 5.0);
    let frame = codec::encode(&reading);
    let bytes = frame.as_bytes();
    let device = MockDeviceBuilder::new()
        .response(MockResponse::Raw(vec![
            Vec::new(),
            bytes[..100].to_vec(),
            Vec::new(),
            bytes[100..].to_vec(),
        ]))
        .build();
    let cancel = CancellationToken::new();

    assert_eq!(measure(&device, &cancel).await.unwrap(), reading);
}

#[tokio::test(start_paused = true)]
async fn legacy_firmware_round_trip() {
    let reading = Reading::new(5.1, 0.0, 0.0);
    let device = MockDeviceBuilder::new()
        .variant(FirmwareVariant::Legacy)
        .reading(reading)
        .build();
    let cancel = CancellationToken::new();

    assert_eq!(measure(&device, &cancel).await.unwrap(), reading);
}

#[tokio::test(start_paused = true)]
async fn slow_response_within_timeout() {
    let device = MockDeviceBuilder::new()
        .response_latency(Duration::from_secs(4))
        .build();
    let cancel = CancellationToken::new();

    assert!(measure(&device, &cancel).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn slow_response_past_timeout() {
    let device = MockDeviceBuilder::new()
        .response_latency(Duration::from_secs(6))
        .build();
    let cancel = CancellationToken::new();

    let err = measure(&device, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::ResponseTimeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn disconnected_link_is_a_transport_error() {
    let device = Arc::new(MockDeviceBuilder::new().build());
    let session = resolve(device.as_ref()).await.unwrap();
    let cancel = CancellationToken::new();

    device.disconnect().await.unwrap();
    let err = request_measurement(device.as_ref(), &session, &RequestOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected));
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test(start_paused = true)]
async fn works_through_trait_object() {
    let device: Box<dyn GattLink> = Box::new(MockDeviceBuilder::new().build());
    let session = resolve(device.as_ref()).await.unwrap();
    let cancel = CancellationToken::new();

    let frame = request_measurement(device.as_ref(), &session, &RequestOptions::default(), &cancel)
        .await
        .unwrap();
    assert!(codec::decode(&frame).is_ok());
}
