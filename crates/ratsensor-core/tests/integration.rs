//! Integration tests for the ratsensor-core adapters working together.

use std::sync::Arc;
use std::time::Duration;

use ratsensor_core::mock::{MockBuffer, StaticIdentity};
use ratsensor_core::{
    DurableBuffer, Error, FileIdentity, HardwarePins, IdentityProvider, Reading, RetryPolicy,
    RetryState, Timestamp, resolve_device_id, select_sources,
};
use tokio::time::Instant;

#[tokio::test]
async fn simulated_cycle_produces_stamped_reading() {
    let dir = tempfile::tempdir().unwrap();
    let identity = FileIdentity::new(dir.path().join("device_id.json"));
    let device_id = resolve_device_id(&identity).unwrap();

    let sources = select_sources(true, HardwarePins::default());
    sources.sensor.initialize().await.unwrap();

    let ts = Timestamp::now();
    let reading = Reading::new(ts, device_id.clone(), sources.sensor.read_sensors().await);
    assert_eq!(reading.device_id, device_id);
    assert_eq!(reading.timestamp, ts);

    let buffer = Arc::new(MockBuffer::new());
    let stored: Arc<dyn DurableBuffer> = buffer.clone();
    assert_eq!(stored.save_readings(&[reading.clone(), reading]).await.unwrap(), 1);
    assert_eq!(buffer.stored().len(), 1);

    sources.sensor.cleanup().await;
}

#[test]
fn temporary_identity_is_rejected() {
    let provider = StaticIdentity("temp-0b1c".to_string());
    assert!(matches!(
        resolve_device_id(&provider),
        Err(Error::UnstableIdentity(id)) if id == "temp-0b1c"
    ));

    let provider = StaticIdentity("0b1c".to_string());
    assert_eq!(resolve_device_id(&provider).unwrap(), provider.device_id());
}

#[test]
fn backoff_after_three_failures_is_initial_times_factor_squared() {
    let policy = RetryPolicy::new()
        .initial_delay(Duration::from_secs(1))
        .max_delay(Duration::from_secs(60))
        .backoff_factor(2.0)
        .max_jitter(Duration::ZERO);
    let mut state = RetryState::new(&policy);

    let start = Instant::now();
    let mut now = start;
    for _ in 0..3 {
        assert!(state.is_due(now));
        state.record_failure(&policy, now, policy.sample_jitter());
        now += state.effective_delay();
    }

    assert_eq!(state.current_delay, Duration::from_secs(4));
    // Attempts at t=0, t=1 and t=3; the next one is due at t=7.
    assert_eq!(state.next_attempt_at(), Some(start + Duration::from_secs(7)));
}
