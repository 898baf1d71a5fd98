use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio_stream::StreamExt;

use colorimeter::{
    ConnectionState, DeviceEvent, ExchangeError, FakeBackendConfig, FakeReadings,
    FakeResponseBehaviour, FakeTransport, InstrumentSession, LabReading, ProtocolError,
    RgbReading, SessionConfig,
};

const INSTRUMENT_ID: &str = "AA:BB:CC:DD:EE:01";

async fn connected(
    config: FakeBackendConfig,
) -> anyhow::Result<(Arc<FakeTransport>, InstrumentSession)> {
    let transport = Arc::new(FakeTransport::new(config));
    let session = InstrumentSession::open(
        transport.clone(),
        SessionConfig::builder()
            .settle_delay(Duration::from_millis(1))
            .build(),
    )
    .await?;
    session.connect(INSTRUMENT_ID).await?;
    Ok((transport, session))
}

fn exchange_error(error: &ProtocolError) -> Option<&ExchangeError> {
    match error {
        ProtocolError::Exchange(error) => Some(error.as_ref()),
        _ => None,
    }
}

#[tokio::test]
async fn measure_and_get_lab_returns_configured_reading() -> anyhow::Result<()> {
    let lab = LabReading {
        l: 42.5,
        a: -3.25,
        b: 18.0,
    };
    let readings = FakeReadings::builder().lab(lab).build();
    let (_transport, session) =
        connected(FakeBackendConfig::builder().readings(readings).build()).await?;

    assert_eq!(lab, session.measure_and_get_lab(0).await?);
    session.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn every_command_is_preceded_by_the_wake_byte() -> anyhow::Result<()> {
    let (transport, session) = connected(FakeBackendConfig::default()).await?;

    session.measure(1).await?;
    session.measure(1).await?;

    let written = transport.written_chunks();
    assert_eq!(4, written.len());
    assert_eq!(vec![0xF0], written[0]);
    assert_eq!(&[0xBB, 0x01, 0x01, 0x02, 0x00], &written[1][..5]);
    assert_eq!(vec![0xF0], written[2]);
    assert_eq!(&[0xBB, 0x01, 0x01, 0x03, 0x00], &written[3][..5]);
    session.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn rgb_and_spectral_readings_decode() -> anyhow::Result<()> {
    let (_transport, session) = connected(FakeBackendConfig::default()).await?;

    let rgb = session.get_rgb(0).await?;
    let spectral = session.measure_and_get_spectral(0).await?;

    assert_eq!(RgbReading { r: 255, g: 0, b: 0 }, rgb);
    assert!(!spectral.only_lab);
    assert_eq!(Some(400), spectral.wave_start);
    assert_eq!(
        vec![(400, 0.12), (410, 0.18), (420, 0.35), (430, 0.62)],
        spectral.wavelengths().collect::<Vec<_>>()
    );
    session.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn spectral_only_lab_omits_curve() -> anyhow::Result<()> {
    let readings = FakeReadings::builder().spectral_only_lab(true).build();
    let (_transport, session) =
        connected(FakeBackendConfig::builder().readings(readings).build()).await?;

    let spectral = session.get_spectral(2).await?;

    assert!(spectral.only_lab);
    assert_eq!(None, spectral.samples);
    assert_eq!(0, spectral.wavelengths().count());
    session.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn calibration_updates_reported_state() -> anyhow::Result<()> {
    let (_transport, session) = connected(FakeBackendConfig::default()).await?;

    let before = session.get_calibration_info().await?;
    let outcome = session.black_calibrate(true).await?;
    let after = session.get_calibration_info().await?;
    let device = session.get_device_info().await?;

    assert!(!before.black_calibrated);
    assert!(outcome.success);
    assert_eq!(1_700_000_000, outcome.timestamp);
    assert!(after.black_calibrated);
    assert!(!after.white_calibrated);
    assert_eq!(0x2600, device.code);
    session.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn failed_calibration_only_counts_when_verified() -> anyhow::Result<()> {
    let readings = FakeReadings::builder().calibration_status(3).build();
    let (_transport, session) =
        connected(FakeBackendConfig::builder().readings(readings).build()).await?;

    assert!(!session.white_calibrate(true).await?.success);
    assert!(session.white_calibrate(false).await?.success);
    session.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn fragmented_responses_are_reassembled() -> anyhow::Result<()> {
    let (_transport, session) =
        connected(FakeBackendConfig::builder().fragment_size(3).build()).await?;

    let device = session.get_device_info().await?;

    assert_eq!(0x2600, device.code);
    session.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn corrupt_response_is_rejected() -> anyhow::Result<()> {
    let (_transport, session) = connected(
        FakeBackendConfig::builder()
            .behaviour(FakeResponseBehaviour::CorruptChecksum)
            .build(),
    )
    .await?;

    let error = session
        .get_lab(0)
        .await
        .expect_err("corrupt response should fail");

    assert_matches!(
        exchange_error(&error),
        Some(ExchangeError::InvalidChecksum { .. })
    );
    session.dispose().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn silent_instrument_times_out() -> anyhow::Result<()> {
    let (_transport, session) = connected(
        FakeBackendConfig::builder()
            .behaviour(FakeResponseBehaviour::Silent)
            .build(),
    )
    .await?;

    let error = session
        .get_lab(0)
        .await
        .expect_err("silent instrument should time out");

    assert_matches!(
        exchange_error(&error),
        Some(ExchangeError::ResponseTimeout { timeout, .. })
            if *timeout == Duration::from_millis(1500)
    );
    session.dispose().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn link_drop_cancels_the_outstanding_command() -> anyhow::Result<()> {
    let (transport, session) = connected(
        FakeBackendConfig::builder()
            .behaviour(FakeResponseBehaviour::Silent)
            .build(),
    )
    .await?;

    let drop_soon = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        transport.drop_link();
    };
    let (result, ()) = tokio::join!(session.get_lab(0), drop_soon);

    let error = result.expect_err("dropped link should cancel the command");
    assert_matches!(exchange_error(&error), Some(ExchangeError::Disconnected));
    assert_eq!(ConnectionState::Disconnected, session.state());
    session.dispose().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn local_disconnect_cancels_outstanding_command() -> anyhow::Result<()> {
    let (_transport, session) = connected(
        FakeBackendConfig::builder()
            .behaviour(FakeResponseBehaviour::Silent)
            .build(),
    )
    .await?;

    let disconnect_soon = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.disconnect().await
    };
    let (result, disconnected) = tokio::join!(session.get_lab(0), disconnect_soon);

    disconnected?;
    let error = result.expect_err("disconnect should cancel the command");
    assert_matches!(exchange_error(&error), Some(ExchangeError::Disconnected));
    assert_eq!(ConnectionState::Disconnected, session.state());
    session.dispose().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn abandoned_command_does_not_block_the_next_one() -> anyhow::Result<()> {
    let (_transport, session) = connected(
        FakeBackendConfig::builder()
            .behaviour(FakeResponseBehaviour::Silent)
            .build(),
    )
    .await?;

    let abandoned = tokio::time::timeout(Duration::from_millis(200), session.get_lab(0)).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(abandoned.is_err());
    session.wake().await?;
    session.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn commands_require_a_connection() -> anyhow::Result<()> {
    let transport = Arc::new(FakeTransport::new(FakeBackendConfig::default()));
    let session = InstrumentSession::open(transport, SessionConfig::default()).await?;

    let error = session.wake().await.expect_err("wake needs a link");

    assert_matches!(exchange_error(&error), Some(ExchangeError::NotConnected));
    session.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn button_press_arrives_as_spontaneous_measurement() -> anyhow::Result<()> {
    let (transport, session) = connected(FakeBackendConfig::default()).await?;
    let mut events = session.stream();

    transport.trigger_spontaneous_measurement(4);

    let event = tokio::time::timeout(Duration::from_secs(1), events.next()).await?;
    assert_eq!(Some(DeviceEvent::SpontaneousMeasurement { mode: 4 }), event);
    let lab = session.get_lab(4).await?;
    assert_eq!(
        LabReading {
            l: 53.24,
            a: 80.09,
            b: 67.2,
        },
        lab
    );
    session.dispose().await?;
    Ok(())
}
