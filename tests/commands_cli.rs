use clap::Parser;
use clap::error::ErrorKind;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl colorimeter::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

async fn run_with_parsed_args(args: colorimeter::Args) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let options = colorimeter::RunOptions::from_args(&args);
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let backend = match maybe_fake_args {
        Some(fake_args) => colorimeter::fake_backend(fake_args),
        None => colorimeter::real_backend(),
    };
    colorimeter::run_with_clients(command, &mut output, &FakeTerminalClient, backend, options)
        .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv<const N: usize>(argv: [&str; N]) -> anyhow::Result<String> {
    let parsed_args = colorimeter::Args::try_parse_from(argv)?;
    run_with_parsed_args(parsed_args).await
}

fn json_lines(stdout: &str) -> anyhow::Result<Vec<Value>> {
    stdout
        .lines()
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

#[tokio::test]
async fn scan_command_lists_matching_instruments_as_json() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "colorimeter",
        "--output",
        "json",
        "--scan-timeout",
        "100ms",
        "--fake",
        "--fake-scan",
        "CC:DD|Speaker|-50;AA:BB|CM-2600d|-43",
        "scan",
    ])
    .await?;

    assert_eq!(
        vec![json!([{"device_id": "AA:BB", "local_name": "CM-2600d", "rssi": -43}])],
        json_lines(&stdout)?
    );
    Ok(())
}

#[tokio::test]
async fn scan_command_renders_table_when_pretty() -> anyhow::Result<()> {
    let fake = colorimeter::FakeArgs::builder()
        .scan("CC:DD|Speaker|-50;AA:BB|CM-2600d|-43")?
        .build();
    let args =
        colorimeter::Args::try_parse_from(["colorimeter", "--scan-timeout", "100ms", "scan"])?
            .with_fake(fake)
            .with_output(colorimeter::OutputFormat::Pretty);

    let stdout = run_with_parsed_args(args).await?;

    assert!(stdout.starts_with("Instruments:"));
    assert!(stdout.contains("AA:BB"));
    assert!(stdout.contains("-43 dBm"));
    assert!(!stdout.contains("CC:DD"));
    Ok(())
}

#[tokio::test]
async fn measure_command_reports_fixture_lab() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "colorimeter",
        "--output",
        "json",
        "--fake",
        "--fake-lab",
        "50,-2.5,10",
        "measure",
    ])
    .await?;

    assert_eq!(
        vec![json!({
            "device_id": "AA:BB:CC:DD:EE:01",
            "mode": 0,
            "reading": "lab",
            "L": 50.0,
            "a": -2.5,
            "b": 10.0,
        })],
        json_lines(&stdout)?
    );
    Ok(())
}

#[tokio::test]
async fn measure_command_renders_rgb_without_trigger() -> anyhow::Result<()> {
    let args = colorimeter::Args::new(colorimeter::Command::Measure(
        colorimeter::MeasureArgs::new(colorimeter::ReadingKind::Rgb, 0, false),
    ))
    .with_fake(colorimeter::FakeArgs::default())
    .with_output(colorimeter::OutputFormat::Pretty);

    let stdout = run_with_parsed_args(args).await?;

    assert!(stdout.starts_with("Connected instrument:"));
    assert!(stdout.contains("RGB reading:"));
    assert!(stdout.contains("255"));
    Ok(())
}

#[tokio::test]
async fn measure_command_reports_spectral_curve() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "colorimeter",
        "--output",
        "json",
        "--fake",
        "measure",
        "--reading",
        "spectral",
        "--mode",
        "1",
    ])
    .await?;

    let lines = json_lines(&stdout)?;
    assert_eq!(1, lines.len());
    assert_eq!(json!("spectral"), lines[0]["reading"]);
    assert_eq!(json!(1), lines[0]["mode"]);
    assert_eq!(json!(400), lines[0]["wave_start"]);
    assert_eq!(Some(4), lines[0]["samples"].as_array().map(Vec::len));
    Ok(())
}

#[tokio::test]
async fn calibrate_command_reports_outcome() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "colorimeter",
        "--output",
        "json",
        "--fake",
        "calibrate",
        "white",
        "--verify",
    ])
    .await?;

    assert_eq!(
        vec![json!({
            "device_id": "AA:BB:CC:DD:EE:01",
            "target": "white",
            "success": true,
            "timestamp": 1_700_000_000,
        })],
        json_lines(&stdout)?
    );
    Ok(())
}

#[tokio::test]
async fn status_command_reports_calibration_and_device_code() -> anyhow::Result<()> {
    let stdout = run_with_argv(["colorimeter", "--output", "json", "--fake", "status"]).await?;

    let lines = json_lines(&stdout)?;
    assert_eq!(1, lines.len());
    assert_eq!(json!(0x2600), lines[0]["device"]["code"]);
    assert_eq!(json!(false), lines[0]["calibration"]["white_calibrated"]);
    assert_eq!(json!(false), lines[0]["calibration"]["black_calibrated"]);
    Ok(())
}

#[tokio::test]
async fn listen_command_fetches_lab_after_button_press() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "colorimeter",
        "--output",
        "json",
        "--fake",
        "--fake-lab",
        "20,1,-1",
        "--fake-presses",
        "2",
        "listen",
        "--max-events",
        "1",
        "--fetch-lab",
    ])
    .await?;

    assert_eq!(
        vec![
            json!({"type": "spontaneous_measurement", "mode": 2}),
            json!({"mode": 2, "lab": {"L": 20.0, "a": 1.0, "b": -1.0}}),
        ],
        json_lines(&stdout)?
    );
    Ok(())
}

#[tokio::test]
async fn measure_command_fails_without_matching_instrument() {
    let result = run_with_argv([
        "colorimeter",
        "--scan-timeout",
        "50ms",
        "--fake",
        "--fake-scan",
        "CC:DD|Speaker|-50",
        "measure",
    ])
    .await;

    let error = result.expect_err("no instrument should be found");
    assert_eq!(
        "no instrument matching `CM*` was discovered",
        error.to_string()
    );
}

#[test]
fn fake_scan_fixture_must_have_three_fields() {
    let result = colorimeter::FakeArgs::builder().scan("invalid-record");
    assert!(matches!(
        result,
        Err(colorimeter::FixtureError::InvalidRecordFieldCount)
    ));
}

#[test]
fn measure_rejects_unknown_reading_kind() {
    let result = colorimeter::Args::try_parse_from(["colorimeter", "measure", "--reading", "xyz"]);

    let error = result.expect_err("unknown reading should fail command parsing");
    assert_eq!(ErrorKind::InvalidValue, error.kind());
}

#[test]
fn calibrate_requires_a_target() {
    let result = colorimeter::Args::try_parse_from(["colorimeter", "calibrate"]);

    let error = result.expect_err("calibrate without target should fail");
    assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
}
