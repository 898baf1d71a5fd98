use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::calibrate::CalibrateArgs;
use crate::cli::listen::ListenArgs;
use crate::cli::measure::MeasureArgs;
use crate::error::{CliConfigError, FixtureError};
use crate::hw::{FakeBackendConfig, FakeReadings, LabFixture, ScanFixture};
use crate::instrument::SessionConfig;
use crate::protocol::{DEFAULT_NAME_PREFIX, PrefixRule};

/// Command-line options for the colorimeter BLE tool.
#[derive(Debug, Parser)]
#[command(name = "colorimeter", about = "Measure colour with CM-series BLE colorimeters.")]
pub struct Args {
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Local-name prefix an instrument must advertise.
    #[arg(long, global = true, default_value = DEFAULT_NAME_PREFIX)]
    name_prefix: String,
    /// Discovery window (e.g. `5s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    scan_timeout: Option<Duration>,
    /// Pause between waking the instrument and sending a command.
    #[arg(long, global = true, value_parser = parse_duration)]
    settle_delay: Option<Duration>,
    /// Link-establish timeout.
    #[arg(long, global = true, value_parser = parse_duration)]
    link_timeout: Option<Duration>,
    /// Uses the simulated instrument instead of the host BLE stack.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake discovery records in the form `device_id|name|rssi;...` (`-` for absent).
    #[arg(long, global = true, requires = "fake")]
    fake_scan: Option<ScanFixture>,
    /// Fake Lab reading as `L,a,b`.
    #[arg(long, global = true, requires = "fake", allow_hyphen_values = true)]
    fake_lab: Option<LabFixture>,
    /// Modes of measure-button presses the fake instrument simulates after connecting.
    #[arg(long, global = true, requires = "fake", value_delimiter = ',')]
    fake_presses: Vec<u8>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use colorimeter::{Args, Command, ListenArgs};
    ///
    /// let scan = Args::new(Command::Scan);
    /// let listen = Args::new(Command::Listen(ListenArgs::new(Some(3), true)));
    /// let _ = (scan, listen);
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            scan_timeout: None,
            settle_delay: None,
            link_timeout: None,
            fake: false,
            fake_scan: None,
            fake_lab: None,
            fake_presses: Vec::new(),
            command,
        }
    }

    /// Enables fake backend mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            lab,
            presses,
        } = fake;

        self.fake = true;
        self.fake_scan = scan_fixture;
        self.fake_lab = lab;
        self.fake_presses = presses;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Explicit output format, if one was requested.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Session tunables resolved from the global flags.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::builder()
            .name_rule(PrefixRule::exact(self.name_prefix.as_str()))
            .maybe_scan_duration(self.scan_timeout)
            .maybe_settle_delay(self.settle_delay)
            .maybe_link_timeout(self.link_timeout)
            .build()
    }

    /// Splits parsed CLI arguments into command and optional fake-backend settings.
    ///
    /// # Errors
    ///
    /// Returns an error if fake fixtures were supplied without `--fake`.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_lab,
            fake_presses,
            command,
            ..
        } = self;

        if !fake {
            if fake_scan.is_some() || fake_lab.is_some() || !fake_presses.is_empty() {
                return Err(CliConfigError::FakeFixtureWithoutFake.into());
            }
            return Ok((command, None));
        }

        Ok((
            command,
            Some(FakeArgs {
                scan_fixture: fake_scan,
                lab: fake_lab,
                presses: fake_presses,
            }),
        ))
    }
}

/// Fake backend arguments for programmatic runs.
///
/// ```
/// use colorimeter::FakeArgs;
///
/// let fake = FakeArgs::builder()
///     .scan("AA:BB|CM-2600d|-40")?
///     .lab("50,0,0")?
///     .build();
/// let _ = fake;
/// # Ok::<(), colorimeter::FixtureError>(())
/// ```
#[derive(Debug, Clone, Default, Builder)]
#[builder(derive(Debug))]
pub struct FakeArgs {
    #[builder(name = scan, with = |value: &str| -> Result<_, FixtureError> { value.parse() })]
    scan_fixture: Option<ScanFixture>,
    #[builder(with = |value: &str| -> Result<_, FixtureError> { value.parse() })]
    lab: Option<LabFixture>,
    #[builder(default)]
    presses: Vec<u8>,
}

impl FakeArgs {
    pub(crate) fn into_backend_config(self) -> FakeBackendConfig {
        let Self {
            scan_fixture,
            lab,
            presses,
        } = self;

        FakeBackendConfig::builder()
            .maybe_devices(scan_fixture.map(Into::into))
            .readings(
                FakeReadings::builder()
                    .maybe_lab(lab.map(Into::into))
                    .build(),
            )
            .button_presses(presses)
            .build()
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How command results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Tables and colour swatches.
    Pretty,
    /// One JSON document per line.
    Json,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List instruments advertising the configured name prefix.
    Scan,
    /// Connect to the first instrument and take a reading.
    Measure(MeasureArgs),
    /// Connect to the first instrument and run white or black calibration.
    Calibrate(CalibrateArgs),
    /// Connect to the first instrument and report calibration and device info.
    Status,
    /// Connect to the first instrument and print session events.
    Listen(ListenArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Measure(_) => "measure",
            Self::Calibrate(_) => "calibrate",
            Self::Status => "status",
            Self::Listen(_) => "listen",
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
