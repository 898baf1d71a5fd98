use std::io;

use anyhow::Result;
use bon::Builder;
use colorimeter_macros::progress;
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use crate::cli::{Command, FakeArgs, LogLevel, Output, OutputFormat};
use crate::hw::{FoundDevice, TransportBackend, transport_from_backend};
use crate::instrument::{InstrumentSession, SessionConfig};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Selects the host BLE stack.
#[must_use]
pub fn real_backend() -> TransportBackend {
    TransportBackend::Real
}

/// Selects the simulated instrument configured by `fake_args`.
#[must_use]
pub fn fake_backend(fake_args: FakeArgs) -> TransportBackend {
    TransportBackend::Fake(fake_args.into_backend_config())
}

/// Session-level app helper for acquiring an instrument connection.
pub struct SessionHandler {
    backend: TransportBackend,
    config: SessionConfig,
}

impl SessionHandler {
    /// Creates a session handler with the default session configuration.
    ///
    /// ```
    /// let handler = colorimeter::SessionHandler::new(colorimeter::real_backend());
    /// let _ = handler;
    /// ```
    #[must_use]
    pub fn new(backend: TransportBackend) -> Self {
        Self {
            backend,
            config: SessionConfig::default(),
        }
    }

    /// Overrides the session configuration.
    ///
    /// ```
    /// use colorimeter::{SessionConfig, SessionHandler, real_backend};
    ///
    /// let handler = SessionHandler::new(real_backend()).with_config(SessionConfig::default());
    /// let _ = handler;
    /// ```
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the transport and opens a session without connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport or adapter is unavailable.
    pub async fn open(self) -> Result<InstrumentSession> {
        let transport = transport_from_backend(self.backend).await?;
        Ok(InstrumentSession::open(transport, self.config).await?)
    }

    /// Opens a session and connects to the first matching instrument.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery or connection fails.
    #[progress(
        message = "Scanning for colorimeters and connecting",
        finished = format!("{} Connected", "✓".green()),
        failed = format!("{} Connection failed", "✗".red()),
    )]
    pub async fn connect_first(self) -> Result<(InstrumentSession, FoundDevice)> {
        let session = self.open().await?;
        match session.connect_first().await {
            Ok(device) => Ok((session, device)),
            Err(error) => {
                if let Err(cleanup) = session.dispose().await {
                    debug!(%cleanup, "failed to release session after connect failure");
                }
                Err(error.into())
            }
        }
    }
}

/// Output and logging settings for one CLI run.
#[derive(Debug, Clone, Default, Builder)]
pub struct RunOptions {
    log_level: Option<LogLevel>,
    /// Chosen from the terminal when absent.
    output_format: Option<OutputFormat>,
    #[builder(default)]
    session: SessionConfig,
}

impl RunOptions {
    /// Resolves run options from parsed arguments.
    #[must_use]
    pub fn from_args(args: &crate::cli::Args) -> Self {
        Self::builder()
            .maybe_log_level(args.log_level())
            .maybe_output_format(args.output_format())
            .session(args.session_config())
            .build()
    }
}

/// Runs the CLI command against `backend`.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = colorimeter::Args::try_parse_from([
///     "colorimeter",
///     "--fake",
///     "--fake-scan",
///     "AA:BB|CM-2600d|-43",
///     "scan",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let backend = match maybe_fake_args {
///     Some(fake_args) => colorimeter::fake_backend(fake_args),
///     None => colorimeter::real_backend(),
/// };
/// let mut out = Vec::new();
/// colorimeter::run(command, &mut out, backend).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run<W>(command: Command, out: &mut W, backend: TransportBackend) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(
        command,
        out,
        &SystemTerminalClient,
        backend,
        RunOptions::default(),
    )
    .await
}

/// Runs the CLI command with an injected terminal client and explicit options.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl colorimeter::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = colorimeter::Args::try_parse_from([
///     "colorimeter",
///     "--log-level",
///     "debug",
///     "--fake",
///     "measure",
/// ])?;
/// let options = colorimeter::RunOptions::from_args(&args);
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let backend = colorimeter::fake_backend(maybe_fake_args.unwrap_or_default());
/// let mut out = Vec::new();
/// colorimeter::run_with_clients(command, &mut out, &FakeTerminal, backend, options).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
#[instrument(
    skip(out, terminal_client, backend, options),
    level = "info",
    fields(command = command.name())
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: TransportBackend,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "colorimeter",
        terminal_client.stderr_is_terminal(),
        options.log_level.map(LogLevel::as_level_filter),
    )?;

    let stdout_is_terminal = terminal_client.stdout_is_terminal();
    let format = options.output_format.unwrap_or(if stdout_is_terminal {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });
    let mut output = Output::new(out, format, stdout_is_terminal);
    let handler = SessionHandler::new(backend).with_config(options.session);

    match command {
        Command::Scan => crate::cli::scan::run(handler, &mut output).await,
        Command::Measure(args) => crate::cli::measure::run(handler, &args, &mut output).await,
        Command::Calibrate(args) => crate::cli::calibrate::run(handler, &args, &mut output).await,
        Command::Status => crate::cli::status::run(handler, &mut output).await,
        Command::Listen(args) => crate::cli::listen::run(handler, &args, &mut output).await,
    }
}
