use std::io;

use anyhow::Result;
use clap::{Args, ValueEnum};
use serde::Serialize;

use crate::SessionHandler;
use crate::error::ProtocolError;
use crate::handlers::{LabReading, RgbReading, SpectralReading};
use crate::hw::FoundDevice;
use crate::instrument::InstrumentSession;

use super::Output;
use super::ui::{DeviceView, LabView, RgbView, SpectralView};

/// Which reading the `measure` command fetches.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, ValueEnum)]
pub enum ReadingKind {
    #[default]
    Lab,
    Rgb,
    Spectral,
}

/// Arguments for the `measure` command.
#[derive(Debug, Args)]
pub struct MeasureArgs {
    /// Reading to fetch after measuring.
    #[arg(long, value_enum, default_value_t = ReadingKind::Lab)]
    reading: ReadingKind,
    /// Instrument measurement mode byte.
    #[arg(long, default_value_t = 0)]
    mode: u8,
    /// Fetch the last stored measurement without triggering a new one.
    #[arg(long)]
    no_trigger: bool,
}

impl MeasureArgs {
    /// Creates measure arguments directly without CLI parsing.
    ///
    /// ```
    /// use colorimeter::{MeasureArgs, ReadingKind};
    ///
    /// let args = MeasureArgs::new(ReadingKind::Spectral, 1, true);
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(reading: ReadingKind, mode: u8, trigger: bool) -> Self {
        Self {
            reading,
            mode,
            no_trigger: !trigger,
        }
    }

    #[must_use]
    pub(crate) fn reading(&self) -> ReadingKind {
        self.reading
    }

    #[must_use]
    pub(crate) fn mode(&self) -> u8 {
        self.mode
    }

    /// Whether a new measurement is triggered before reading.
    #[must_use]
    pub(crate) fn trigger(&self) -> bool {
        !self.no_trigger
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "reading", rename_all = "snake_case")]
enum MeasureReport {
    Lab(LabReading),
    Rgb(RgbReading),
    Spectral(SpectralReading),
}

#[derive(Debug, Serialize)]
struct Measurement<'a> {
    device_id: &'a str,
    mode: u8,
    #[serde(flatten)]
    report: MeasureReport,
}

async fn take_reading(
    session: &InstrumentSession,
    args: &MeasureArgs,
) -> Result<MeasureReport, ProtocolError> {
    let mode = args.mode();
    let report = match (args.reading(), args.trigger()) {
        (ReadingKind::Lab, true) => MeasureReport::Lab(session.measure_and_get_lab(mode).await?),
        (ReadingKind::Lab, false) => MeasureReport::Lab(session.get_lab(mode).await?),
        (ReadingKind::Rgb, true) => MeasureReport::Rgb(session.measure_and_get_rgb(mode).await?),
        (ReadingKind::Rgb, false) => MeasureReport::Rgb(session.get_rgb(mode).await?),
        (ReadingKind::Spectral, true) => {
            MeasureReport::Spectral(session.measure_and_get_spectral(mode).await?)
        }
        (ReadingKind::Spectral, false) => {
            MeasureReport::Spectral(session.get_spectral(mode).await?)
        }
    };
    Ok(report)
}

fn render<W: io::Write>(
    device: &FoundDevice,
    mode: u8,
    report: MeasureReport,
    output: &mut Output<'_, W>,
) -> Result<()> {
    let painter = output.painter();
    let pretty = {
        let device_view = DeviceView::new(device, &painter);
        let reading_view = match &report {
            MeasureReport::Lab(lab) => LabView::new(*lab, &painter).to_string(),
            MeasureReport::Rgb(rgb) => RgbView::new(*rgb, &painter).to_string(),
            MeasureReport::Spectral(spectral) => {
                SpectralView::new(spectral, &painter).to_string()
            }
        };
        format!("{device_view}\n\n{reading_view}")
    };
    let measurement = Measurement {
        device_id: device.device_id(),
        mode,
        report,
    };
    output.emit(&measurement, pretty)
}

/// Executes the `measure` command.
pub(crate) async fn run<W>(
    handler: SessionHandler,
    args: &MeasureArgs,
    output: &mut Output<'_, W>,
) -> Result<()>
where
    W: io::Write,
{
    let (session, device) = handler.connect_first().await?;
    let reading = take_reading(&session, args).await;
    session.dispose().await?;

    render(&device, args.mode(), reading?, output)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::cli::OutputFormat;

    #[test]
    fn json_measurement_tags_the_reading_kind() -> Result<()> {
        let device = FoundDevice::new("AA:BB".into(), Some("CM-2600d".into()), Some(-40));
        let mut buffer = Vec::new();
        let mut output = Output::new(&mut buffer, OutputFormat::Json, false);

        render(
            &device,
            1,
            MeasureReport::Rgb(RgbReading { r: 1, g: 2, b: 3 }),
            &mut output,
        )?;

        let value: serde_json::Value = serde_json::from_slice(&buffer)?;
        assert_eq!(
            json!({"device_id": "AA:BB", "mode": 1, "reading": "rgb", "R": 1, "G": 2, "B": 3}),
            value
        );
        Ok(())
    }

    #[test]
    fn pretty_measurement_shows_device_then_reading() -> Result<()> {
        let device = FoundDevice::new("AA:BB".into(), None, None);
        let mut buffer = Vec::new();
        let mut output = Output::new(&mut buffer, OutputFormat::Pretty, false);

        render(
            &device,
            0,
            MeasureReport::Lab(LabReading {
                l: 50.0,
                a: 0.0,
                b: 0.0,
            }),
            &mut output,
        )?;

        let rendered = String::from_utf8(buffer)?;
        let device_at = rendered.find("Connected instrument:");
        let lab_at = rendered.find("Lab reading:");
        assert!(device_at.is_some());
        assert!(device_at < lab_at);
        Ok(())
    }
}
