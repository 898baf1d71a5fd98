pub(crate) mod calibrate;
pub(crate) mod command;
pub(crate) mod listen;
pub(crate) mod measure;
pub(crate) mod scan;
pub(crate) mod status;
pub(crate) mod ui;

use std::fmt::Display;
use std::io;

use serde::Serialize;

use self::ui::Painter;

pub use self::calibrate::{CalibrateArgs, CalibrationTarget};
pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::listen::ListenArgs;
pub use self::measure::{MeasureArgs, ReadingKind};

/// Writes command results in the selected format.
pub(crate) struct Output<'a, W> {
    out: &'a mut W,
    format: OutputFormat,
    painter: Painter,
}

impl<'a, W: io::Write> Output<'a, W> {
    pub(crate) fn new(out: &'a mut W, format: OutputFormat, use_colour: bool) -> Self {
        Self {
            out,
            format,
            painter: Painter::new(use_colour && format == OutputFormat::Pretty),
        }
    }

    pub(crate) fn painter(&self) -> Painter {
        self.painter
    }

    /// Writes `value` as one JSON line, or `pretty` followed by a newline.
    pub(crate) fn emit<T>(&mut self, value: &T, pretty: impl Display) -> anyhow::Result<()>
    where
        T: Serialize + ?Sized,
    {
        match self.format {
            OutputFormat::Json => writeln!(self.out, "{}", serde_json::to_string(value)?)?,
            OutputFormat::Pretty => writeln!(self.out, "{pretty}")?,
        }
        Ok(())
    }

    /// Writes a line in pretty mode only.
    pub(crate) fn note(&mut self, pretty: impl Display) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => Ok(()),
            OutputFormat::Pretty => writeln!(self.out, "{pretty}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn json_output_ignores_pretty_rendering() -> anyhow::Result<()> {
        let mut buffer = Vec::new();
        let mut output = Output::new(&mut buffer, OutputFormat::Json, true);

        output.emit(&json!({"L": 50.0}), "ignored")?;
        output.note("also ignored")?;

        assert_eq!("{\"L\":50.0}\n", String::from_utf8(buffer)?);
        Ok(())
    }

    #[test]
    fn pretty_output_writes_the_view() -> anyhow::Result<()> {
        let mut buffer = Vec::new();
        let mut output = Output::new(&mut buffer, OutputFormat::Pretty, false);

        output.emit(&json!({}), "Lab reading:")?;

        assert_eq!("Lab reading:\n", String::from_utf8(buffer)?);
        Ok(())
    }
}
