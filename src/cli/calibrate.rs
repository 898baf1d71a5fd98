use std::io;

use anyhow::Result;
use clap::{Args, ValueEnum};
use serde::Serialize;

use crate::SessionHandler;

use super::Output;
use super::ui::CalibrationView;

/// Reference tile being calibrated against.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationTarget {
    White,
    Black,
}

impl CalibrationTarget {
    fn label(self) -> &'static str {
        match self {
            Self::White => "White",
            Self::Black => "Black",
        }
    }
}

/// Arguments for the `calibrate` command.
#[derive(Debug, Args)]
pub struct CalibrateArgs {
    #[arg(value_enum)]
    target: CalibrationTarget,
    /// Let the instrument's status byte decide success.
    #[arg(long)]
    verify: bool,
}

impl CalibrateArgs {
    /// ```
    /// use colorimeter::{CalibrateArgs, CalibrationTarget};
    ///
    /// let args = CalibrateArgs::new(CalibrationTarget::White, true);
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(target: CalibrationTarget, verify: bool) -> Self {
        Self { target, verify }
    }
}

/// Executes the `calibrate` command.
pub(crate) async fn run<W>(
    handler: SessionHandler,
    args: &CalibrateArgs,
    output: &mut Output<'_, W>,
) -> Result<()>
where
    W: io::Write,
{
    let (session, device) = handler.connect_first().await?;
    let outcome = match args.target {
        CalibrationTarget::White => session.white_calibrate(args.verify).await,
        CalibrationTarget::Black => session.black_calibrate(args.verify).await,
    };
    session.dispose().await?;
    let outcome = outcome?;

    let painter = output.painter();
    output.emit(
        &serde_json::json!({
            "device_id": device.device_id(),
            "target": args.target,
            "success": outcome.success,
            "timestamp": outcome.timestamp,
        }),
        CalibrationView::new(args.target.label(), outcome, &painter),
    )
}
