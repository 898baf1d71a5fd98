use std::io;

use anyhow::Result;
use serde::Serialize;

use crate::SessionHandler;
use crate::error::ProtocolError;
use crate::handlers::{CalibrationInfo, DeviceInfo};
use crate::instrument::InstrumentSession;

use super::Output;
use super::ui::StatusView;

#[derive(Debug, Serialize)]
struct Status<'a> {
    device_id: &'a str,
    device: DeviceInfo,
    calibration: CalibrationInfo,
}

async fn query(
    session: &InstrumentSession,
) -> Result<(CalibrationInfo, DeviceInfo), ProtocolError> {
    let calibration = session.get_calibration_info().await?;
    let device = session.get_device_info().await?;
    Ok((calibration, device))
}

/// Executes the `status` command.
pub(crate) async fn run<W>(handler: SessionHandler, output: &mut Output<'_, W>) -> Result<()>
where
    W: io::Write,
{
    let (session, found) = handler.connect_first().await?;
    let queried = query(&session).await;
    session.dispose().await?;
    let (calibration, device) = queried?;

    let painter = output.painter();
    output.emit(
        &Status {
            device_id: found.device_id(),
            device,
            calibration,
        },
        StatusView::new(calibration, device, &painter),
    )
}
