use std::io;

use anyhow::Result;

use crate::SessionHandler;

use super::Output;
use super::ui::DeviceListView;

/// Executes the `scan` command.
pub(crate) async fn run<W>(handler: SessionHandler, output: &mut Output<'_, W>) -> Result<()>
where
    W: io::Write,
{
    let session = handler.open().await?;
    let scanned = session.scan().await;
    session.dispose().await?;
    let devices = scanned?;

    let painter = output.painter();
    output.emit(&devices, DeviceListView::new(&devices, &painter))
}
