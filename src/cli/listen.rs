use std::io;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::SessionHandler;
use crate::error::InteractionError;
use crate::events::DeviceEvent;
use crate::handlers::LabReading;
use crate::instrument::InstrumentSession;

use super::Output;
use super::ui::{EventView, LabView};

/// Arguments for the `listen` command.
#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Stop after this many events. If omitted, listen until Ctrl+C.
    #[arg(long)]
    max_events: Option<usize>,
    /// Read the Lab values whenever the instrument measures on its own.
    #[arg(long)]
    fetch_lab: bool,
}

impl ListenArgs {
    /// Creates listen arguments with an optional event limit.
    #[must_use]
    pub fn new(max_events: Option<usize>, fetch_lab: bool) -> Self {
        Self {
            max_events,
            fetch_lab,
        }
    }
}

#[derive(Debug, Serialize)]
struct FetchedLab {
    mode: u8,
    lab: LabReading,
}

fn limit_reached(seen: usize, max_events: Option<usize>) -> bool {
    max_events.is_some_and(|limit| seen >= limit)
}

async fn listen<W>(
    session: &InstrumentSession,
    args: &ListenArgs,
    output: &mut Output<'_, W>,
) -> Result<usize>
where
    W: io::Write,
{
    let painter = output.painter();
    let mut stream = session.stream();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut seen = 0;
    while !limit_reached(seen, args.max_events) {
        let event = tokio::select! {
            interrupted = &mut ctrl_c => {
                interrupted.map_err(|source| InteractionError::CtrlC { source })?;
                info!("interrupted");
                break;
            }
            next = stream.next() => match next {
                Some(event) => event,
                None => break,
            },
        };
        seen += 1;
        output.emit(&event, EventView::new(seen, &event, &painter))?;

        if let DeviceEvent::SpontaneousMeasurement { mode } = event
            && args.fetch_lab
        {
            let lab = session.get_lab(mode).await?;
            output.emit(&FetchedLab { mode, lab }, LabView::new(lab, &painter))?;
        }
    }
    Ok(seen)
}

/// Executes the `listen` command.
pub(crate) async fn run<W>(
    handler: SessionHandler,
    args: &ListenArgs,
    output: &mut Output<'_, W>,
) -> Result<()>
where
    W: io::Write,
{
    let (session, device) = handler.connect_first().await?;
    let painter = output.painter();
    output.note(painter.heading(format!("Listening to {}", device.device_id())))?;

    let listened = listen(&session, args, output).await;
    session.dispose().await?;
    let seen = listened?;
    debug!(seen, "listen finished");
    Ok(())
}
