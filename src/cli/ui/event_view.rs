use std::fmt::{self, Display, Formatter};

use crate::events::DeviceEvent;

use super::painter::Painter;

/// One line per bus event.
pub(crate) struct EventView<'a> {
    index: usize,
    event: &'a DeviceEvent,
    painter: &'a Painter,
}

impl<'a> EventView<'a> {
    pub(crate) fn new(index: usize, event: &'a DeviceEvent, painter: &'a Painter) -> Self {
        Self {
            index,
            event,
            painter,
        }
    }
}

impl Display for EventView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let prefix = self.painter.muted(format!("[{}]", self.index));
        match self.event {
            DeviceEvent::StateUpdate {
                discovering,
                available,
            } => write!(
                f,
                "{prefix} {} discovering={discovering} available={available}",
                self.painter.value("adapter")
            ),
            DeviceEvent::Connected { device_id } => write!(
                f,
                "{prefix} {} {device_id}",
                self.painter.success("connected")
            ),
            DeviceEvent::Disconnected { device_id } => write!(
                f,
                "{prefix} {} {device_id}",
                self.painter.warning("disconnected")
            ),
            DeviceEvent::SpontaneousMeasurement { mode } => write!(
                f,
                "{prefix} {} mode={mode}",
                self.painter.heading("measured")
            ),
        }
    }
}
