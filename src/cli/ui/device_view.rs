use std::fmt::{self, Display, Formatter};

use crate::hw::FoundDevice;
use crate::utils::format_rssi;

use super::painter::Painter;
use super::table::Table;

const UNKNOWN_NAME: &str = "<unknown>";

/// Renders discovery results, one row per instrument.
pub(crate) struct DeviceListView<'a> {
    devices: &'a [FoundDevice],
    painter: &'a Painter,
}

impl<'a> DeviceListView<'a> {
    pub(crate) fn new(devices: &'a [FoundDevice], painter: &'a Painter) -> Self {
        Self { devices, painter }
    }
}

impl Display for DeviceListView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::grid(
            ["device_id", "name", "rssi"],
            self.devices
                .iter()
                .map(|device| {
                    vec![
                        self.painter.value(device.device_id()),
                        device.local_name().unwrap_or(UNKNOWN_NAME).to_string(),
                        format_rssi(device.rssi()),
                    ]
                })
                .collect(),
        );
        if table.is_empty() {
            return write!(f, "{}", self.painter.warning("No instruments found."));
        }
        write!(f, "{}", self.painter.heading("Instruments:"))?;
        write!(f, "\n{table}")
    }
}

/// Renders the instrument a command is talking to.
pub(crate) struct DeviceView<'a> {
    device: &'a FoundDevice,
    painter: &'a Painter,
}

impl<'a> DeviceView<'a> {
    pub(crate) fn new(device: &'a FoundDevice, painter: &'a Painter) -> Self {
        Self { device, painter }
    }
}

impl Display for DeviceView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = self.device.local_name().unwrap_or(UNKNOWN_NAME);
        let table = Table::key_value(
            self.painter,
            [
                ("device_id", self.painter.value(self.device.device_id())),
                ("name", self.painter.value(name)),
                ("rssi", self.painter.value(format_rssi(self.device.rssi()))),
            ],
        );
        write!(f, "{}", self.painter.heading("Connected instrument:"))?;
        write!(f, "\n{table}")
    }
}
