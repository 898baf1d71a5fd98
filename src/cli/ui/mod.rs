mod device_view;
mod event_view;
mod painter;
mod reading_view;
mod table;

pub(crate) use self::device_view::{DeviceListView, DeviceView};
pub(crate) use self::event_view::EventView;
pub(crate) use self::painter::Painter;
pub(crate) use self::reading_view::{CalibrationView, LabView, RgbView, SpectralView, StatusView};
