use std::fmt::{self, Display, Formatter};

use crate::handlers::{
    CalibrationInfo, CalibrationOutcome, DeviceInfo, LabReading, Rgb, RgbReading,
    SpectralReading,
};
use crate::utils::format_component;

use super::painter::Painter;
use super::table::Table;

fn lab_rows(painter: &Painter, lab: LabReading) -> [(&'static str, String); 4] {
    [
        ("L", painter.value(format_component(lab.l))),
        ("a", painter.value(format_component(lab.a))),
        ("b", painter.value(format_component(lab.b))),
        ("display", painter.swatch(Rgb::from_lab(lab))),
    ]
}

/// Renders a Lab reading with its display colour.
pub(crate) struct LabView<'a> {
    lab: LabReading,
    painter: &'a Painter,
}

impl<'a> LabView<'a> {
    pub(crate) fn new(lab: LabReading, painter: &'a Painter) -> Self {
        Self { lab, painter }
    }
}

impl Display for LabView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(self.painter, lab_rows(self.painter, self.lab));
        write!(f, "{}", self.painter.heading("Lab reading:"))?;
        write!(f, "\n{table}")
    }
}

pub(crate) struct RgbView<'a> {
    rgb: RgbReading,
    painter: &'a Painter,
}

impl<'a> RgbView<'a> {
    pub(crate) fn new(rgb: RgbReading, painter: &'a Painter) -> Self {
        Self { rgb, painter }
    }
}

impl Display for RgbView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            [
                ("R", self.painter.value(self.rgb.r.to_string())),
                ("G", self.painter.value(self.rgb.g.to_string())),
                ("B", self.painter.value(self.rgb.b.to_string())),
            ],
        );
        write!(f, "{}", self.painter.heading("RGB reading:"))?;
        write!(f, "\n{table}")
    }
}

/// Renders the reflectance curve followed by the Lab values.
pub(crate) struct SpectralView<'a> {
    spectral: &'a SpectralReading,
    painter: &'a Painter,
}

impl<'a> SpectralView<'a> {
    pub(crate) fn new(spectral: &'a SpectralReading, painter: &'a Painter) -> Self {
        Self { spectral, painter }
    }
}

impl Display for SpectralView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.painter.heading("Spectral reading:"))?;
        if self.spectral.only_lab {
            write!(
                f,
                "\n{}",
                self.painter.warning("Instrument reported Lab values only.")
            )?;
        } else {
            let samples = Table::grid(
                ["wavelength_nm", "reflectance"],
                self.spectral
                    .wavelengths()
                    .map(|(wavelength, value)| {
                        vec![wavelength.to_string(), self.painter.value(format!("{value:.4}"))]
                    })
                    .collect(),
            );
            write!(f, "\n{samples}")?;
        }
        let lab = Table::key_value(self.painter, lab_rows(self.painter, self.spectral.lab));
        write!(f, "\n{lab}")
    }
}

pub(crate) struct CalibrationView<'a> {
    target: &'static str,
    outcome: CalibrationOutcome,
    painter: &'a Painter,
}

impl<'a> CalibrationView<'a> {
    pub(crate) fn new(
        target: &'static str,
        outcome: CalibrationOutcome,
        painter: &'a Painter,
    ) -> Self {
        Self {
            target,
            outcome,
            painter,
        }
    }
}

impl Display for CalibrationView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let verdict = if self.outcome.success {
            self.painter.success(format!("✓ {} calibration succeeded", self.target))
        } else {
            self.painter.warning(format!("✗ {} calibration failed", self.target))
        };
        write!(
            f,
            "{verdict} {}",
            self.painter
                .muted(format!("(timestamp {})", self.outcome.timestamp))
        )
    }
}

/// Renders calibration state and device identity together.
pub(crate) struct StatusView<'a> {
    calibration: CalibrationInfo,
    device: DeviceInfo,
    painter: &'a Painter,
}

impl<'a> StatusView<'a> {
    pub(crate) fn new(
        calibration: CalibrationInfo,
        device: DeviceInfo,
        painter: &'a Painter,
    ) -> Self {
        Self {
            calibration,
            device,
            painter,
        }
    }

    fn flag(&self, calibrated: bool) -> String {
        if calibrated {
            self.painter.success("yes")
        } else {
            self.painter.warning("no")
        }
    }
}

impl Display for StatusView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            [
                ("device_code", self.painter.value(format!("{:#06x}", self.device.code))),
                ("white_calibrated", self.flag(self.calibration.white_calibrated)),
                ("white_timestamp", self.calibration.white_timestamp.to_string()),
                ("black_calibrated", self.flag(self.calibration.black_calibrated)),
                ("black_timestamp", self.calibration.black_timestamp.to_string()),
            ],
        );
        write!(f, "{}", self.painter.heading("Instrument status:"))?;
        write!(f, "\n{table}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const PLAIN: Painter = Painter::new(false);

    fn lab() -> LabReading {
        LabReading {
            l: 100.0,
            a: 0.0,
            b: 0.0,
        }
    }

    #[test]
    fn lab_view_includes_display_hex() {
        let rendered = LabView::new(lab(), &PLAIN).to_string();

        assert!(rendered.starts_with("Lab reading:"));
        assert!(rendered.contains(" 100.00"));
        assert!(rendered.contains("#ffffff"));
    }

    #[test]
    fn spectral_view_lists_each_wavelength() {
        let spectral = SpectralReading {
            only_lab: false,
            wave_start: Some(400),
            interval: Some(10),
            wave_count: Some(2),
            samples: Some(vec![0.25, 0.5]),
            lab: lab(),
        };
        let rendered = SpectralView::new(&spectral, &PLAIN).to_string();

        assert!(rendered.contains("400"));
        assert!(rendered.contains("410"));
        assert!(rendered.contains("0.5000"));
    }

    #[test]
    fn lab_only_spectral_view_skips_the_curve() {
        let spectral = SpectralReading {
            only_lab: true,
            wave_start: None,
            interval: None,
            wave_count: None,
            samples: None,
            lab: lab(),
        };
        let rendered = SpectralView::new(&spectral, &PLAIN).to_string();

        assert!(rendered.contains("Lab values only"));
        assert!(!rendered.contains("wavelength_nm"));
    }

    #[test]
    fn calibration_view_reports_failure() {
        let outcome = CalibrationOutcome {
            success: false,
            timestamp: 7,
        };

        assert_eq!(
            "✗ white calibration failed (timestamp 7)",
            CalibrationView::new("white", outcome, &PLAIN).to_string()
        );
    }

    #[test]
    fn status_view_formats_device_code_as_hex() {
        let calibration = CalibrationInfo {
            white_calibrated: true,
            white_timestamp: 1,
            black_calibrated: false,
            black_timestamp: 0,
        };
        let rendered = StatusView::new(calibration, DeviceInfo { code: 0x2600 }, &PLAIN).to_string();

        assert!(rendered.contains("0x2600"));
        assert!(rendered.contains("yes"));
        assert!(rendered.contains("no"));
    }
}
