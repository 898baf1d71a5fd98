use serde::Serialize;

use super::LabReading;

const EPSILON_ROOT: f64 = 6.0 / 29.0;
const LINEAR_OFFSET: f64 = 16.0 / 116.0;
const LINEAR_SLOPE: f64 = 7.787;
const WHITE_X: f64 = 0.95047;
const WHITE_Z: f64 = 1.08883;
const GAMMA_THRESHOLD: f64 = 0.003_130_8;

/// Display colour in 8-bit sRGB.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// Creates an RGB colour.
    ///
    /// ```
    /// use colorimeter::Rgb;
    ///
    /// let colour = Rgb::new(255, 127, 0);
    /// assert_eq!(255, colour.r);
    /// ```
    #[must_use]
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Converts CIE Lab (D65) to display sRGB.
    ///
    /// ```
    /// use colorimeter::{LabReading, Rgb};
    ///
    /// let white = Rgb::from_lab(LabReading { l: 100.0, a: 0.0, b: 0.0 });
    /// assert_eq!(Rgb::new(255, 255, 255), white);
    /// ```
    #[must_use]
    pub fn from_lab(lab: LabReading) -> Self {
        lab_to_rgb(f64::from(lab.l), f64::from(lab.a), f64::from(lab.b))
    }

    /// Lowercase `#rrggbb` rendering.
    #[must_use]
    pub fn hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Lab → XYZ → linear sRGB → companded sRGB, each channel rounded and clamped.
#[must_use]
pub fn lab_to_rgb(l: f64, a: f64, b: f64) -> Rgb {
    let fy = (l + 16.0) / 116.0;
    let fx = a / 500.0 + fy;
    let fz = fy - b / 200.0;

    let x = expand(fx) * WHITE_X;
    let y = expand(fy);
    let z = expand(fz) * WHITE_Z;

    let red = 3.2406 * x - 1.5372 * y - 0.4986 * z;
    let green = -0.9689 * x + 1.8758 * y + 0.0415 * z;
    let blue = 0.0557 * x - 0.2040 * y + 1.0570 * z;

    Rgb::new(to_channel(red), to_channel(green), to_channel(blue))
}

fn expand(t: f64) -> f64 {
    if t > EPSILON_ROOT {
        t.powi(3)
    } else {
        (t - LINEAR_OFFSET) / LINEAR_SLOPE
    }
}

fn to_channel(linear: f64) -> u8 {
    let companded = if linear > GAMMA_THRESHOLD {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    } else {
        12.92 * linear
    };
    // NaN clamps to 0 as well.
    let scaled = (companded * 255.0).round();
    if scaled >= 255.0 {
        u8::MAX
    } else if scaled > 0.0 {
        scaled as u8
    } else {
        0
    }
}
