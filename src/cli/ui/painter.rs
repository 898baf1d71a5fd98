use owo_colors::{OwoColorize, Style as OwoStyle};

use crate::handlers::Rgb;

const SWATCH: &str = "██████";

/// Applies colour and style to terminal text.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) const fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn heading<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().cyan())
    }

    pub(crate) fn success<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().green())
    }

    pub(crate) fn warning<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().yellow())
    }

    pub(crate) fn muted<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().dimmed())
    }

    pub(crate) fn value<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold())
    }

    /// A truecolor block followed by the hex code; just the hex code without colour.
    pub(crate) fn swatch(&self, rgb: Rgb) -> String {
        if self.use_colour {
            format!(
                "{} {}",
                SWATCH.style(OwoStyle::new().truecolor(rgb.r, rgb.g, rgb.b)),
                rgb.hex()
            )
        } else {
            rgb.hex()
        }
    }

    fn paint(&self, text: &str, style: OwoStyle) -> String {
        if self.use_colour {
            format!("{}", text.style(style))
        } else {
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn apply(painter: &Painter, style: &str, text: &str) -> String {
        match style {
            "heading" => painter.heading(text),
            "success" => painter.success(text),
            "warning" => painter.warning(text),
            "muted" => painter.muted(text),
            "value" => painter.value(text),
            other => panic!("unknown style: {other}"),
        }
    }

    #[rstest]
    #[case::heading("heading")]
    #[case::success("success")]
    #[case::warning("warning")]
    #[case::muted("muted")]
    #[case::value("value")]
    fn plain_painter_leaves_text_alone(#[case] style: &str) {
        let painter = Painter::new(false);
        assert_eq!("L*a*b*", apply(&painter, style, "L*a*b*"));
    }

    #[rstest]
    #[case::heading("heading")]
    #[case::success("success")]
    #[case::muted("muted")]
    fn colour_painter_wraps_text(#[case] style: &str) {
        let styled = apply(&Painter::new(true), style, "reading");
        assert_ne!("reading", styled);
        assert!(styled.contains("reading"));
    }

    #[test]
    fn swatch_falls_back_to_hex_without_colour() {
        assert_eq!("#ff8000", Painter::new(false).swatch(Rgb::new(255, 128, 0)));
    }

    #[test]
    fn swatch_uses_truecolor_escape() {
        let swatch = Painter::new(true).swatch(Rgb::new(255, 128, 0));
        assert!(swatch.contains("38;2;255;128;0"));
        assert!(swatch.ends_with("#ff8000"));
    }
}
