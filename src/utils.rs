use std::fmt::Write as _;

/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    let mut rendered = String::with_capacity(bytes.len().saturating_mul(3));
    for (index, value) in bytes.iter().enumerate() {
        if index > 0 {
            rendered.push(' ');
        }
        let _ = write!(rendered, "{value:02X}");
    }
    rendered
}

/// Formats an optional RSSI for terminal output.
pub(crate) fn format_rssi(rssi: Option<i16>) -> String {
    rssi.map_or_else(|| "-".to_string(), |value| format!("{value} dBm"))
}

/// Formats a Lab component with two decimals, keeping the sign column aligned.
pub(crate) fn format_component(value: f32) -> String {
    format!("{value:>7.2}")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn format_hex_handles_empty_payload() {
        assert_eq!("<empty>", format_hex(&[]));
    }

    #[test]
    fn format_hex_formats_uppercase_pairs() {
        assert_eq!("BB 01 0A FF", format_hex(&[0xBB, 0x01, 0x0A, 0xFF]));
    }

    #[rstest]
    #[case(None, "-")]
    #[case(Some(-48), "-48 dBm")]
    fn format_rssi_renders_units(#[case] rssi: Option<i16>, #[case] expected: &str) {
        assert_eq!(expected, format_rssi(rssi));
    }

    #[rstest]
    #[case(53.2408, "  53.24")]
    #[case(-2.0, "  -2.00")]
    fn format_component_pads_to_width(#[case] value: f32, #[case] expected: &str) {
        assert_eq!(expected, format_component(value));
    }
}
