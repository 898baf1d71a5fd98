use std::fmt;
use std::time::Duration;

use serde_with::SerializeDisplay;
use strum_macros::{Display, EnumIter};

/// Maximum bytes carried by one characteristic write.
pub const TRANSPORT_CHUNK_SIZE: usize = 20;
/// Length of every standard command frame.
pub const STANDARD_FRAME_LEN: usize = 10;
/// First byte of every standard frame.
pub(crate) const FRAME_MARKER: u8 = 0xBB;
/// Single-byte wake preamble.
pub(crate) const WAKE_BYTE: u8 = 0xF0;
/// Byte 8 of every standard frame.
pub(crate) const FRAME_TERMINATOR: u8 = 0xFF;
/// Offset added to the mode byte of spectral reads (new spectral protocol).
pub(crate) const SPECTRAL_MODE_BASE: u8 = 0x10;

/// Advertised-name prefix of supported instruments.
pub const DEFAULT_NAME_PREFIX: &str = "CM";
/// Identifier prefix of the instrument's data service.
pub const DEFAULT_SERVICE_PREFIX: &str = "0000FFE0";
/// Identifier prefix of the write/notify characteristic.
pub const DEFAULT_CHARACTERISTIC_PREFIX: &str = "0000FFE1";
/// Delay between wake-up and the following command.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(50);
/// Upper bound on link establishment.
pub const DEFAULT_LINK_TIMEOUT: Duration = Duration::from_millis(2_000);
/// Discovery window used when scanning.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);

/// Commands understood by the instrument.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display, SerializeDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum CommandKind {
    /// Single-byte wake preamble sent before every command.
    Wake,
    /// Triggers a measurement.
    Measure,
    /// Reads the last measurement as CIE Lab.
    GetLab,
    /// Reads the last measurement as RGB.
    GetRgb,
    /// Reads the last measurement as a reflectance curve.
    GetSpectral,
    /// Runs white calibration.
    WhiteCalibration,
    /// Runs black calibration.
    BlackCalibration,
    /// Reads calibration state.
    GetCalibrationInfo,
    /// Reads device information.
    GetDeviceInfo,
}

/// Fixed framing parameters for one command kind.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct CommandMetadata {
    opcode: u8,
    response_len: usize,
    timeout: Duration,
}

impl CommandMetadata {
    /// Byte 1 of the standard frame (the wake byte for [`CommandKind::Wake`]).
    pub(crate) fn opcode(self) -> u8 {
        self.opcode
    }

    /// Length of a complete response.
    pub(crate) fn response_len(self) -> usize {
        self.response_len
    }

    /// Time allowed for the response to complete.
    pub(crate) fn timeout(self) -> Duration {
        self.timeout
    }
}

/// Returns framing metadata for one command kind.
pub(crate) fn command_metadata(kind: CommandKind) -> CommandMetadata {
    const SHORT: Duration = Duration::from_millis(1_500);
    const LONG: Duration = Duration::from_millis(5_000);

    let (opcode, response_len, timeout) = match kind {
        CommandKind::Wake => (WAKE_BYTE, 0, Duration::ZERO),
        CommandKind::Measure => (0x01, 10, SHORT),
        CommandKind::GetLab => (0x03, 20, SHORT),
        CommandKind::GetRgb => (0x04, 20, SHORT),
        CommandKind::GetSpectral => (0x02, 200, LONG),
        CommandKind::WhiteCalibration => (0x11, 10, SHORT),
        CommandKind::BlackCalibration => (0x10, 10, SHORT),
        CommandKind::GetCalibrationInfo => (0x1E, 20, SHORT),
        CommandKind::GetDeviceInfo => (0x12, 200, LONG),
    };

    CommandMetadata {
        opcode,
        response_len,
        timeout,
    }
}

/// Prefix predicate over textual identifiers (device names, GATT UUIDs).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PrefixRule {
    prefix: String,
    ignore_ascii_case: bool,
}

impl PrefixRule {
    /// Creates a case-sensitive rule.
    ///
    /// ```
    /// use colorimeter::PrefixRule;
    ///
    /// let rule = PrefixRule::exact("CM");
    /// assert!(rule.matches("CM-2600d"));
    /// assert!(!rule.matches("cm-2600d"));
    /// ```
    #[must_use]
    pub fn exact(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ignore_ascii_case: false,
        }
    }

    /// Creates a rule that ignores ASCII case, as used for GATT UUIDs.
    ///
    /// ```
    /// use colorimeter::PrefixRule;
    ///
    /// let rule = PrefixRule::ignore_ascii_case("0000FFE0");
    /// assert!(rule.matches("0000ffe0-0000-1000-8000-00805f9b34fb"));
    /// ```
    #[must_use]
    pub fn ignore_ascii_case(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ignore_ascii_case: true,
        }
    }

    /// Returns the raw prefix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    /// Returns whether `identifier` starts with this rule's prefix.
    #[must_use]
    pub fn matches(&self, identifier: &str) -> bool {
        let prefix = self.prefix.as_bytes();
        let Some(head) = identifier.as_bytes().get(..prefix.len()) else {
            return false;
        };

        if self.ignore_ascii_case {
            head.eq_ignore_ascii_case(prefix)
        } else {
            head == prefix
        }
    }
}

impl fmt::Display for PrefixRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)
    }
}
