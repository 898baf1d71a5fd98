use std::time::Duration;

use thiserror::Error;
use tracing::trace;

use crate::protocol::{
    CommandKind, FRAME_MARKER, FRAME_TERMINATOR, SPECTRAL_MODE_BASE, STANDARD_FRAME_LEN,
    WAKE_BYTE, command_metadata,
};
use crate::utils::format_hex;

const HEADER_LEN: usize = 3;
const PARAMS_LEN: usize = 4;
const RESERVED_OFFSET: usize = HEADER_LEN + PARAMS_LEN;
const TERMINATOR_OFFSET: usize = RESERVED_OFFSET + 1;

/// Errors returned by frame construction.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum FrameCodecError {
    /// A command frame was requested with no bytes at all.
    #[error("command content must not be empty")]
    EmptyContent,
    /// Header or parameter blocks do not fit the 10-byte standard frame.
    #[error(
        "standard frame needs a {HEADER_LEN}-byte header and at most {PARAMS_LEN} parameter bytes, got {header_len} and {params_len}"
    )]
    InvalidLayout { header_len: usize, params_len: usize },
}

/// Stateless helpers for the instrument's wire framing.
pub struct FrameCodec;

impl FrameCodec {
    /// Lays out a command frame.
    ///
    /// With empty `params` the header is sent as-is (the wake preamble).
    /// Otherwise the result is the 10-byte standard frame
    /// `[header(3), params(4, zero padded), 0x00, 0xFF, checksum]` with the
    /// checksum slot left at zero.
    ///
    /// ```
    /// use colorimeter::FrameCodec;
    ///
    /// let frame = FrameCodec::build_content(&[0xBB, 0x03, 0x00], &[0x00])?;
    /// assert_eq!(10, frame.len());
    /// assert_eq!(0xFF, frame[8]);
    /// # Ok::<(), colorimeter::FrameCodecError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`FrameCodecError::EmptyContent`] when both inputs are empty and
    /// [`FrameCodecError::InvalidLayout`] when the blocks do not fit.
    pub fn build_content(header: &[u8], params: &[u8]) -> Result<Vec<u8>, FrameCodecError> {
        if header.is_empty() && params.is_empty() {
            return Err(FrameCodecError::EmptyContent);
        }
        if params.is_empty() {
            return Ok(header.to_vec());
        }
        if header.len() != HEADER_LEN || params.len() > PARAMS_LEN {
            return Err(FrameCodecError::InvalidLayout {
                header_len: header.len(),
                params_len: params.len(),
            });
        }

        Ok(standard_frame(header, params))
    }

    /// Sums every byte except the last, wrapping at 8 bits.
    ///
    /// ```
    /// use colorimeter::FrameCodec;
    ///
    /// assert_eq!(0x2C, FrameCodec::sign(&[0x96, 0x96, 0x00]));
    /// assert_eq!(0, FrameCodec::sign(&[0x42]));
    /// ```
    #[must_use]
    pub fn sign(buffer: &[u8]) -> u8 {
        let Some((_, body)) = buffer.split_last() else {
            return 0;
        };
        body.iter().fold(0_u8, |sum, byte| sum.wrapping_add(*byte))
    }

    /// Writes [`FrameCodec::sign`] into the last byte.
    pub fn apply_sign(buffer: &mut [u8]) {
        let checksum = Self::sign(buffer);
        if let Some(last) = buffer.last_mut() {
            *last = checksum;
        }
    }

    /// Returns whether the last byte holds the checksum of the rest.
    #[must_use]
    pub fn validate(buffer: &[u8]) -> bool {
        buffer
            .last()
            .is_some_and(|last| *last == Self::sign(buffer))
    }

    /// Splits `buffer` into consecutive slices of at most `max_unit` bytes.
    ///
    /// ```
    /// use colorimeter::FrameCodec;
    ///
    /// let chunks = FrameCodec::chunk(&[1, 2, 3, 4, 5], 2);
    /// assert_eq!(vec![vec![1, 2], vec![3, 4], vec![5]], chunks);
    /// ```
    #[must_use]
    pub fn chunk(buffer: &[u8], max_unit: usize) -> Vec<Vec<u8>> {
        buffer
            .chunks(max_unit.max(1))
            .map(<[u8]>::to_vec)
            .collect()
    }
}

fn standard_frame(header: &[u8], params: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x00; STANDARD_FRAME_LEN];
    frame[..HEADER_LEN].copy_from_slice(header);
    frame[HEADER_LEN..HEADER_LEN + params.len()].copy_from_slice(params);
    frame[TERMINATOR_OFFSET] = FRAME_TERMINATOR;
    frame
}

/// Immutable request descriptor for one instrument command.
///
/// Framed constructors lay their content out through
/// [`FrameCodec::build_content`] and return its error when the layout is rejected.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Command {
    kind: CommandKind,
    content: Vec<u8>,
    expected_response_len: usize,
    timeout: Duration,
    requires_checksum: bool,
}

impl Command {
    fn standard(
        kind: CommandKind,
        selector: u8,
        params: [u8; PARAMS_LEN],
    ) -> Result<Self, FrameCodecError> {
        let metadata = command_metadata(kind);
        let content =
            FrameCodec::build_content(&[FRAME_MARKER, metadata.opcode(), selector], &params)?;
        Ok(Self {
            kind,
            content,
            expected_response_len: metadata.response_len(),
            timeout: metadata.timeout(),
            requires_checksum: true,
        })
    }

    /// Single-byte wake preamble; no checksum, no response.
    #[must_use]
    pub fn wake() -> Self {
        Self {
            kind: CommandKind::Wake,
            content: vec![WAKE_BYTE],
            expected_response_len: 0,
            timeout: Duration::ZERO,
            requires_checksum: false,
        }
    }

    /// Triggers a measurement carrying the session's sequence number.
    pub fn measure(mode: u8, measure_id: u32) -> Result<Self, FrameCodecError> {
        Self::standard(CommandKind::Measure, mode, measure_id.to_le_bytes())
    }

    /// Reads the last measurement as Lab.
    pub fn get_lab(mode: u8) -> Result<Self, FrameCodecError> {
        Self::standard(CommandKind::GetLab, mode, [0; PARAMS_LEN])
    }

    /// Reads the last measurement as RGB.
    pub fn get_rgb(mode: u8) -> Result<Self, FrameCodecError> {
        Self::standard(CommandKind::GetRgb, mode, [0; PARAMS_LEN])
    }

    /// Reads the last measurement as a reflectance curve.
    pub fn get_spectral(mode: u8) -> Result<Self, FrameCodecError> {
        Self::standard(
            CommandKind::GetSpectral,
            SPECTRAL_MODE_BASE.wrapping_add(mode),
            [0; PARAMS_LEN],
        )
    }

    /// Runs white calibration; `verify` asks the device to report a status byte.
    pub fn white_calibration(verify: bool) -> Result<Self, FrameCodecError> {
        Self::standard(CommandKind::WhiteCalibration, u8::from(verify), [0; PARAMS_LEN])
    }

    /// Runs black calibration; `verify` asks the device to report a status byte.
    pub fn black_calibration(verify: bool) -> Result<Self, FrameCodecError> {
        Self::standard(CommandKind::BlackCalibration, u8::from(verify), [0; PARAMS_LEN])
    }

    pub fn calibration_info() -> Result<Self, FrameCodecError> {
        Self::standard(CommandKind::GetCalibrationInfo, 0x00, [0; PARAMS_LEN])
    }

    pub fn device_info() -> Result<Self, FrameCodecError> {
        Self::standard(CommandKind::GetDeviceInfo, 0x01, [0; PARAMS_LEN])
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Unsigned content as laid out by the catalog.
    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    #[must_use]
    pub fn expected_response_len(&self) -> usize {
        self.expected_response_len
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn requires_checksum(&self) -> bool {
        self.requires_checksum
    }

    /// Content with the checksum written into the last byte when required.
    #[must_use]
    pub fn signed_content(&self) -> Vec<u8> {
        let mut content = self.content.clone();
        if self.requires_checksum {
            FrameCodec::apply_sign(&mut content);
        }
        content
    }

    /// Signed content split into transport units.
    #[must_use]
    pub fn chunks(&self, max_unit: usize) -> Vec<Vec<u8>> {
        let signed = self.signed_content();
        trace!(kind = %self.kind, frame = %format_hex(&signed), "framed command");
        FrameCodec::chunk(&signed, max_unit)
    }

}
