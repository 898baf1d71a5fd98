use serde::Serialize;
use thiserror::Error;

use crate::protocol::CommandKind;

const LAB_OFFSET: usize = 5;
const RGB_OFFSET: usize = 5;
const SPECTRAL_FLAG_OFFSET: usize = 3;
const SPECTRAL_WAVE_START_OFFSET: usize = 4;
const SPECTRAL_INTERVAL_OFFSET: usize = 6;
const SPECTRAL_COUNT_OFFSET: usize = 7;
const SPECTRAL_SAMPLES_OFFSET: usize = 8;
const SPECTRAL_LAB_OFFSET: usize = 184;
const SPECTRAL_ONLY_LAB: u8 = 1;
const CALIBRATION_STATUS_OFFSET: usize = 2;
const CALIBRATION_TIMESTAMP_OFFSET: usize = 3;
const WHITE_STATUS_OFFSET: usize = 2;
const WHITE_TIMESTAMP_OFFSET: usize = 3;
const BLACK_STATUS_OFFSET: usize = 7;
const BLACK_TIMESTAMP_OFFSET: usize = 8;
const DEVICE_CODE_OFFSET: usize = 5;
const SAMPLE_LEN: usize = 4;

/// Errors returned when a response buffer cannot be decoded.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum DecodeError {
    /// A field lies beyond the end of the response.
    #[error("{kind} response needs at least {required} bytes, got {actual}")]
    ResponseTooShort {
        kind: CommandKind,
        required: usize,
        actual: usize,
    },
    /// The declared sample count would run into the trailing Lab block.
    #[error("spectral response declares {wave_count} samples but only {capacity} fit")]
    SampleOverrun { wave_count: u8, capacity: usize },
}

/// CIE Lab coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LabReading {
    #[serde(rename = "L")]
    pub l: f32,
    pub a: f32,
    pub b: f32,
}

/// Instrument-reported RGB triple.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct RgbReading {
    #[serde(rename = "R")]
    pub r: u16,
    #[serde(rename = "G")]
    pub g: u16,
    #[serde(rename = "B")]
    pub b: u16,
}

/// Reflectance curve plus Lab coordinates.
///
/// When `only_lab` is set the wavelength fields are absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralReading {
    pub only_lab: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave_start: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave_count: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<f32>>,
    #[serde(flatten)]
    pub lab: LabReading,
}

impl SpectralReading {
    /// Pairs each sample with its wavelength in nanometres.
    pub fn wavelengths(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        let start = u32::from(self.wave_start.unwrap_or_default());
        let interval = u32::from(self.interval.unwrap_or_default());
        self.samples
            .iter()
            .flatten()
            .zip(0_u32..)
            .map(move |(sample, index)| (start + index * interval, *sample))
    }
}

/// White/black calibration state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct CalibrationInfo {
    pub white_calibrated: bool,
    pub white_timestamp: u32,
    pub black_calibrated: bool,
    pub black_timestamp: u32,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub code: u16,
}

/// Result of a white or black calibration run.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct CalibrationOutcome {
    pub success: bool,
    pub timestamp: u32,
}

/// Fixed-offset decoders for completed response buffers.
pub struct ReadingDecoder;

impl ReadingDecoder {
    /// Decodes a Get-Lab response.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::ResponseTooShort`] when the Lab block is truncated.
    pub fn decode_lab(data: &[u8]) -> Result<LabReading, DecodeError> {
        read_lab(CommandKind::GetLab, data, LAB_OFFSET)
    }

    /// Decodes a Get-RGB response.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::ResponseTooShort`] when the RGB block is truncated.
    pub fn decode_rgb(data: &[u8]) -> Result<RgbReading, DecodeError> {
        let kind = CommandKind::GetRgb;
        Ok(RgbReading {
            r: u16::from_le_bytes(read_array(kind, data, RGB_OFFSET)?),
            g: u16::from_le_bytes(read_array(kind, data, RGB_OFFSET + 2)?),
            b: u16::from_le_bytes(read_array(kind, data, RGB_OFFSET + 4)?),
        })
    }

    /// Decodes a Get-Spectral response.
    ///
    /// The flag byte selects between a Lab-only payload and a full curve; the
    /// wavelength start is stored big-endian, unlike every other field.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::ResponseTooShort`] for truncated buffers and
    /// [`DecodeError::SampleOverrun`] when the sample count runs past the Lab block.
    pub fn decode_spectral(data: &[u8]) -> Result<SpectralReading, DecodeError> {
        let kind = CommandKind::GetSpectral;
        let [flag] = read_array(kind, data, SPECTRAL_FLAG_OFFSET)?;
        let lab = read_lab(kind, data, SPECTRAL_LAB_OFFSET)?;

        if flag == SPECTRAL_ONLY_LAB {
            return Ok(SpectralReading {
                only_lab: true,
                wave_start: None,
                interval: None,
                wave_count: None,
                samples: None,
                lab,
            });
        }

        let wave_start = u16::from_be_bytes(read_array(kind, data, SPECTRAL_WAVE_START_OFFSET)?);
        let [interval] = read_array(kind, data, SPECTRAL_INTERVAL_OFFSET)?;
        let [wave_count] = read_array(kind, data, SPECTRAL_COUNT_OFFSET)?;

        let capacity = (SPECTRAL_LAB_OFFSET - SPECTRAL_SAMPLES_OFFSET) / SAMPLE_LEN;
        if usize::from(wave_count) > capacity {
            return Err(DecodeError::SampleOverrun {
                wave_count,
                capacity,
            });
        }

        let samples = (0..usize::from(wave_count))
            .map(|index| {
                read_array(kind, data, SPECTRAL_SAMPLES_OFFSET + index * SAMPLE_LEN)
                    .map(f32::from_le_bytes)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SpectralReading {
            only_lab: false,
            wave_start: Some(wave_start),
            interval: Some(interval),
            wave_count: Some(wave_count),
            samples: Some(samples),
            lab,
        })
    }

    /// Decodes a Get-Calibration-Info response.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::ResponseTooShort`] when a status or timestamp is truncated.
    pub fn decode_calibration_info(data: &[u8]) -> Result<CalibrationInfo, DecodeError> {
        let kind = CommandKind::GetCalibrationInfo;
        let [white] = read_array(kind, data, WHITE_STATUS_OFFSET)?;
        let [black] = read_array(kind, data, BLACK_STATUS_OFFSET)?;
        Ok(CalibrationInfo {
            white_calibrated: white == 1,
            white_timestamp: u32::from_le_bytes(read_array(kind, data, WHITE_TIMESTAMP_OFFSET)?),
            black_calibrated: black == 1,
            black_timestamp: u32::from_le_bytes(read_array(kind, data, BLACK_TIMESTAMP_OFFSET)?),
        })
    }

    /// Decodes a Get-Device-Info response.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::ResponseTooShort`] when the code field is truncated.
    pub fn decode_device_info(data: &[u8]) -> Result<DeviceInfo, DecodeError> {
        Ok(DeviceInfo {
            code: u16::from_le_bytes(read_array(
                CommandKind::GetDeviceInfo,
                data,
                DEVICE_CODE_OFFSET,
            )?),
        })
    }

    /// Decodes a white/black calibration response.
    ///
    /// Without `verify` the status byte is ignored and the run counts as successful.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::ResponseTooShort`] when the status or timestamp is truncated.
    pub fn decode_calibration(
        kind: CommandKind,
        data: &[u8],
        verify: bool,
    ) -> Result<CalibrationOutcome, DecodeError> {
        let [status] = read_array(kind, data, CALIBRATION_STATUS_OFFSET)?;
        Ok(CalibrationOutcome {
            success: !verify || status == 0,
            timestamp: u32::from_le_bytes(read_array(kind, data, CALIBRATION_TIMESTAMP_OFFSET)?),
        })
    }
}

fn read_lab(kind: CommandKind, data: &[u8], offset: usize) -> Result<LabReading, DecodeError> {
    Ok(LabReading {
        l: f32::from_le_bytes(read_array(kind, data, offset)?),
        a: f32::from_le_bytes(read_array(kind, data, offset + 4)?),
        b: f32::from_le_bytes(read_array(kind, data, offset + 8)?),
    })
}

fn read_array<const N: usize>(
    kind: CommandKind,
    data: &[u8],
    offset: usize,
) -> Result<[u8; N], DecodeError> {
    data.get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(DecodeError::ResponseTooShort {
            kind,
            required: offset + N,
            actual: data.len(),
        })
}
