mod colour;
mod frame_codec;
mod readings;
mod response_assembler;

pub use self::colour::{Rgb, lab_to_rgb};
pub use self::frame_codec::{Command, FrameCodec, FrameCodecError};
pub use self::readings::{
    CalibrationInfo, CalibrationOutcome, DecodeError, DeviceInfo, LabReading, ReadingDecoder,
    RgbReading, SpectralReading,
};
pub use self::response_assembler::ResponseAssembler;
