//! Opus decoder config.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::CodecConfigError;

/// The highest Opus major version this implementation understands. The major
/// version lives in the upper nibble of `version`; higher values may break
/// backwards compatibility.
const SUPPORTED_OPUS_MAJOR_VERSION: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusDecoderConfig {
    pub version: u8,
    /// Fixed to 2 on the wire; the real channel count comes from the Audio
    /// Element OBU.
    pub output_channel_count: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    /// Fixed to 0 for IAMF.
    pub output_gain: i16,
    /// Fixed to 0 for IAMF.
    pub mapping_family: u8,
}

impl OpusDecoderConfig {
    pub const OUTPUT_CHANNEL_COUNT: u8 = 2;

    /// The legal roll distance is `-ceil(3840 / num_samples_per_frame)`.
    pub fn required_audio_roll_distance(num_samples_per_frame: u32) -> Result<i16> {
        const OPUS_ROLL_DIVIDEND: u32 = 3840;

        if num_samples_per_frame == 0 {
            bail!(CodecConfigError::ZeroSamplesPerFrame);
        }
        Ok(-(OPUS_ROLL_DIVIDEND.div_ceil(num_samples_per_frame) as i16))
    }

    fn validate(&self) -> Result<()> {
        if self.version == 0 {
            bail!(CodecConfigError::ZeroOpusVersion);
        }
        let major_version = (self.version & 0xF0) >> 4;
        if major_version > SUPPORTED_OPUS_MAJOR_VERSION {
            bail!(CodecConfigError::UnsupportedOpusMajorVersion(major_version));
        }
        if self.output_channel_count != Self::OUTPUT_CHANNEL_COUNT {
            bail!(CodecConfigError::InvalidOpusChannelCount(
                self.output_channel_count
            ));
        }
        if self.output_gain != 0 {
            bail!(CodecConfigError::NonZeroOutputGain(self.output_gain));
        }
        if self.mapping_family != 0 {
            bail!(CodecConfigError::NonZeroMappingFamily(self.mapping_family));
        }
        Ok(())
    }

    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;
        w.put_n(8, u32::from(self.version))?;
        w.put_n(8, u32::from(self.output_channel_count))?;
        w.put_n(16, u32::from(self.pre_skip))?;
        w.put_n(32, self.input_sample_rate)?;
        w.put_s(16, i32::from(self.output_gain))?;
        w.put_n(8, u32::from(self.mapping_family))?;
        Ok(())
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let config = Self {
            version: r.get_n(8)?,
            output_channel_count: r.get_n(8)?,
            pre_skip: r.get_n(16)?,
            input_sample_rate: r.get_n(32)?,
            output_gain: r.get_s(16)?,
            mapping_family: r.get_n(8)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Opus always decodes at 48 kHz regardless of `input_sample_rate`.
    pub fn output_sample_rate(&self) -> u32 {
        48000
    }

    /// Loudness is measured on the float API output.
    pub fn bit_depth_to_measure_loudness(&self) -> u8 {
        32
    }
}
