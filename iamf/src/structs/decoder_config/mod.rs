//! Codec-specific decoder configs.
//!
//! A tagged union keyed by the codec fourCC of the owning Codec Config OBU.

pub mod aac;
pub mod flac;
pub mod lpcm;
pub mod opus;

use anyhow::Result;

use crate::structs::codec_config::CodecId;
use crate::structs::decoder_config::aac::AacDecoderConfig;
use crate::structs::decoder_config::flac::FlacDecoderConfig;
use crate::structs::decoder_config::lpcm::LpcmDecoderConfig;
use crate::structs::decoder_config::opus::OpusDecoderConfig;
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};

#[derive(Debug, Clone, PartialEq)]
pub enum DecoderConfig {
    Lpcm(LpcmDecoderConfig),
    Opus(OpusDecoderConfig),
    AacLc(AacDecoderConfig),
    Flac(FlacDecoderConfig),
}

impl DecoderConfig {
    pub fn codec_id(&self) -> CodecId {
        match self {
            Self::Lpcm(_) => CodecId::Lpcm,
            Self::Opus(_) => CodecId::Opus,
            Self::AacLc(_) => CodecId::AacLc,
            Self::Flac(_) => CodecId::Flac,
        }
    }

    /// The `audio_roll_distance` every codec dictates for its Codec Config.
    pub fn required_audio_roll_distance(&self, num_samples_per_frame: u32) -> Result<i16> {
        match self {
            Self::Lpcm(_) => Ok(LpcmDecoderConfig::REQUIRED_AUDIO_ROLL_DISTANCE),
            Self::Opus(_) => OpusDecoderConfig::required_audio_roll_distance(num_samples_per_frame),
            Self::AacLc(_) => Ok(AacDecoderConfig::REQUIRED_AUDIO_ROLL_DISTANCE),
            Self::Flac(_) => Ok(FlacDecoderConfig::REQUIRED_AUDIO_ROLL_DISTANCE),
        }
    }

    pub fn write(&self, num_samples_per_frame: u32, w: &mut BitstreamIoWriter) -> Result<()> {
        match self {
            Self::Lpcm(config) => config.write(w),
            Self::Opus(config) => config.write(w),
            Self::AacLc(config) => config.write(w),
            Self::Flac(config) => config.write(num_samples_per_frame, w),
        }
    }

    pub fn read(
        codec_id: CodecId,
        num_samples_per_frame: u32,
        r: &mut BsIoSliceReader,
    ) -> Result<Self> {
        Ok(match codec_id {
            CodecId::Lpcm => Self::Lpcm(LpcmDecoderConfig::read(r)?),
            CodecId::Opus => Self::Opus(OpusDecoderConfig::read(r)?),
            CodecId::AacLc => Self::AacLc(AacDecoderConfig::read(r)?),
            CodecId::Flac => Self::Flac(FlacDecoderConfig::read(num_samples_per_frame, r)?),
        })
    }

    /// Sample rate of decoded output.
    pub fn output_sample_rate(&self) -> Result<u32> {
        match self {
            Self::Lpcm(config) => Ok(config.output_sample_rate()),
            Self::Opus(config) => Ok(config.output_sample_rate()),
            Self::AacLc(config) => config.output_sample_rate(),
            Self::Flac(config) => config.output_sample_rate(),
        }
    }

    /// Bit depth the decoded output should be measured at.
    pub fn bit_depth_to_measure_loudness(&self) -> Result<u8> {
        match self {
            Self::Lpcm(config) => Ok(config.bit_depth_to_measure_loudness()),
            Self::Opus(config) => Ok(config.bit_depth_to_measure_loudness()),
            Self::AacLc(config) => Ok(config.bit_depth_to_measure_loudness()),
            Self::Flac(config) => config.bit_depth_to_measure_loudness(),
        }
    }
}
