//! Codec Config OBU.

use anyhow::{Result, bail};

use crate::structs::decoder_config::DecoderConfig;
use crate::structs::header::{ObuHeader, ObuType, write_obu};
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::CodecConfigError;

/// Codec identifier, serialized as a 4-byte fourCC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// `"ipcm"`
    Lpcm,
    /// `"Opus"`
    Opus,
    /// `"mp4a"` (AAC-LC, ISO/IEC 14496-3)
    AacLc,
    /// `"fLaC"`
    Flac,
}

impl CodecId {
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Lpcm => *b"ipcm",
            Self::Opus => *b"Opus",
            Self::AacLc => *b"mp4a",
            Self::Flac => *b"fLaC",
        }
    }

    pub fn from_fourcc(fourcc: [u8; 4]) -> Result<Self> {
        Ok(match &fourcc {
            b"ipcm" => Self::Lpcm,
            b"Opus" => Self::Opus,
            b"mp4a" => Self::AacLc,
            b"fLaC" => Self::Flac,
            _ => bail!(CodecConfigError::UnknownCodecId(fourcc)),
        })
    }
}

/// The `codec_config()` portion of a Codec Config OBU.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecConfig {
    /// Must be nonzero.
    pub num_samples_per_frame: u32,
    /// Signed 16-bit; each codec dictates the only legal value.
    pub audio_roll_distance: i16,
    pub decoder_config: DecoderConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodecConfigObu {
    pub header: ObuHeader,
    pub codec_config_id: u32,
    pub codec_config: CodecConfig,
}

impl CodecConfigObu {
    pub fn new(codec_config_id: u32, codec_config: CodecConfig) -> Self {
        Self {
            header: ObuHeader::default(),
            codec_config_id,
            codec_config,
        }
    }

    fn validate(&self) -> Result<()> {
        let config = &self.codec_config;
        if config.num_samples_per_frame == 0 {
            bail!(CodecConfigError::ZeroSamplesPerFrame);
        }

        let expected = config
            .decoder_config
            .required_audio_roll_distance(config.num_samples_per_frame)?;
        if config.audio_roll_distance != expected {
            bail!(CodecConfigError::InvalidAudioRollDistance {
                expected,
                actual: config.audio_roll_distance,
            });
        }
        Ok(())
    }

    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;
        write_obu(ObuType::CodecConfig, &self.header, w, |pw| {
            pw.put_uleb128(self.codec_config_id)?;
            pw.put_bytes(&self.codec_config.decoder_config.codec_id().fourcc())?;
            pw.put_uleb128(self.codec_config.num_samples_per_frame)?;
            pw.put_s(16, i32::from(self.codec_config.audio_roll_distance))?;
            self.codec_config
                .decoder_config
                .write(self.codec_config.num_samples_per_frame, pw)
        })
    }

    pub fn read(header: ObuHeader, r: &mut BsIoSliceReader) -> Result<Self> {
        let codec_config_id = r.get_uleb128()?;

        let mut fourcc = [0u8; 4];
        r.get_bytes(&mut fourcc)?;
        let codec_id = CodecId::from_fourcc(fourcc)?;

        let num_samples_per_frame = r.get_uleb128()?;
        if num_samples_per_frame == 0 {
            bail!(CodecConfigError::ZeroSamplesPerFrame);
        }
        let audio_roll_distance: i16 = r.get_s(16)?;
        let decoder_config = DecoderConfig::read(codec_id, num_samples_per_frame, r)?;

        let obu = Self {
            header,
            codec_config_id,
            codec_config: CodecConfig {
                num_samples_per_frame,
                audio_roll_distance,
                decoder_config,
            },
        };
        obu.validate()?;
        Ok(obu)
    }

    pub fn num_samples_per_frame(&self) -> u32 {
        self.codec_config.num_samples_per_frame
    }

    pub fn output_sample_rate(&self) -> Result<u32> {
        self.codec_config.decoder_config.output_sample_rate()
    }
}
