//! AAC-LC decoder config.
//!
//! The wire layout nests ISO 14496-1 descriptors: a `DecoderConfigDescriptor`
//! wrapping a `DecoderSpecificInfo` wrapping an `AudioSpecificConfig`, each
//! length-prefixed with an expandable size. Unrecognized trailing bytes at
//! either descriptor level are preserved as extension bytes.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::CodecConfigError;

pub const DECODER_CONFIG_DESCRIPTOR_TAG: u8 = 0x04;
pub const DECODER_SPECIFIC_INFO_TAG: u8 = 0x05;

const OBJECT_TYPE_INDICATION: u8 = 0x40;
const STREAM_TYPE: u8 = 5;
const AUDIO_OBJECT_TYPE_AAC_LC: u8 = 2;

/// `sample_frequency_index` value signalling an explicit 24-bit rate.
pub const ESCAPE_SAMPLE_FREQUENCY_INDEX: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// 4-bit index into the AAC sampling-frequency table.
    pub sample_frequency_index: u8,
    /// Explicit rate, on the wire only when the index is the escape value.
    pub sampling_frequency: u32,
    /// 4-bit channel configuration, set from the audio element at write time.
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    /// Resolves the sampling frequency, rejecting reserved indices.
    pub fn sample_rate(&self) -> Result<u32> {
        match self.sample_frequency_index {
            0 => Ok(96000),
            1 => Ok(88200),
            2 => Ok(64000),
            3 => Ok(48000),
            4 => Ok(44100),
            5 => Ok(32000),
            6 => Ok(24000),
            7 => Ok(22050),
            8 => Ok(16000),
            9 => Ok(12000),
            10 => Ok(11025),
            11 => Ok(8000),
            12 => Ok(7350),
            13 | 14 => bail!(CodecConfigError::ReservedSampleFrequencyIndex(
                self.sample_frequency_index
            )),
            15 => Ok(self.sampling_frequency),
            v => bail!(CodecConfigError::UnknownSampleFrequencyIndex(v)),
        }
    }

    fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.sample_rate()?;
        w.put_n(5, u32::from(AUDIO_OBJECT_TYPE_AAC_LC))?;
        w.put_n(4, u32::from(self.sample_frequency_index))?;
        if self.sample_frequency_index == ESCAPE_SAMPLE_FREQUENCY_INDEX {
            w.put_n(24, self.sampling_frequency)?;
        }
        w.put_n(4, u32::from(self.channel_configuration))?;

        // ga_specific_config: frame_length_flag, depends_on_core_coder and
        // extension_flag are all fixed to 0.
        w.put(false)?;
        w.put(false)?;
        w.put(false)?;
        Ok(())
    }

    fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let audio_object_type: u8 = r.get_n(5)?;
        if audio_object_type != AUDIO_OBJECT_TYPE_AAC_LC {
            bail!(CodecConfigError::InvalidAudioObjectType(audio_object_type));
        }

        let sample_frequency_index: u8 = r.get_n(4)?;
        let sampling_frequency = if sample_frequency_index == ESCAPE_SAMPLE_FREQUENCY_INDEX {
            r.get_n(24)?
        } else {
            0
        };
        let channel_configuration = r.get_n(4)?;

        let frame_length_flag = r.get()?;
        let depends_on_core_coder = r.get()?;
        let extension_flag = r.get()?;
        if frame_length_flag || depends_on_core_coder || extension_flag {
            bail!(CodecConfigError::InvalidGaSpecificConfig);
        }

        let config = Self {
            sample_frequency_index,
            sampling_frequency,
            channel_configuration,
        };
        config.sample_rate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderSpecificInfo {
    pub audio_specific_config: AudioSpecificConfig,
    /// Bytes after the `AudioSpecificConfig` but inside the descriptor size.
    pub decoder_specific_info_extension: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AacDecoderConfig {
    /// 24-bit decoder buffer size.
    pub buffer_size_db: u32,
    pub max_bitrate: u32,
    pub average_bit_rate: u32,
    pub decoder_specific_info: DecoderSpecificInfo,
    /// Bytes after the `DecoderSpecificInfo` but inside the descriptor size.
    pub decoder_config_extension: Vec<u8>,
}

/// Writes `payload` prefixed with its ISO 14496-1 expandable size.
fn put_with_expandable_size(payload: &[u8], w: &mut BitstreamIoWriter) -> Result<()> {
    w.put_expandable(payload.len() as u32)?;
    w.put_bytes(payload)
}

/// Consumes bytes up to `expected_position`, preserving them as extension
/// bytes. Fails when the cursor already passed the position.
fn advance_to_position(
    context: &'static str,
    r: &mut BsIoSliceReader,
    expected_position: u64,
) -> Result<Vec<u8>> {
    let actual_position = r.position()?;
    if actual_position > expected_position {
        bail!("Not enough bytes to parse {context}");
    }
    r.get_vec(((expected_position - actual_position) >> 3) as usize)
}

impl AacDecoderConfig {
    pub const REQUIRED_AUDIO_ROLL_DISTANCE: i16 = -1;

    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        w.put_n(8, u32::from(DECODER_CONFIG_DESCRIPTOR_TAG))?;

        // Render the remaining descriptor first so the expandable size
        // prefix is known.
        let mut inner = BitstreamIoWriter::new(w.leb_style());
        inner.put_n(8, u32::from(OBJECT_TYPE_INDICATION))?;
        inner.put_n(6, u32::from(STREAM_TYPE))?;
        inner.put(false)?; // upstream
        inner.put(true)?; // reserved
        inner.put_n(24, self.buffer_size_db)?;
        inner.put_n(32, self.max_bitrate)?;
        inner.put_n(32, self.average_bit_rate)?;

        inner.put_n(8, u32::from(DECODER_SPECIFIC_INFO_TAG))?;
        let mut dsi = BitstreamIoWriter::new(w.leb_style());
        self.decoder_specific_info.audio_specific_config.write(&mut dsi)?;
        dsi.put_bytes(&self.decoder_specific_info.decoder_specific_info_extension)?;
        put_with_expandable_size(&dsi.into_bytes()?, &mut inner)?;

        inner.put_bytes(&self.decoder_config_extension)?;
        put_with_expandable_size(&inner.into_bytes()?, w)
    }

    pub fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let tag: u8 = r.get_n(8)?;
        if tag != DECODER_CONFIG_DESCRIPTOR_TAG {
            bail!(CodecConfigError::InvalidDescriptorTag {
                expected: DECODER_CONFIG_DESCRIPTOR_TAG,
                actual: tag,
            });
        }
        let descriptor_size = r.get_expandable()?;
        let end_of_decoder_config = r.position()? + (u64::from(descriptor_size) << 3);

        let object_type_indication: u8 = r.get_n(8)?;
        if object_type_indication != OBJECT_TYPE_INDICATION {
            bail!(CodecConfigError::InvalidObjectTypeIndication(
                object_type_indication
            ));
        }
        let stream_type: u8 = r.get_n(6)?;
        if stream_type != STREAM_TYPE {
            bail!(CodecConfigError::InvalidStreamType(stream_type));
        }
        let upstream = r.get()?;
        let reserved = r.get()?;
        if upstream || !reserved {
            bail!(CodecConfigError::InvalidDescriptorFlags);
        }

        let buffer_size_db = r.get_n(24)?;
        let max_bitrate = r.get_n(32)?;
        let average_bit_rate = r.get_n(32)?;

        let tag: u8 = r.get_n(8)?;
        if tag != DECODER_SPECIFIC_INFO_TAG {
            bail!(CodecConfigError::InvalidDescriptorTag {
                expected: DECODER_SPECIFIC_INFO_TAG,
                actual: tag,
            });
        }
        let dsi_size = r.get_expandable()?;
        let end_of_decoder_specific_info = r.position()? + (u64::from(dsi_size) << 3);

        let audio_specific_config = AudioSpecificConfig::read(r)?;
        let decoder_specific_info_extension =
            advance_to_position("decoder_specific_info", r, end_of_decoder_specific_info)?;

        let decoder_config_extension =
            advance_to_position("decoder_config_descriptor", r, end_of_decoder_config)?;

        Ok(Self {
            buffer_size_db,
            max_bitrate,
            average_bit_rate,
            decoder_specific_info: DecoderSpecificInfo {
                audio_specific_config,
                decoder_specific_info_extension,
            },
            decoder_config_extension,
        })
    }

    pub fn output_sample_rate(&self) -> Result<u32> {
        self.decoder_specific_info.audio_specific_config.sample_rate()
    }

    /// The fdk-style integer PCM interface is 16-bit.
    pub fn bit_depth_to_measure_loudness(&self) -> u8 {
        16
    }
}
