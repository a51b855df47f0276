//! FLAC decoder config.
//!
//! A sequence of FLAC metadata blocks. The first block must be a
//! `STREAMINFO`, and exactly the final block sets `last_metadata_block_flag`.
//! Non-`STREAMINFO` blocks pass through as opaque bytes.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::CodecConfigError;
use crate::utils::validate::validate_in_range;

pub const FLAC_BLOCK_TYPE_STREAMINFO: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlacMetaBlockStreamInfo {
    /// Both block sizes must equal `num_samples_per_frame`.
    pub minimum_block_size: u16,
    pub maximum_block_size: u16,
    /// 24-bit; the encoder writes 0.
    pub minimum_frame_size: u32,
    pub maximum_frame_size: u32,
    /// 20-bit, in [1, 655350].
    pub sample_rate: u32,
    /// 3-bit `channels - 1`; IAMF requires 2 channels per FLAC stream.
    pub number_of_channels: u8,
    /// 5-bit `bits_per_sample - 1`, in [15, 31].
    pub bits_per_sample: u8,
    /// 36-bit.
    pub total_samples_in_stream: u64,
    /// The encoder writes all zeroes.
    pub md5_signature: [u8; 16],
}

impl FlacMetaBlockStreamInfo {
    /// Serialized size of a `STREAMINFO` payload in bytes.
    pub const SIZE: u32 = 34;

    fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        w.put_n(16, u32::from(self.minimum_block_size))?;
        w.put_n(16, u32::from(self.maximum_block_size))?;
        w.put_n(24, self.minimum_frame_size)?;
        w.put_n(24, self.maximum_frame_size)?;
        w.put_n(20, self.sample_rate)?;
        w.put_n(3, u32::from(self.number_of_channels))?;
        w.put_n(5, u32::from(self.bits_per_sample))?;
        w.put_n(36, self.total_samples_in_stream)?;
        w.put_bytes(&self.md5_signature)?;
        Ok(())
    }

    fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let mut stream_info = Self {
            minimum_block_size: r.get_n(16)?,
            maximum_block_size: r.get_n(16)?,
            minimum_frame_size: r.get_n(24)?,
            maximum_frame_size: r.get_n(24)?,
            sample_rate: r.get_n(20)?,
            number_of_channels: r.get_n(3)?,
            bits_per_sample: r.get_n(5)?,
            total_samples_in_stream: r.get_n(36)?,
            md5_signature: [0; 16],
        };
        r.get_bytes(&mut stream_info.md5_signature)?;
        Ok(stream_info)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlacMetaBlockHeader {
    pub last_metadata_block_flag: bool,
    pub block_type: u8,
    pub metadata_data_block_length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlacBlockPayload {
    StreamInfo(FlacMetaBlockStreamInfo),
    Generic(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlacMetadataBlock {
    pub header: FlacMetaBlockHeader,
    pub payload: FlacBlockPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlacDecoderConfig {
    pub metadata_blocks: Vec<FlacMetadataBlock>,
}

impl FlacDecoderConfig {
    pub const REQUIRED_AUDIO_ROLL_DISTANCE: i16 = 0;

    pub fn stream_info(&self) -> Result<&FlacMetaBlockStreamInfo> {
        match self.metadata_blocks.first() {
            Some(FlacMetadataBlock {
                payload: FlacBlockPayload::StreamInfo(stream_info),
                ..
            }) => Ok(stream_info),
            _ => bail!(CodecConfigError::StreamInfoNotFirst),
        }
    }

    /// Restrictions enforced for both directions.
    fn validate_decoding_restrictions(&self, num_samples_per_frame: u32) -> Result<()> {
        for (i, block) in self.metadata_blocks.iter().enumerate() {
            let last_block = i == self.metadata_blocks.len() - 1;
            if block.header.last_metadata_block_flag != last_block {
                bail!(CodecConfigError::MisplacedLastMetadataBlock);
            }
        }

        let stream_info = self.stream_info()?;
        validate_in_range(stream_info.sample_rate, 1, 655350, "FLAC sample_rate")
            .map_err(|_| CodecConfigError::FlacSampleRateOutOfRange(stream_info.sample_rate))?;
        validate_in_range(stream_info.bits_per_sample, 15, 31, "bits_per_sample")
            .map_err(|_| CodecConfigError::FlacBitsPerSampleOutOfRange(stream_info.bits_per_sample))?;

        for (field, value) in [
            ("minimum_block_size", stream_info.minimum_block_size),
            ("maximum_block_size", stream_info.maximum_block_size),
        ] {
            if u32::from(value) != num_samples_per_frame {
                bail!(CodecConfigError::FlacBlockSizeMismatch {
                    field,
                    expected: num_samples_per_frame,
                    actual: value,
                });
            }
        }

        if stream_info.number_of_channels != 1 {
            bail!(CodecConfigError::FlacChannelCountMismatch(
                stream_info.number_of_channels
            ));
        }
        Ok(())
    }

    /// Stricter restrictions applied when encoding, to avoid producing
    /// streams with nonsense bookkeeping fields.
    fn validate_encoding_restrictions(&self, num_samples_per_frame: u32) -> Result<()> {
        self.validate_decoding_restrictions(num_samples_per_frame)?;

        let stream_info = self.stream_info()?;
        if stream_info.minimum_frame_size != 0 {
            bail!(CodecConfigError::FlacNonZeroEncoderField("minimum_frame_size"));
        }
        if stream_info.maximum_frame_size != 0 {
            bail!(CodecConfigError::FlacNonZeroEncoderField("maximum_frame_size"));
        }
        if stream_info.md5_signature != [0; 16] {
            bail!(CodecConfigError::FlacNonZeroEncoderField("md5_signature"));
        }
        Ok(())
    }

    pub fn write(&self, num_samples_per_frame: u32, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate_encoding_restrictions(num_samples_per_frame)?;

        for block in &self.metadata_blocks {
            w.put(block.header.last_metadata_block_flag)?;
            w.put_n(7, u32::from(block.header.block_type))?;
            w.put_n(24, block.header.metadata_data_block_length)?;

            let expected_end =
                w.bit_position() + (u64::from(block.header.metadata_data_block_length) << 3);

            match &block.payload {
                FlacBlockPayload::StreamInfo(stream_info) => stream_info.write(w)?,
                FlacBlockPayload::Generic(bytes) => w.put_bytes(bytes)?,
            }

            if w.bit_position() != expected_end {
                bail!(CodecConfigError::FlacBlockLengthMismatch {
                    expected: block.header.metadata_data_block_length,
                    actual: w.bit_position(),
                });
            }
        }
        Ok(())
    }

    pub fn read(num_samples_per_frame: u32, r: &mut BsIoSliceReader) -> Result<Self> {
        // There is no block count; the last_metadata_block_flag terminates
        // the chain.
        let mut metadata_blocks = Vec::new();
        let mut is_last_metadata_block = false;
        while !is_last_metadata_block {
            let last_metadata_block_flag = r.get()?;
            is_last_metadata_block = last_metadata_block_flag;
            let block_type: u8 = r.get_n(7)?;
            let metadata_data_block_length: u32 = r.get_n(24)?;

            let start = r.position()?;
            let payload = match block_type {
                FLAC_BLOCK_TYPE_STREAMINFO => {
                    FlacBlockPayload::StreamInfo(FlacMetaBlockStreamInfo::read(r)?)
                }
                _ => FlacBlockPayload::Generic(r.get_vec(metadata_data_block_length as usize)?),
            };
            if r.position()? - start != u64::from(metadata_data_block_length) << 3 {
                bail!(CodecConfigError::FlacBlockLengthMismatch {
                    expected: metadata_data_block_length,
                    actual: r.position()? - start,
                });
            }

            metadata_blocks.push(FlacMetadataBlock {
                header: FlacMetaBlockHeader {
                    last_metadata_block_flag,
                    block_type,
                    metadata_data_block_length,
                },
                payload,
            });
        }

        let config = Self { metadata_blocks };
        config.validate_decoding_restrictions(num_samples_per_frame)?;
        Ok(config)
    }

    pub fn output_sample_rate(&self) -> Result<u32> {
        Ok(self.stream_info()?.sample_rate)
    }

    /// The raw field stores `bits_per_sample - 1`.
    pub fn bit_depth_to_measure_loudness(&self) -> Result<u8> {
        Ok(self.stream_info()?.bits_per_sample + 1)
    }

    pub fn total_samples_in_stream(&self) -> Result<u64> {
        Ok(self.stream_info()?.total_samples_in_stream)
    }
}
