//! Codec delegate and sample-processor interfaces.
//!
//! The pipeline never owns perceptual codec state; per-substream encoding
//! and decoding go through the [`AudioCodec`] capability. The LPCM delegate
//! is implemented here since it is pure packing; Opus, AAC-LC and FLAC
//! delegates wrap external libraries and plug in through the same trait.

use anyhow::{Result, bail};

use crate::structs::codec_config::CodecConfigObu;
use crate::structs::decoder_config::DecoderConfig;
use crate::utils::errors::PipelineError;
use crate::utils::numeric::{
    big_endian_bytes_to_int32, little_endian_bytes_to_int32, write_pcm_sample,
};

/// Builds a codec delegate for one substream of `codec_config`.
pub type CodecFactory = dyn Fn(&CodecConfigObu) -> Result<Box<dyn AudioCodec>>;

/// Per-substream codec capability.
///
/// Calls are strictly sequential per substream. `encode_frame` produces
/// exactly one packet per call; samples are arranged `[time][channel]` as
/// left-justified 32-bit values. Dropping the delegate releases any
/// underlying codec resources.
pub trait AudioCodec {
    fn initialize(&mut self, codec_config: &CodecConfigObu, num_channels: usize) -> Result<()>;

    fn encode_frame(&mut self, samples: &[Vec<i32>], bit_depth: u8) -> Result<Vec<u8>>;

    fn decode_frame(&mut self, encoded_frame: &[u8]) -> Result<Vec<Vec<i32>>>;

    /// Samples of codec priming delay the pipeline must trim at the start.
    fn required_samples_to_delay_at_start(&self) -> u32 {
        0
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The LPCM delegate: interleaved PCM packing in the configured endianness.
#[derive(Debug, Default)]
pub struct LpcmCodec {
    little_endian: bool,
    sample_size: u8,
    num_channels: usize,
}

impl AudioCodec for LpcmCodec {
    fn initialize(&mut self, codec_config: &CodecConfigObu, num_channels: usize) -> Result<()> {
        let DecoderConfig::Lpcm(config) = &codec_config.codec_config.decoder_config else {
            bail!("LpcmCodec requires an LPCM decoder config");
        };
        self.little_endian = config.is_little_endian();
        self.sample_size = config.sample_size;
        self.num_channels = num_channels;
        Ok(())
    }

    fn encode_frame(&mut self, samples: &[Vec<i32>], _bit_depth: u8) -> Result<Vec<u8>> {
        let mut packed = Vec::new();
        let mut write_position = 0;
        for tick in samples {
            if tick.len() != self.num_channels {
                bail!(PipelineError::ChannelCountMismatch {
                    expected: self.num_channels,
                    actual: tick.len(),
                });
            }
            for sample in tick {
                write_pcm_sample(
                    *sample as u32,
                    self.sample_size,
                    !self.little_endian,
                    &mut packed,
                    &mut write_position,
                )?;
            }
        }
        Ok(packed)
    }

    fn decode_frame(&mut self, encoded_frame: &[u8]) -> Result<Vec<Vec<i32>>> {
        let bytes_per_sample = usize::from(self.sample_size / 8);
        let bytes_per_tick = bytes_per_sample * self.num_channels;
        if bytes_per_tick == 0 || !encoded_frame.len().is_multiple_of(bytes_per_tick) {
            bail!(
                "LPCM frame of {} bytes does not divide into {}-channel ticks",
                encoded_frame.len(),
                self.num_channels
            );
        }

        let mut samples = Vec::with_capacity(encoded_frame.len() / bytes_per_tick);
        for tick in encoded_frame.chunks_exact(bytes_per_tick) {
            let mut channels = Vec::with_capacity(self.num_channels);
            for sample in tick.chunks_exact(bytes_per_sample) {
                channels.push(if self.little_endian {
                    little_endian_bytes_to_int32(sample)?
                } else {
                    big_endian_bytes_to_int32(sample)?
                });
            }
            samples.push(channels);
        }
        Ok(samples)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessorState {
    TakingSamples,
    FlushCalled,
}

/// Reprocesses PCM frames, possibly with delay or a different frame size.
///
/// Usage: `push_frame` while input is available, then one `flush`, reading
/// `output_samples` after each call. Output borrows are invalidated by the
/// next mutating call. Misordered calls fail without touching state.
pub trait SampleProcessor {
    fn push_frame(&mut self, time_channel_samples: &[Vec<i32>]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn output_samples(&self) -> &[Vec<i32>];
}

/// A processor that forwards frames unchanged. Doubles as the reference
/// implementation of the state machine.
#[derive(Debug)]
pub struct PassthroughProcessor {
    max_input_samples_per_frame: usize,
    num_channels: usize,
    output: Vec<Vec<i32>>,
    state: ProcessorState,
}

impl PassthroughProcessor {
    pub fn new(max_input_samples_per_frame: usize, num_channels: usize) -> Self {
        Self {
            max_input_samples_per_frame,
            num_channels,
            output: Vec::new(),
            state: ProcessorState::TakingSamples,
        }
    }
}

impl SampleProcessor for PassthroughProcessor {
    fn push_frame(&mut self, time_channel_samples: &[Vec<i32>]) -> Result<()> {
        if self.state == ProcessorState::FlushCalled {
            bail!(PipelineError::PushAfterFlush);
        }
        if time_channel_samples.len() > self.max_input_samples_per_frame {
            bail!(PipelineError::FrameTooLong {
                max: self.max_input_samples_per_frame,
                actual: time_channel_samples.len(),
            });
        }
        for tick in time_channel_samples {
            if tick.len() != self.num_channels {
                bail!(PipelineError::ChannelCountMismatch {
                    expected: self.num_channels,
                    actual: tick.len(),
                });
            }
        }

        self.output.clear();
        self.output.extend_from_slice(time_channel_samples);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.state == ProcessorState::FlushCalled {
            bail!(PipelineError::DoubleFlush);
        }
        self.state = ProcessorState::FlushCalled;
        self.output.clear();
        Ok(())
    }

    fn output_samples(&self) -> &[Vec<i32>] {
        &self.output
    }
}
