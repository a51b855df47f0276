//! Encode pipeline.
//!
//! Owns the descriptor set and one codec delegate per substream, accepts
//! PCM frames one temporal unit at a time, stamps trimming and timestamps,
//! and hands everything to the sequencer when finalized. Codec state is
//! released when the encoder is dropped, on success and failure alike.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use log::trace;

use crate::process::codec::{AudioCodec, CodecFactory};
use crate::process::sequence::{
    AudioFrameWithData, ObuSink, ParameterBlockWithData, SequenceStats, Sequencer,
};
use crate::process::{Descriptors, InternalTimestamp};
use crate::structs::arbitrary::ArbitraryObu;
use crate::structs::audio_element::{AmbisonicsConfig, AudioElementConfig, AudioElementObu};
use crate::structs::audio_frame::AudioFrameObu;
use crate::structs::header::ObuHeader;
use crate::structs::parameter_block::{ParameterBlockObu, ParameterMetadataMap};
use crate::utils::errors::{ParamError, PipelineError, TemporalUnitError};

/// Channel count carried by each of an element's substreams, in
/// `audio_substream_ids` order. Coupled substreams carry a channel pair.
pub(crate) fn substream_channel_counts(element: &AudioElementObu) -> Vec<usize> {
    match &element.config {
        AudioElementConfig::Channel(config) => {
            let mut counts = Vec::new();
            for layer in &config.channel_audio_layer_configs {
                let coupled = usize::from(layer.coupled_substream_count);
                let total = usize::from(layer.substream_count);
                counts.extend(std::iter::repeat_n(2, coupled.min(total)));
                counts.extend(std::iter::repeat_n(1, total.saturating_sub(coupled)));
            }
            counts
        }
        AudioElementConfig::Ambisonics(AmbisonicsConfig::Mono(mono)) => {
            vec![1; usize::from(mono.substream_count)]
        }
        AudioElementConfig::Ambisonics(AmbisonicsConfig::Projection(projection)) => {
            vec![1; usize::from(projection.substream_count)]
        }
    }
}

struct SubstreamState {
    audio_element_id: u32,
    num_channels: usize,
    codec: Box<dyn AudioCodec>,
    /// Codec priming samples still to be marked as trim-at-start.
    delay_remaining: u32,
}

/// Drives codec delegates frame by frame and produces an ordered OBU
/// stream on [`Encoder::finalize`].
pub struct Encoder {
    descriptors: Descriptors,
    sequencer: Sequencer,
    metadata_map: ParameterMetadataMap,
    substreams: BTreeMap<u32, SubstreamState>,
    audio_frames: Vec<AudioFrameWithData>,
    parameter_blocks: Vec<ParameterBlockWithData>,
    arbitrary_obus: Vec<ArbitraryObu>,
    num_samples_per_frame: u32,
    current_tick: InternalTimestamp,
}

impl Encoder {
    pub fn new(
        descriptors: Descriptors,
        sequencer: Sequencer,
        codec_factory: &CodecFactory,
    ) -> Result<Self> {
        let mut substreams = BTreeMap::new();
        let mut num_samples_per_frame = None;

        for element in descriptors.audio_elements.values() {
            let codec_config = descriptors.codec_config_for_element(element.audio_element_id)?;

            // Temporal units are aligned across the whole stream, so every
            // codec config must agree on the frame duration.
            match num_samples_per_frame {
                None => num_samples_per_frame = Some(codec_config.num_samples_per_frame()),
                Some(expected) if expected != codec_config.num_samples_per_frame() => {
                    bail!(TemporalUnitError::DurationMismatch)
                }
                Some(_) => {}
            }

            let channel_counts = substream_channel_counts(element);
            for (substream_id, num_channels) in element
                .audio_substream_ids
                .iter()
                .zip(channel_counts.into_iter())
            {
                let mut codec = codec_factory(codec_config)?;
                codec.initialize(codec_config, num_channels)?;
                let delay_remaining = codec.required_samples_to_delay_at_start();
                substreams.insert(
                    *substream_id,
                    SubstreamState {
                        audio_element_id: element.audio_element_id,
                        num_channels,
                        codec,
                        delay_remaining,
                    },
                );
            }
        }

        let Some(num_samples_per_frame) = num_samples_per_frame else {
            bail!(TemporalUnitError::NoAudioFrames);
        };
        let metadata_map = descriptors.parameter_metadata();

        Ok(Self {
            descriptors,
            sequencer,
            metadata_map,
            substreams,
            audio_frames: Vec::new(),
            parameter_blocks: Vec::new(),
            arbitrary_obus: Vec::new(),
            num_samples_per_frame,
            current_tick: 0,
        })
    }

    /// Encodes one temporal unit: exactly one frame of samples per
    /// substream, arranged `[time][channel]`. A short frame (the tail of
    /// the input) is zero-padded and the padding marked as trim-at-end.
    pub fn push_temporal_unit(
        &mut self,
        frames: &BTreeMap<u32, Vec<Vec<i32>>>,
        bit_depth: u8,
    ) -> Result<()> {
        for substream_id in frames.keys() {
            if !self.substreams.contains_key(substream_id) {
                bail!(PipelineError::UnknownSubstreamId(*substream_id));
            }
        }

        let num_samples_per_frame = self.num_samples_per_frame as usize;
        let mut common_valid_samples = None;
        for (substream_id, state) in &self.substreams {
            let Some(samples) = frames.get(substream_id) else {
                bail!(PipelineError::UnknownSubstreamId(*substream_id));
            };
            if samples.len() > num_samples_per_frame {
                bail!(PipelineError::FrameTooLong {
                    max: num_samples_per_frame,
                    actual: samples.len(),
                });
            }
            for tick in samples {
                if tick.len() != state.num_channels {
                    bail!(PipelineError::ChannelCountMismatch {
                        expected: state.num_channels,
                        actual: tick.len(),
                    });
                }
            }

            // Trimming is a temporal-unit property; ragged inputs would make
            // the frames disagree.
            match common_valid_samples {
                None => common_valid_samples = Some(samples.len()),
                Some(expected) if expected != samples.len() => {
                    bail!(TemporalUnitError::DurationMismatch)
                }
                Some(_) => {}
            }
        }
        let valid_samples = common_valid_samples.unwrap_or(num_samples_per_frame);
        let num_samples_to_trim_at_end = (num_samples_per_frame - valid_samples) as u32;

        let start_timestamp = self.current_tick;
        let end_timestamp = start_timestamp + i64::from(self.num_samples_per_frame);

        for (substream_id, state) in &mut self.substreams {
            let samples = &frames[substream_id];
            let num_samples_to_trim_at_start = state.delay_remaining.min(self.num_samples_per_frame);
            state.delay_remaining -= num_samples_to_trim_at_start;

            let mut padded;
            let samples = if valid_samples < num_samples_per_frame {
                padded = samples.clone();
                padded.resize(num_samples_per_frame, vec![0; state.num_channels]);
                &padded[..]
            } else {
                &samples[..]
            };

            let encoded = state.codec.encode_frame(samples, bit_depth)?;
            trace!(
                "Encoded {} bytes for substream {substream_id} at tick {start_timestamp}",
                encoded.len()
            );

            let header = if num_samples_to_trim_at_start > 0 || num_samples_to_trim_at_end > 0 {
                ObuHeader::with_trim(num_samples_to_trim_at_start, num_samples_to_trim_at_end)
            } else {
                ObuHeader::default()
            };

            self.audio_frames.push(AudioFrameWithData {
                obu: AudioFrameObu::new(header, *substream_id, encoded),
                start_timestamp,
                end_timestamp,
                audio_element_id: state.audio_element_id,
            });
        }

        self.current_tick = end_timestamp;
        Ok(())
    }

    /// Queues a parameter block starting at `start_timestamp`; its span is
    /// resolved from the owning definition.
    pub fn add_parameter_block(
        &mut self,
        obu: ParameterBlockObu,
        start_timestamp: InternalTimestamp,
    ) -> Result<()> {
        let Some(metadata) = self.metadata_map.get(&obu.parameter_id) else {
            bail!(ParamError::UnknownParameterId(obu.parameter_id));
        };
        let end_timestamp = start_timestamp + i64::from(obu.duration(metadata));
        self.parameter_blocks.push(ParameterBlockWithData {
            obu,
            start_timestamp,
            end_timestamp,
        });
        Ok(())
    }

    pub fn add_arbitrary_obu(&mut self, obu: ArbitraryObu) {
        self.arbitrary_obus.push(obu);
    }

    /// Finalizes every codec delegate and writes the ordered sequence to
    /// `sink`. Consumes the encoder; codec resources are released on every
    /// exit path.
    pub fn finalize(mut self, sink: &mut dyn ObuSink) -> Result<SequenceStats> {
        for state in self.substreams.values_mut() {
            state.codec.finalize()?;
        }

        self.sequencer.pick_and_place(
            &self.descriptors,
            &self.audio_frames,
            &self.parameter_blocks,
            &self.arbitrary_obus,
            sink,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::codec::LpcmCodec;
    use crate::process::parse::Parser;
    use crate::structs::audio_element::{
        ChannelAudioLayerConfig, ScalableChannelLayoutConfig,
    };
    use crate::structs::codec_config::{CodecConfig, CodecConfigObu};
    use crate::structs::decoder_config::DecoderConfig;
    use crate::structs::decoder_config::lpcm::LpcmDecoderConfig;
    use crate::structs::ia_sequence_header::{IaSequenceHeaderObu, ProfileVersion};

    const SAMPLES_PER_FRAME: u32 = 8;

    fn descriptors() -> Descriptors {
        let codec_config = CodecConfigObu::new(
            0,
            CodecConfig {
                num_samples_per_frame: SAMPLES_PER_FRAME,
                audio_roll_distance: 0,
                decoder_config: DecoderConfig::Lpcm(LpcmDecoderConfig {
                    sample_format_flags_bitmask: 1,
                    sample_size: 16,
                    sample_rate: 48000,
                }),
            },
        );

        let audio_element = AudioElementObu {
            header: ObuHeader::default(),
            audio_element_id: 1,
            reserved: 0,
            codec_config_id: 0,
            audio_substream_ids: vec![0],
            audio_element_params: vec![],
            config: AudioElementConfig::Channel(ScalableChannelLayoutConfig {
                channel_audio_layer_configs: vec![ChannelAudioLayerConfig {
                    loudspeaker_layout: 1,
                    substream_count: 1,
                    coupled_substream_count: 1,
                    ..Default::default()
                }],
            }),
        };

        Descriptors {
            sequence_header: IaSequenceHeaderObu::new(
                ProfileVersion::Simple,
                ProfileVersion::Simple,
            ),
            codec_configs: BTreeMap::from([(0, codec_config)]),
            audio_elements: BTreeMap::from([(1, audio_element)]),
            mix_presentations: BTreeMap::new(),
        }
    }

    fn lpcm_factory(_: &CodecConfigObu) -> Result<Box<dyn AudioCodec>> {
        Ok(Box::new(LpcmCodec::default()))
    }

    fn stereo_frame(len: usize, seed: i32) -> Vec<Vec<i32>> {
        (0..len)
            .map(|i| vec![(seed + i as i32) << 16, -((seed + i as i32) << 16)])
            .collect()
    }

    #[test]
    fn encodes_parses_and_decodes_a_stream() {
        let mut encoder = Encoder::new(descriptors(), Sequencer::new(), &lpcm_factory).unwrap();

        let first = stereo_frame(SAMPLES_PER_FRAME as usize, 1);
        encoder
            .push_temporal_unit(&BTreeMap::from([(0, first.clone())]), 16)
            .unwrap();

        // A short final frame: the padding becomes trim-at-end.
        let last = stereo_frame(5, 100);
        encoder
            .push_temporal_unit(&BTreeMap::from([(0, last)]), 16)
            .unwrap();

        let mut sink = Vec::new();
        let stats = encoder.finalize(&mut sink).unwrap();
        assert_eq!(stats.num_temporal_units, 2);
        assert_eq!(stats.num_samples, u64::from(SAMPLES_PER_FRAME) + 5);

        let sequence = Parser::default().parse_sequence(&sink).unwrap();
        assert_eq!(sequence.temporal_units.len(), 2);

        let first_unit = &sequence.temporal_units[0];
        assert!(!first_unit.audio_frames[0].header.trimming_status);

        let last_unit = &sequence.temporal_units[1];
        let last_frame = &last_unit.audio_frames[0];
        assert!(last_frame.header.trimming_status);
        assert_eq!(last_frame.header.num_samples_to_trim_at_end, 3);
        assert_eq!(last_frame.header.num_samples_to_trim_at_start, 0);

        // The payload decodes back to the input samples.
        let codec_config = &sequence.descriptors.codec_configs[&0];
        let mut codec = LpcmCodec::default();
        codec.initialize(codec_config, 2).unwrap();
        let decoded = codec
            .decode_frame(&first_unit.audio_frames[0].audio_frame)
            .unwrap();
        assert_eq!(decoded, first);
    }

    #[test]
    fn missing_substream_is_rejected() {
        let mut encoder = Encoder::new(descriptors(), Sequencer::new(), &lpcm_factory).unwrap();
        assert!(encoder.push_temporal_unit(&BTreeMap::new(), 16).is_err());

        let unknown = BTreeMap::from([(9, stereo_frame(4, 0))]);
        assert!(encoder.push_temporal_unit(&unknown, 16).is_err());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut encoder = Encoder::new(descriptors(), Sequencer::new(), &lpcm_factory).unwrap();
        let too_long = BTreeMap::from([(0, stereo_frame(SAMPLES_PER_FRAME as usize + 1, 0))]);
        assert!(encoder.push_temporal_unit(&too_long, 16).is_err());
    }

    #[test]
    fn channel_counts_follow_the_layer_layout() {
        let mut element = descriptors().audio_elements[&1].clone();
        element.audio_substream_ids = vec![0, 1, 2];
        element.config = AudioElementConfig::Channel(ScalableChannelLayoutConfig {
            channel_audio_layer_configs: vec![
                ChannelAudioLayerConfig {
                    substream_count: 1,
                    coupled_substream_count: 1,
                    ..Default::default()
                },
                ChannelAudioLayerConfig {
                    substream_count: 2,
                    coupled_substream_count: 1,
                    ..Default::default()
                },
            ],
        });
        assert_eq!(substream_channel_counts(&element), [2, 2, 1]);
    }
}
