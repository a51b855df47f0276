//! Bitstream parsing into typed OBUs.
//!
//! The [`Parser`] consumes OBUs one at a time, dispatching on the 5-bit
//! type. Descriptor OBUs feed a registry of parameter definitions so later
//! parameter blocks can be sized and typed; unknown and reserved OBU types
//! are preserved as arbitrary OBUs and parsing continues. A whole sequence
//! can be assembled into descriptors plus temporal units with
//! [`Parser::parse_sequence`].

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use log::trace;

use crate::process::{
    Descriptors, InternalTimestamp, register_audio_element_parameters,
    register_mix_presentation_parameters,
};
use crate::structs::arbitrary::{ArbitraryObu, InsertionHook};
use crate::structs::audio_frame::AudioFrameObu;
use crate::structs::audio_element::AudioElementObu;
use crate::structs::codec_config::CodecConfigObu;
use crate::structs::header::{ObuHeader, ObuType};
use crate::structs::ia_sequence_header::IaSequenceHeaderObu;
use crate::structs::mix_presentation::MixPresentationObu;
use crate::structs::parameter_block::{ParameterBlockObu, ParameterMetadataMap};
use crate::structs::temporal_delimiter::TemporalDelimiterObu;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::HeaderError;

/// A parsed OBU of any type.
#[derive(Debug, Clone, PartialEq)]
pub enum Obu {
    SequenceHeader(IaSequenceHeaderObu),
    CodecConfig(CodecConfigObu),
    AudioElement(AudioElementObu),
    MixPresentation(MixPresentationObu),
    ParameterBlock(ParameterBlockObu),
    TemporalDelimiter(TemporalDelimiterObu),
    AudioFrame(AudioFrameObu),
    Arbitrary(ArbitraryObu),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsePhase {
    BeforeSequenceHeader,
    Descriptors,
    TemporalUnits,
}

/// Parses bitstream bytes into structured OBUs.
#[derive(Debug)]
pub struct Parser {
    metadata_map: ParameterMetadataMap,
    phase: ParsePhase,
}

impl Default for Parser {
    fn default() -> Self {
        Self {
            metadata_map: ParameterMetadataMap::new(),
            phase: ParsePhase::BeforeSequenceHeader,
        }
    }
}

impl Parser {
    /// Reads one OBU from the buffer.
    ///
    /// The OBU's declared size must match exactly what its payload consumes;
    /// the cursor lands on the next OBU boundary.
    pub fn parse_obu(&mut self, r: &mut BsIoSliceReader) -> Result<Obu> {
        let (obu_type, header, payload_size) = ObuHeader::read(r)?;
        let payload_start = r.position()?;

        let obu = match obu_type {
            ObuType::SequenceHeader => {
                let obu = IaSequenceHeaderObu::read(header, r)?;
                self.phase = ParsePhase::Descriptors;
                Obu::SequenceHeader(obu)
            }
            ObuType::CodecConfig => Obu::CodecConfig(CodecConfigObu::read(header, r)?),
            ObuType::AudioElement => {
                let obu = AudioElementObu::read(header, r)?;
                register_audio_element_parameters(&obu, &mut self.metadata_map);
                Obu::AudioElement(obu)
            }
            ObuType::MixPresentation => {
                let obu = MixPresentationObu::read(header, payload_size, r)?;
                register_mix_presentation_parameters(&obu, &mut self.metadata_map);
                Obu::MixPresentation(obu)
            }
            ObuType::ParameterBlock => {
                self.phase = ParsePhase::TemporalUnits;
                Obu::ParameterBlock(ParameterBlockObu::read(header, &self.metadata_map, r)?)
            }
            ObuType::TemporalDelimiter => {
                self.phase = ParsePhase::TemporalUnits;
                Obu::TemporalDelimiter(TemporalDelimiterObu::read(header, payload_size, r)?)
            }
            ObuType::AudioFrame | ObuType::AudioFrameId(_) => {
                self.phase = ParsePhase::TemporalUnits;
                Obu::AudioFrame(AudioFrameObu::read(obu_type, header, payload_size, r)?)
            }
            ObuType::Reserved(_) => {
                // Reserved types pass through and the stream continues.
                let insertion_hook = match self.phase {
                    ParsePhase::BeforeSequenceHeader => InsertionHook::BeforeDescriptors,
                    ParsePhase::Descriptors => InsertionHook::AfterDescriptors,
                    ParsePhase::TemporalUnits => InsertionHook::AfterAudioFramesAtTick,
                };
                trace!("Passing through reserved OBU type {}", obu_type.as_u5());
                Obu::Arbitrary(ArbitraryObu::read(
                    obu_type,
                    header,
                    payload_size,
                    insertion_hook,
                    r,
                )?)
            }
        };

        let consumed = r.position()? - payload_start;
        if consumed != payload_size << 3 {
            bail!(HeaderError::PayloadSizeMismatch {
                expected: payload_start + (payload_size << 3),
                actual: r.position()?,
            });
        }

        Ok(obu)
    }

    /// Parses every OBU in `data`, assembling descriptors and temporal
    /// units.
    pub fn parse_sequence(&mut self, data: &[u8]) -> Result<IaSequence> {
        let r = &mut BsIoSliceReader::from_slice(data);

        let mut sequence_header = None;
        let mut codec_configs = BTreeMap::new();
        let mut audio_elements: BTreeMap<u32, AudioElementObu> = BTreeMap::new();
        let mut mix_presentations = BTreeMap::new();
        let mut descriptor_arbitrary_obus = Vec::new();

        let mut temporal_units: Vec<DecodedTemporalUnit> = Vec::new();
        let mut assembler = TemporalUnitAssembler::default();

        while r.available()? > 0 {
            match self.parse_obu(r)? {
                Obu::SequenceHeader(obu) => {
                    if sequence_header.is_none() {
                        sequence_header = Some(obu);
                    }
                }
                Obu::CodecConfig(obu) => {
                    codec_configs.insert(obu.codec_config_id, obu);
                }
                Obu::AudioElement(obu) => {
                    audio_elements.insert(obu.audio_element_id, obu);
                }
                Obu::MixPresentation(obu) => {
                    mix_presentations.insert(obu.mix_presentation_id, obu);
                }
                Obu::ParameterBlock(obu) => assembler.push_parameter_block(obu),
                Obu::TemporalDelimiter(_) => {
                    assembler.close_unit(&audio_elements, &codec_configs, &mut temporal_units)?;
                }
                Obu::AudioFrame(obu) => {
                    assembler.push_audio_frame(
                        obu,
                        &audio_elements,
                        &codec_configs,
                        &mut temporal_units,
                    )?;
                }
                Obu::Arbitrary(obu) => {
                    if obu.insertion_hook == InsertionHook::AfterAudioFramesAtTick {
                        assembler.push_arbitrary_obu(obu);
                    } else {
                        descriptor_arbitrary_obus.push(obu);
                    }
                }
            }
        }
        assembler.close_unit(&audio_elements, &codec_configs, &mut temporal_units)?;

        let Some(sequence_header) = sequence_header else {
            bail!("No IA Sequence Header in the bitstream");
        };

        Ok(IaSequence {
            descriptors: Descriptors {
                sequence_header,
                codec_configs,
                audio_elements,
                mix_presentations,
            },
            temporal_units,
            arbitrary_obus: descriptor_arbitrary_obus,
        })
    }
}

/// One decoded temporal unit: all OBUs covering `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTemporalUnit {
    pub start_timestamp: InternalTimestamp,
    pub end_timestamp: InternalTimestamp,
    pub parameter_blocks: Vec<ParameterBlockObu>,
    pub audio_frames: Vec<AudioFrameObu>,
    pub arbitrary_obus: Vec<ArbitraryObu>,
}

/// A fully parsed IA sequence.
#[derive(Debug)]
pub struct IaSequence {
    pub descriptors: Descriptors,
    pub temporal_units: Vec<DecodedTemporalUnit>,
    /// Arbitrary OBUs seen outside temporal units, in input order.
    pub arbitrary_obus: Vec<ArbitraryObu>,
}

/// Groups consecutive data-path OBUs into temporal units. A unit closes on
/// a temporal delimiter or when a substream repeats.
#[derive(Debug, Default)]
struct TemporalUnitAssembler {
    parameter_blocks: Vec<ParameterBlockObu>,
    audio_frames: Vec<AudioFrameObu>,
    arbitrary_obus: Vec<ArbitraryObu>,
    current_tick: InternalTimestamp,
}

impl TemporalUnitAssembler {
    fn push_parameter_block(&mut self, obu: ParameterBlockObu) {
        self.parameter_blocks.push(obu);
    }

    fn push_arbitrary_obu(&mut self, obu: ArbitraryObu) {
        self.arbitrary_obus.push(obu);
    }

    fn push_audio_frame(
        &mut self,
        obu: AudioFrameObu,
        audio_elements: &BTreeMap<u32, AudioElementObu>,
        codec_configs: &BTreeMap<u32, CodecConfigObu>,
        temporal_units: &mut Vec<DecodedTemporalUnit>,
    ) -> Result<()> {
        let repeated_substream = self
            .audio_frames
            .iter()
            .any(|frame| frame.substream_id() == obu.substream_id());
        if repeated_substream {
            self.close_unit(audio_elements, codec_configs, temporal_units)?;
        }
        self.audio_frames.push(obu);
        Ok(())
    }

    fn close_unit(
        &mut self,
        audio_elements: &BTreeMap<u32, AudioElementObu>,
        codec_configs: &BTreeMap<u32, CodecConfigObu>,
        temporal_units: &mut Vec<DecodedTemporalUnit>,
    ) -> Result<()> {
        if self.audio_frames.is_empty() && self.parameter_blocks.is_empty() {
            self.arbitrary_obus.clear();
            return Ok(());
        }

        let num_samples = self.unit_duration(audio_elements, codec_configs)?;
        let start_timestamp = self.current_tick;
        let end_timestamp = start_timestamp + i64::from(num_samples);
        self.current_tick = end_timestamp;

        let mut arbitrary_obus = std::mem::take(&mut self.arbitrary_obus);
        for obu in &mut arbitrary_obus {
            obu.insertion_tick = Some(start_timestamp);
        }

        temporal_units.push(DecodedTemporalUnit {
            start_timestamp,
            end_timestamp,
            parameter_blocks: std::mem::take(&mut self.parameter_blocks),
            audio_frames: std::mem::take(&mut self.audio_frames),
            arbitrary_obus,
        });
        Ok(())
    }

    /// Duration in samples of the unit being assembled, from the codec
    /// config behind its first audio frame.
    fn unit_duration(
        &self,
        audio_elements: &BTreeMap<u32, AudioElementObu>,
        codec_configs: &BTreeMap<u32, CodecConfigObu>,
    ) -> Result<u32> {
        let Some(first_frame) = self.audio_frames.first() else {
            bail!("A temporal unit without audio frames has no duration");
        };
        let substream_id = first_frame.substream_id();

        let element = audio_elements
            .values()
            .find(|element| element.audio_substream_ids.contains(&substream_id));
        let Some(element) = element else {
            bail!("No audio element claims substream {substream_id}");
        };
        let Some(codec_config) = codec_configs.get(&element.codec_config_id) else {
            bail!("No codec config with id {}", element.codec_config_id);
        };
        Ok(codec_config.num_samples_per_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::process::sequence::{
        AudioFrameWithData, ObuSink, ParameterBlockWithData, Sequencer,
    };
    use crate::structs::audio_element::{
        AudioElementConfig, ChannelAudioLayerConfig, ScalableChannelLayoutConfig,
    };
    use crate::structs::codec_config::CodecConfig;
    use crate::structs::decoder_config::DecoderConfig;
    use crate::structs::decoder_config::lpcm::LpcmDecoderConfig;
    use crate::structs::ia_sequence_header::ProfileVersion;
    use crate::structs::mix_presentation::{
        Layout, LoudnessInfo, MixPresentationLayout, MixPresentationObu, MixPresentationSubMix,
        RenderingConfig, SOUND_SYSTEM_A_0_2_0, SubMixAudioElement,
    };
    use crate::structs::param_definition::{MixGainParamDefinition, ParamDefinition};
    use crate::structs::parameter_block::{
        MixGainParameterData, ParameterData, ParameterSubblock,
    };
    use crate::utils::bitstream_io::BitstreamIoWriter;

    const SAMPLES_PER_FRAME: u32 = 64;

    fn mix_gain(parameter_id: u32) -> MixGainParamDefinition {
        MixGainParamDefinition {
            base: ParamDefinition {
                parameter_id,
                parameter_rate: 48000,
                param_definition_mode: 0,
                duration: SAMPLES_PER_FRAME,
                constant_subblock_duration: SAMPLES_PER_FRAME,
                ..Default::default()
            },
            default_mix_gain: 0,
        }
    }

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
            audio_substream_ids: vec![0, 1],
            audio_element_params: vec![],
            config: AudioElementConfig::Channel(ScalableChannelLayoutConfig {
                channel_audio_layer_configs: vec![ChannelAudioLayerConfig {
                    loudspeaker_layout: 1,
                    substream_count: 2,
                    coupled_substream_count: 1,
                    ..Default::default()
                }],
            }),
        };

        let mix_presentation = MixPresentationObu {
            header: ObuHeader::default(),
            mix_presentation_id: 42,
            annotations_language: vec!["en-us".into()],
            localized_presentation_annotations: vec!["test mix".into()],
            sub_mixes: vec![MixPresentationSubMix {
                audio_elements: vec![SubMixAudioElement {
                    audio_element_id: 1,
                    localized_element_annotations: vec!["bed".into()],
                    rendering_config: RenderingConfig::default(),
                    element_mix_gain: mix_gain(3),
                }],
                output_mix_gain: mix_gain(5),
                layouts: vec![MixPresentationLayout {
                    loudness_layout: Layout::SsConvention {
                        sound_system: SOUND_SYSTEM_A_0_2_0,
                        reserved: 0,
                    },
                    loudness: LoudnessInfo::default(),
                }],
            }],
            mix_presentation_tags: None,
        };

        Descriptors {
            sequence_header: IaSequenceHeaderObu::new(
                ProfileVersion::Simple,
                ProfileVersion::Simple,
            ),
            codec_configs: BTreeMap::from([(0, codec_config)]),
            audio_elements: BTreeMap::from([(1, audio_element)]),
            mix_presentations: BTreeMap::from([(42, mix_presentation)]),
        }
    }

    fn frame(substream_id: u32, start: i64) -> AudioFrameWithData {
        AudioFrameWithData {
            obu: AudioFrameObu::new(
                ObuHeader::default(),
                substream_id,
                vec![substream_id as u8; 4],
            ),
            start_timestamp: start,
            end_timestamp: start + i64::from(SAMPLES_PER_FRAME),
            audio_element_id: 1,
        }
    }

    fn parameter_block(parameter_id: u32, start: i64) -> ParameterBlockWithData {
        ParameterBlockWithData {
            obu: ParameterBlockObu {
                header: ObuHeader::default(),
                parameter_id,
                duration: 0,
                constant_subblock_duration: 0,
                num_subblocks: 0,
                subblocks: vec![ParameterSubblock {
                    subblock_duration: 0,
                    param_data: ParameterData::MixGain(MixGainParameterData::Step {
                        start_point_value: 0x0080,
                    }),
                }],
            },
            start_timestamp: start,
            end_timestamp: start + i64::from(SAMPLES_PER_FRAME),
        }
    }

    fn encoded_sequence() -> Vec<u8> {
        let descriptors = descriptors();
        let frames = [frame(0, 0), frame(1, 0), frame(0, 64), frame(1, 64)];
        let blocks = [
            parameter_block(3, 0),
            parameter_block(5, 0),
            parameter_block(3, 64),
            parameter_block(5, 64),
        ];

        let mut sink = Vec::new();
        Sequencer::new()
            .pick_and_place(&descriptors, &frames, &blocks, &[], &mut sink)
            .unwrap();
        sink
    }

    #[test]
    fn parses_a_sequenced_stream_back() {
        let bytes = encoded_sequence();
        let sequence = Parser::default().parse_sequence(&bytes).unwrap();

        assert_eq!(sequence.descriptors.codec_configs.len(), 1);
        assert_eq!(sequence.descriptors.audio_elements.len(), 1);
        assert_eq!(sequence.descriptors.mix_presentations.len(), 1);

        assert_eq!(sequence.temporal_units.len(), 2);
        let first = &sequence.temporal_units[0];
        assert_eq!(first.start_timestamp, 0);
        assert_eq!(first.end_timestamp, 64);
        // Canonical order within the unit.
        let parameter_ids: Vec<u32> = first
            .parameter_blocks
            .iter()
            .map(|block| block.parameter_id)
            .collect();
        assert_eq!(parameter_ids, [3, 5]);
        let substream_ids: Vec<u32> = first
            .audio_frames
            .iter()
            .map(|frame| frame.substream_id())
            .collect();
        assert_eq!(substream_ids, [0, 1]);

        let second = &sequence.temporal_units[1];
        assert_eq!(second.start_timestamp, 64);
        assert_eq!(second.end_timestamp, 128);
    }

    #[test]
    fn temporal_delimiters_split_units() {
        let descriptors = descriptors();
        let frames = [frame(0, 0), frame(1, 0), frame(0, 64), frame(1, 64)];

        let mut sink = Vec::new();
        Sequencer::new()
            .with_temporal_delimiters(true)
            .pick_and_place(&descriptors, &frames, &[], &[], &mut sink)
            .unwrap();

        let sequence = Parser::default().parse_sequence(&sink).unwrap();
        assert_eq!(sequence.temporal_units.len(), 2);
        assert_eq!(sequence.temporal_units[1].audio_frames.len(), 2);
    }

    #[test]
    fn reserved_obu_types_pass_through() {
        let mut bytes = encoded_sequence();
        // Append a reserved OBU after the last temporal unit.
        let mut w = BitstreamIoWriter::default();
        ArbitraryObu::new(
            ObuType::Reserved(27),
            ObuHeader::default(),
            vec![0xAB, 0xCD],
            InsertionHook::AfterAudioFramesAtTick,
        )
        .write(&mut w)
        .unwrap();
        bytes.push_bytes(&w.into_bytes().unwrap()).unwrap();

        let sequence = Parser::default().parse_sequence(&bytes).unwrap();
        let last_unit = sequence.temporal_units.last().unwrap();
        assert_eq!(last_unit.arbitrary_obus.len(), 1);
        assert_eq!(last_unit.arbitrary_obus[0].payload, [0xAB, 0xCD]);
        assert_eq!(last_unit.arbitrary_obus[0].insertion_tick, Some(64));
    }

    #[test]
    fn truncated_streams_fail() {
        let bytes = encoded_sequence();
        assert!(
            Parser::default()
                .parse_sequence(&bytes[..bytes.len() - 1])
                .is_err()
        );
    }

    #[test]
    fn missing_sequence_header_fails() {
        let bytes = encoded_sequence();
        // Skip the 8-byte sequence header.
        assert!(Parser::default().parse_sequence(&bytes[8..]).is_err());
    }

    #[test]
    fn oversized_obu_size_is_rejected() {
        // A temporal delimiter whose obu_size claims one payload byte that
        // its type never consumes.
        let bytes = [0x20, 0x01, 0x00];
        let mut r = BsIoSliceReader::from_slice(&bytes);
        assert!(Parser::default().parse_obu(&mut r).is_err());
    }
}
