//! Temporal-unit assembly and canonical OBU sequencing.
//!
//! A temporal unit is the set of OBUs covering one aligned time interval:
//! at least one audio frame, any parameter blocks spanning exactly that
//! interval, and any arbitrary OBUs pinned to its start tick. The sequencer
//! validates each unit, sorts its members into canonical order and emits
//! the whole sequence behind the descriptor OBUs.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use log::{debug, info};

use crate::process::{Descriptors, InternalTimestamp};
use crate::structs::arbitrary::{ArbitraryObu, InsertionHook};
use crate::structs::audio_frame::AudioFrameObu;
use crate::structs::parameter_block::{ParameterBlockObu, ParameterMetadataMap};
use crate::structs::temporal_delimiter::TemporalDelimiterObu;
use crate::utils::bitstream_io::{BitstreamIoWriter, LebStyle};
use crate::utils::errors::{ParamError, TemporalUnitError};

/// An audio frame plus the timing the OBU itself does not carry.
#[derive(Debug, Clone)]
pub struct AudioFrameWithData {
    pub obu: AudioFrameObu,
    pub start_timestamp: InternalTimestamp,
    pub end_timestamp: InternalTimestamp,
    pub audio_element_id: u32,
}

/// A parameter block plus its resolved time span.
#[derive(Debug, Clone)]
pub struct ParameterBlockWithData {
    pub obu: ParameterBlockObu,
    pub start_timestamp: InternalTimestamp,
    pub end_timestamp: InternalTimestamp,
}

/// A validated, canonically ordered view over one temporal unit.
///
/// Non-owning; valid only while the underlying OBU collections live.
#[derive(Debug)]
pub struct TemporalUnitView<'a> {
    pub parameter_blocks: Vec<&'a ParameterBlockWithData>,
    pub audio_frames: Vec<&'a AudioFrameWithData>,
    pub arbitrary_obus: Vec<&'a ArbitraryObu>,
    pub start_timestamp: InternalTimestamp,
    pub end_timestamp: InternalTimestamp,
    pub num_samples_to_trim_at_start: u32,
    pub num_untrimmed_samples: u32,
}

impl<'a> TemporalUnitView<'a> {
    pub fn create(
        parameter_blocks: Vec<&'a ParameterBlockWithData>,
        audio_frames: Vec<&'a AudioFrameWithData>,
        arbitrary_obus: Vec<&'a ArbitraryObu>,
        descriptors: &Descriptors,
    ) -> Result<Self> {
        let Some(first_audio_frame) = audio_frames.first() else {
            bail!(TemporalUnitError::NoAudioFrames);
        };

        // Statistics are inferred from the first frame; every other OBU must
        // agree with them.
        let num_samples_per_frame = descriptors
            .codec_config_for_element(first_audio_frame.audio_element_id)?
            .num_samples_per_frame();
        let num_samples_to_trim_at_start =
            first_audio_frame.obu.header.num_samples_to_trim_at_start;
        let num_samples_to_trim_at_end = first_audio_frame.obu.header.num_samples_to_trim_at_end;
        let start_timestamp = first_audio_frame.start_timestamp;
        let end_timestamp = first_audio_frame.end_timestamp;

        let cumulative_trim =
            u64::from(num_samples_to_trim_at_start) + u64::from(num_samples_to_trim_at_end);
        if cumulative_trim > u64::from(num_samples_per_frame) {
            bail!(TemporalUnitError::TrimExceedsFrame {
                trim: cumulative_trim,
                samples_per_frame: num_samples_per_frame,
            });
        }

        for audio_frame in &audio_frames {
            for (field, expected, actual) in [
                (
                    "num_samples_to_trim_at_start",
                    i64::from(num_samples_to_trim_at_start),
                    i64::from(audio_frame.obu.header.num_samples_to_trim_at_start),
                ),
                (
                    "num_samples_to_trim_at_end",
                    i64::from(num_samples_to_trim_at_end),
                    i64::from(audio_frame.obu.header.num_samples_to_trim_at_end),
                ),
                ("start_timestamp", start_timestamp, audio_frame.start_timestamp),
                ("end_timestamp", end_timestamp, audio_frame.end_timestamp),
            ] {
                if expected != actual {
                    bail!(TemporalUnitError::StatisticMismatch {
                        field,
                        expected,
                        actual,
                    });
                }
            }
        }
        let mut seen_substream_ids = Vec::new();
        for audio_frame in &audio_frames {
            let substream_id = audio_frame.obu.substream_id();
            if seen_substream_ids.contains(&substream_id) {
                bail!(TemporalUnitError::DuplicateSubstreamId(substream_id));
            }
            seen_substream_ids.push(substream_id);
        }

        let mut seen_parameter_ids = Vec::new();
        for parameter_block in &parameter_blocks {
            if seen_parameter_ids.contains(&parameter_block.obu.parameter_id) {
                bail!(TemporalUnitError::DuplicateParameterId(
                    parameter_block.obu.parameter_id
                ));
            }
            seen_parameter_ids.push(parameter_block.obu.parameter_id);

            if parameter_block.start_timestamp != start_timestamp
                || parameter_block.end_timestamp != end_timestamp
            {
                bail!(TemporalUnitError::ParameterSpanMismatch {
                    start: parameter_block.start_timestamp,
                    end: parameter_block.end_timestamp,
                    tu_start: start_timestamp,
                    tu_end: end_timestamp,
                });
            }
        }

        for arbitrary_obu in &arbitrary_obus {
            let tick = arbitrary_obu.insertion_tick.unwrap_or(i64::MIN);
            if tick != start_timestamp {
                bail!(TemporalUnitError::InsertionTickMismatch {
                    tick,
                    start: start_timestamp,
                });
            }
        }

        // Canonical order: parameter blocks ascending by parameter id, audio
        // frames ascending by (audio element id, substream id). Arbitrary
        // OBUs stay in input order.
        let mut parameter_blocks = parameter_blocks;
        parameter_blocks.sort_by_key(|block| block.obu.parameter_id);
        let mut audio_frames = audio_frames;
        audio_frames.sort_by_key(|frame| (frame.audio_element_id, frame.obu.substream_id()));

        Ok(Self {
            parameter_blocks,
            audio_frames,
            arbitrary_obus,
            start_timestamp,
            end_timestamp,
            num_samples_to_trim_at_start,
            num_untrimmed_samples: num_samples_per_frame - cumulative_trim as u32,
        })
    }

    /// Emits the unit: an optional temporal delimiter, parameter blocks,
    /// audio frames, then this tick's arbitrary OBUs.
    pub fn write(
        &self,
        include_temporal_delimiters: bool,
        metadata_map: &ParameterMetadataMap,
        w: &mut BitstreamIoWriter,
    ) -> Result<()> {
        if include_temporal_delimiters {
            TemporalDelimiterObu::default().write(w)?;
        }

        for parameter_block in &self.parameter_blocks {
            let Some(metadata) = metadata_map.get(&parameter_block.obu.parameter_id) else {
                bail!(ParamError::UnknownParameterId(
                    parameter_block.obu.parameter_id
                ));
            };
            parameter_block.obu.write(metadata, w)?;
        }

        for audio_frame in &self.audio_frames {
            audio_frame.obu.write(w)?;
            debug!(
                "bit_position = {} after audio frame for substream {}",
                w.bit_position(),
                audio_frame.obu.substream_id()
            );
        }

        for arbitrary_obu in &self.arbitrary_obus {
            arbitrary_obu.write(w)?;
        }
        Ok(())
    }
}

/// Destination of the serialized sequence: an append-only byte stream.
pub trait ObuSink {
    fn push_bytes(&mut self, bytes: &[u8]) -> Result<()>;
}

impl ObuSink for Vec<u8> {
    fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// Totals reported after a sequence is emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceStats {
    pub num_temporal_units: usize,
    /// Net samples across all temporal units, trimming excluded.
    pub num_samples: u64,
}

/// Serializes a whole IA sequence: descriptors first, then temporal units
/// ascending by start timestamp, with hook-registered arbitrary OBUs in
/// their fixed positions.
#[derive(Debug)]
pub struct Sequencer {
    leb_style: LebStyle,
    include_temporal_delimiters: bool,
    /// The internal buffer drains to the sink whenever it grows past this
    /// many bytes. Flushes land on temporal-unit boundaries, so the sink
    /// never observes a partial OBU.
    flush_watermark: usize,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self {
            leb_style: LebStyle::Minimal,
            include_temporal_delimiters: false,
            flush_watermark: 64 * 1024,
        }
    }
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_leb_style(mut self, leb_style: LebStyle) -> Self {
        self.leb_style = leb_style;
        self
    }

    pub fn with_temporal_delimiters(mut self, include: bool) -> Self {
        self.include_temporal_delimiters = include;
        self
    }

    pub fn with_flush_watermark(mut self, bytes: usize) -> Self {
        self.flush_watermark = bytes;
        self
    }

    /// Writes the descriptor OBUs in canonical order: IA sequence header,
    /// codec configs, audio elements and mix presentations, each ascending
    /// by id, with the sequence-header hook in between.
    pub fn write_descriptor_obus(
        &self,
        descriptors: &Descriptors,
        arbitrary_obus: &[ArbitraryObu],
        w: &mut BitstreamIoWriter,
    ) -> Result<()> {
        descriptors.sequence_header.write(w)?;
        ArbitraryObu::write_obus_with_hook(InsertionHook::AfterIaSequenceHeader, arbitrary_obus, w)?;

        for codec_config in descriptors.codec_configs.values() {
            codec_config.write(w)?;
            debug!("bit_position = {} after codec config", w.bit_position());
        }
        for audio_element in descriptors.audio_elements.values() {
            audio_element.write(w)?;
        }
        for mix_presentation in descriptors.mix_presentations.values() {
            mix_presentation.write(w)?;
        }
        Ok(())
    }

    /// Serializes the full sequence into `sink`.
    pub fn pick_and_place(
        &self,
        descriptors: &Descriptors,
        audio_frames: &[AudioFrameWithData],
        parameter_blocks: &[ParameterBlockWithData],
        arbitrary_obus: &[ArbitraryObu],
        sink: &mut dyn ObuSink,
    ) -> Result<SequenceStats> {
        let metadata_map = descriptors.parameter_metadata();
        let mut buffer = Vec::new();

        {
            let mut w = BitstreamIoWriter::new(self.leb_style);
            ArbitraryObu::write_obus_with_hook(
                InsertionHook::BeforeDescriptors,
                arbitrary_obus,
                &mut w,
            )?;
            self.write_descriptor_obus(descriptors, arbitrary_obus, &mut w)?;
            ArbitraryObu::write_obus_with_hook(
                InsertionHook::AfterDescriptors,
                arbitrary_obus,
                &mut w,
            )?;
            buffer.extend_from_slice(&w.into_bytes()?);
        }

        // Bin the data-path OBUs by temporal-unit start timestamp.
        let mut temporal_unit_map: BTreeMap<InternalTimestamp, TemporalUnitBin> = BTreeMap::new();
        for audio_frame in audio_frames {
            let bin = temporal_unit_map
                .entry(audio_frame.start_timestamp)
                .or_default();
            if let Some(previous) = bin.audio_frames.last() {
                if previous.end_timestamp != audio_frame.end_timestamp {
                    bail!(TemporalUnitError::DurationMismatch);
                }
            }
            bin.audio_frames.push(audio_frame);
        }
        for parameter_block in parameter_blocks {
            let Some(bin) = temporal_unit_map.get_mut(&parameter_block.start_timestamp) else {
                bail!(TemporalUnitError::NoAudioFrames);
            };
            bin.parameter_blocks.push(parameter_block);
        }
        for arbitrary_obu in arbitrary_obus {
            if arbitrary_obu.insertion_hook != InsertionHook::AfterAudioFramesAtTick {
                continue;
            }
            let tick = arbitrary_obu.insertion_tick.unwrap_or(i64::MIN);
            let Some(bin) = temporal_unit_map.get_mut(&tick) else {
                bail!(TemporalUnitError::NoAudioFrames);
            };
            bin.arbitrary_obus.push(arbitrary_obu);
        }

        let mut stats = SequenceStats::default();
        for bin in temporal_unit_map.into_values() {
            let view = TemporalUnitView::create(
                bin.parameter_blocks,
                bin.audio_frames,
                bin.arbitrary_obus,
                descriptors,
            )?;
            stats.num_temporal_units += 1;
            stats.num_samples += u64::from(view.num_untrimmed_samples);

            let mut w = BitstreamIoWriter::new(self.leb_style);
            view.write(self.include_temporal_delimiters, &metadata_map, &mut w)?;
            buffer.extend_from_slice(&w.into_bytes()?);

            // Temporal units are the bulk of a sequence; drain periodically
            // instead of keeping everything in memory.
            if buffer.len() >= self.flush_watermark {
                sink.push_bytes(&buffer)?;
                buffer.clear();
            }
        }

        sink.push_bytes(&buffer)?;
        info!(
            "Wrote {} temporal units with a total of {} samples excluding padding",
            stats.num_temporal_units, stats.num_samples
        );
        Ok(stats)
    }
}

#[derive(Debug, Default)]
struct TemporalUnitBin<'a> {
    audio_frames: Vec<&'a AudioFrameWithData>,
    parameter_blocks: Vec<&'a ParameterBlockWithData>,
    arbitrary_obus: Vec<&'a ArbitraryObu>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::structs::audio_element::{
        AudioElementConfig, AudioElementObu, ChannelAudioLayerConfig, ScalableChannelLayoutConfig,
    };
    use crate::structs::codec_config::{CodecConfig, CodecConfigObu};
    use crate::structs::decoder_config::DecoderConfig;
    use crate::structs::decoder_config::lpcm::LpcmDecoderConfig;
    use crate::structs::header::{ObuHeader, ObuType};
    use crate::structs::ia_sequence_header::{IaSequenceHeaderObu, ProfileVersion};
    use crate::structs::param_definition::ParamDefinition;
    use crate::structs::parameter_block::{
        MixGainParameterData, ParameterData, ParameterSubblock,
    };

    const SAMPLES_PER_FRAME: u32 = 64;

    fn element(audio_element_id: u32, substream_ids: Vec<u32>) -> AudioElementObu {
        AudioElementObu {
            header: ObuHeader::default(),
            audio_element_id,
            reserved: 0,
            codec_config_id: 0,
            audio_substream_ids: substream_ids,
            audio_element_params: vec![],
            config: AudioElementConfig::Channel(ScalableChannelLayoutConfig {
                channel_audio_layer_configs: vec![ChannelAudioLayerConfig {
                    loudspeaker_layout: 1,
                    substream_count: 1,
                    coupled_substream_count: 1,
                    ..Default::default()
                }],
            }),
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

        Descriptors {
            sequence_header: IaSequenceHeaderObu::new(
                ProfileVersion::Simple,
                ProfileVersion::Simple,
            ),
            codec_configs: BTreeMap::from([(0, codec_config)]),
            audio_elements: BTreeMap::from([
                (1, element(1, vec![9, 3])),
                (2, element(2, vec![5])),
            ]),
            mix_presentations: BTreeMap::new(),
        }
    }

    fn frame(audio_element_id: u32, substream_id: u32, start: i64) -> AudioFrameWithData {
        AudioFrameWithData {
            obu: AudioFrameObu::new(ObuHeader::default(), substream_id, vec![0xEE; 4]),
            start_timestamp: start,
            end_timestamp: start + i64::from(SAMPLES_PER_FRAME),
            audio_element_id,
        }
    }

    fn parameter_block(parameter_id: u32, start: i64) -> ParameterBlockWithData {
        ParameterBlockWithData {
            obu: ParameterBlockObu {
                header: ObuHeader::default(),
                parameter_id,
                duration: SAMPLES_PER_FRAME,
                constant_subblock_duration: SAMPLES_PER_FRAME,
                num_subblocks: 0,
                subblocks: vec![ParameterSubblock {
                    subblock_duration: 0,
                    param_data: ParameterData::MixGain(MixGainParameterData::Step {
                        start_point_value: 0,
                    }),
                }],
            },
            start_timestamp: start,
            end_timestamp: start + i64::from(SAMPLES_PER_FRAME),
        }
    }

    #[test]
    fn view_sorts_into_canonical_order() {
        let descriptors = descriptors();
        let frames = [frame(2, 5, 0), frame(1, 9, 0), frame(1, 3, 0)];
        let blocks = [
            parameter_block(7, 0),
            parameter_block(3, 0),
            parameter_block(5, 0),
        ];

        let view = TemporalUnitView::create(
            blocks.iter().collect(),
            frames.iter().collect(),
            vec![],
            &descriptors,
        )
        .unwrap();

        let parameter_ids: Vec<u32> = view
            .parameter_blocks
            .iter()
            .map(|block| block.obu.parameter_id)
            .collect();
        assert_eq!(parameter_ids, [3, 5, 7]);

        let frame_keys: Vec<(u32, u32)> = view
            .audio_frames
            .iter()
            .map(|frame| (frame.audio_element_id, frame.obu.substream_id()))
            .collect();
        assert_eq!(frame_keys, [(1, 3), (1, 9), (2, 5)]);

        assert_eq!(view.start_timestamp, 0);
        assert_eq!(view.end_timestamp, 64);
        assert_eq!(view.num_untrimmed_samples, SAMPLES_PER_FRAME);
    }

    #[test]
    fn view_rejects_inconsistent_units() {
        let descriptors = descriptors();

        // No audio frames at all.
        assert!(TemporalUnitView::create(vec![], vec![], vec![], &descriptors).is_err());

        // Duplicate substream id.
        let frames = [frame(1, 3, 0), frame(1, 3, 0)];
        assert!(
            TemporalUnitView::create(vec![], frames.iter().collect(), vec![], &descriptors)
                .is_err()
        );

        // Mismatched trims.
        let mut trimmed = frame(1, 3, 0);
        trimmed.obu.header.trimming_status = true;
        trimmed.obu.header.num_samples_to_trim_at_end = 8;
        let frames = [frame(1, 9, 0), trimmed];
        assert!(
            TemporalUnitView::create(vec![], frames.iter().collect(), vec![], &descriptors)
                .is_err()
        );

        // Excessive trim.
        let mut trimmed = frame(1, 3, 0);
        trimmed.obu.header.trimming_status = true;
        trimmed.obu.header.num_samples_to_trim_at_start = SAMPLES_PER_FRAME;
        trimmed.obu.header.num_samples_to_trim_at_end = 1;
        assert!(
            TemporalUnitView::create(vec![], vec![&trimmed], vec![], &descriptors).is_err()
        );

        // Parameter block spanning two units.
        let frames = [frame(1, 3, 0)];
        let block = parameter_block(3, 0);
        let mut long_block = block.clone();
        long_block.end_timestamp = 128;
        assert!(
            TemporalUnitView::create(
                vec![&long_block],
                frames.iter().collect(),
                vec![],
                &descriptors
            )
            .is_err()
        );

        // Duplicate parameter ids.
        let blocks = [parameter_block(3, 0), parameter_block(3, 0)];
        assert!(
            TemporalUnitView::create(
                blocks.iter().collect(),
                frames.iter().collect(),
                vec![],
                &descriptors
            )
            .is_err()
        );

        // Arbitrary OBU pinned to a different tick.
        let mut arbitrary = ArbitraryObu::new(
            ObuType::Reserved(24),
            ObuHeader::default(),
            vec![],
            InsertionHook::AfterAudioFramesAtTick,
        );
        arbitrary.insertion_tick = Some(64);
        assert!(
            TemporalUnitView::create(vec![], frames.iter().collect(), vec![&arbitrary], &descriptors)
                .is_err()
        );
    }

    #[test]
    fn pick_and_place_emits_descriptors_then_units() {
        let descriptors = descriptors();
        let frames = [
            frame(1, 3, 0),
            frame(1, 9, 0),
            frame(2, 5, 0),
            frame(1, 3, 64),
            frame(1, 9, 64),
            frame(2, 5, 64),
        ];

        let mut sink = Vec::new();
        let stats = Sequencer::new()
            .with_temporal_delimiters(true)
            .pick_and_place(&descriptors, &frames, &[], &[], &mut sink)
            .unwrap();

        assert_eq!(stats.num_temporal_units, 2);
        assert_eq!(stats.num_samples, 2 * u64::from(SAMPLES_PER_FRAME));

        // The stream opens with the IA sequence header.
        assert_eq!(&sink[..8], [0xF8, 0x06, 0x69, 0x61, 0x6D, 0x66, 0x00, 0x00]);
        // Temporal delimiters precede each unit.
        let delimiter_count = sink.windows(2).filter(|w| w == &[0x20, 0x00]).count();
        assert_eq!(delimiter_count, 2);
    }

    #[test]
    fn pick_and_place_rejects_an_orphan_parameter_block() {
        let descriptors = descriptors();
        let frames = [frame(1, 3, 0), frame(1, 9, 0), frame(2, 5, 0)];
        let blocks = [parameter_block(3, 64)];

        let mut sink = Vec::new();
        assert!(
            Sequencer::new()
                .pick_and_place(&descriptors, &frames, &blocks, &[], &mut sink)
                .is_err()
        );
    }

    #[test]
    fn watermark_flushes_whole_units() {
        let descriptors = descriptors();
        let mut frames = Vec::new();
        for i in 0..8 {
            frames.push(frame(1, 3, i * i64::from(SAMPLES_PER_FRAME)));
            frames.push(frame(1, 9, i * i64::from(SAMPLES_PER_FRAME)));
            frames.push(frame(2, 5, i * i64::from(SAMPLES_PER_FRAME)));
        }

        let mut unflushed = Vec::new();
        Sequencer::new()
            .pick_and_place(&descriptors, &frames, &[], &[], &mut unflushed)
            .unwrap();

        let mut flushed = Vec::new();
        Sequencer::new()
            .with_flush_watermark(1)
            .pick_and_place(&descriptors, &frames, &[], &[], &mut flushed)
            .unwrap();

        assert_eq!(unflushed, flushed);
    }
}
