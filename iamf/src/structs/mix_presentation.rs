//! Mix Presentation OBU.
//!
//! Describes how audio elements are mixed and rendered: localized
//! annotations, sub-mixes with per-element rendering configs and mix gains,
//! playback layouts with loudness information, and an optional trailing
//! tags block.

use anyhow::{Result, bail};

use crate::structs::header::{ObuHeader, ObuType, write_obu};
use crate::structs::param_definition::{
    Cart8ParamDefinition, Cart16ParamDefinition, DualCart8ParamDefinition,
    DualCart16ParamDefinition, DualPolarParamDefinition, ExtendedParamDefinition,
    MixGainParamDefinition, PARAMETER_DEFINITION_CART8, PARAMETER_DEFINITION_CART16,
    PARAMETER_DEFINITION_DUAL_CART8, PARAMETER_DEFINITION_DUAL_CART16,
    PARAMETER_DEFINITION_DUAL_POLAR, PARAMETER_DEFINITION_POLAR, ParamDefinitionVariant,
    PolarParamDefinition,
};
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::MixPresentationError;
use crate::utils::numeric::try_cast;
use crate::utils::validate::{validate_container_size_equal, validate_unique};

pub const LAYOUT_TYPE_RESERVED_0: u8 = 0;
pub const LAYOUT_TYPE_RESERVED_1: u8 = 1;
pub const LAYOUT_TYPE_LOUDSPEAKERS_SS_CONVENTION: u8 = 2;
pub const LAYOUT_TYPE_BINAURAL: u8 = 3;

/// Sound system A (0+2+0), i.e. stereo.
pub const SOUND_SYSTEM_A_0_2_0: u8 = 0;

pub const INFO_TYPE_TRUE_PEAK: u8 = 0x01;
pub const INFO_TYPE_ANCHORED_LOUDNESS: u8 = 0x02;
pub const INFO_TYPE_ANY_LAYOUT_EXTENSION: u8 = 0xFC;

/// A playback layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// ITU-2051-3 sound system, `layout_type == 2`.
    SsConvention { sound_system: u8, reserved: u8 },
    /// Binaural or one of the reserved layout types, which share the wire
    /// shape.
    ReservedOrBinaural { layout_type: u8, reserved: u8 },
}

impl Layout {
    pub fn is_stereo(&self) -> bool {
        matches!(
            self,
            Layout::SsConvention {
                sound_system: SOUND_SYSTEM_A_0_2_0,
                ..
            }
        )
    }

    /// Channel count needed to render this layout.
    pub fn num_channels(&self) -> Result<u32> {
        match self {
            Layout::SsConvention { sound_system, .. } => Ok(match sound_system {
                0 => 2,
                1 => 6,
                2 => 8,
                3 => 10,
                4 => 11,
                5 => 12,
                6 => 14,
                7 => 24,
                8 => 8,
                9 => 12,
                10 => 10,
                11 => 6,
                12 => 1,
                13 => 16,
                v => bail!("No channel count defined for sound_system {v}"),
            }),
            Layout::ReservedOrBinaural {
                layout_type: LAYOUT_TYPE_BINAURAL,
                ..
            } => Ok(2),
            Layout::ReservedOrBinaural { layout_type, .. } => {
                bail!("No channel count defined for layout_type {layout_type}")
            }
        }
    }

    fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        match self {
            Layout::SsConvention {
                sound_system,
                reserved,
            } => {
                w.put_n(2, u32::from(LAYOUT_TYPE_LOUDSPEAKERS_SS_CONVENTION))?;
                w.put_n(4, u32::from(*sound_system))?;
                w.put_n(2, u32::from(*reserved))?;
            }
            Layout::ReservedOrBinaural {
                layout_type,
                reserved,
            } => {
                w.put_n(2, u32::from(*layout_type))?;
                w.put_n(6, u32::from(*reserved))?;
            }
        }
        Ok(())
    }

    fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let layout_type: u8 = r.get_n(2)?;
        Ok(match layout_type {
            LAYOUT_TYPE_LOUDSPEAKERS_SS_CONVENTION => Layout::SsConvention {
                sound_system: r.get_n(4)?,
                reserved: r.get_n(2)?,
            },
            // Reserved layouts share the binaural shape as of IAMF v1.1.0.
            _ => Layout::ReservedOrBinaural {
                layout_type,
                reserved: r.get_n(6)?,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchoredLoudnessElement {
    pub anchor_element: u8,
    pub anchored_loudness: i16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchoredLoudness {
    pub anchor_elements: Vec<AnchoredLoudnessElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutExtension {
    pub info_type_bytes: Vec<u8>,
}

/// Measured loudness for one layout. The `info_type` bitmask gates the
/// optional sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoudnessInfo {
    pub info_type: u8,
    pub integrated_loudness: i16,
    pub digital_peak: i16,
    pub true_peak: i16,
    pub anchored_loudness: AnchoredLoudness,
    pub layout_extension: LayoutExtension,
}

impl LoudnessInfo {
    fn validate(&self) -> Result<()> {
        if self.info_type & INFO_TYPE_ANCHORED_LOUDNESS != 0 {
            let mut seen = [false; 256];
            for element in &self.anchored_loudness.anchor_elements {
                if seen[usize::from(element.anchor_element)] {
                    bail!(MixPresentationError::DuplicateAnchorElement(
                        element.anchor_element
                    ));
                }
                seen[usize::from(element.anchor_element)] = true;
            }
        }
        Ok(())
    }

    fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;
        w.put_n(8, u32::from(self.info_type))?;
        w.put_s(16, i32::from(self.integrated_loudness))?;
        w.put_s(16, i32::from(self.digital_peak))?;

        if self.info_type & INFO_TYPE_TRUE_PEAK != 0 {
            w.put_s(16, i32::from(self.true_peak))?;
        }
        if self.info_type & INFO_TYPE_ANCHORED_LOUDNESS != 0 {
            let num_anchor_elements: u8 =
                try_cast(self.anchored_loudness.anchor_elements.len())?;
            w.put_n(8, u32::from(num_anchor_elements))?;
            for element in &self.anchored_loudness.anchor_elements {
                w.put_n(8, u32::from(element.anchor_element))?;
                w.put_s(16, i32::from(element.anchored_loudness))?;
            }
        }
        if self.info_type & INFO_TYPE_ANY_LAYOUT_EXTENSION != 0 {
            w.put_uleb128(self.layout_extension.info_type_bytes.len() as u32)?;
            w.put_bytes(&self.layout_extension.info_type_bytes)?;
        }
        Ok(())
    }

    fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let mut loudness = Self {
            info_type: r.get_n(8)?,
            integrated_loudness: r.get_s(16)?,
            digital_peak: r.get_s(16)?,
            ..Default::default()
        };

        if loudness.info_type & INFO_TYPE_TRUE_PEAK != 0 {
            loudness.true_peak = r.get_s(16)?;
        }
        if loudness.info_type & INFO_TYPE_ANCHORED_LOUDNESS != 0 {
            let num_anchor_elements: u8 = r.get_n(8)?;
            for _ in 0..num_anchor_elements {
                loudness
                    .anchored_loudness
                    .anchor_elements
                    .push(AnchoredLoudnessElement {
                        anchor_element: r.get_n(8)?,
                        anchored_loudness: r.get_s(16)?,
                    });
            }
        }
        if loudness.info_type & INFO_TYPE_ANY_LAYOUT_EXTENSION != 0 {
            let info_type_size = r.get_uleb128()?;
            loudness.layout_extension.info_type_bytes = r.get_vec(info_type_size as usize)?;
        }

        loudness.validate()?;
        Ok(loudness)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixPresentationLayout {
    pub loudness_layout: Layout,
    pub loudness: LoudnessInfo,
}

/// Per-element gain offset, in Q7.8, as a fixed value or a user-adjustable
/// range. Unknown config types are preserved as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementGainOffsetConfig {
    Value {
        element_gain_offset: i16,
    },
    Range {
        default_element_gain_offset: i16,
        min_element_gain_offset: i16,
        max_element_gain_offset: i16,
    },
    Extension {
        element_gain_offset_config_type: u8,
        element_gain_offset_bytes: Vec<u8>,
    },
}

const ELEMENT_GAIN_OFFSET_VALUE_TYPE: u8 = 0;
const ELEMENT_GAIN_OFFSET_RANGE_TYPE: u8 = 1;

impl ElementGainOffsetConfig {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Range {
                default_element_gain_offset,
                min_element_gain_offset,
                max_element_gain_offset,
            } => {
                if default_element_gain_offset < min_element_gain_offset
                    || default_element_gain_offset > max_element_gain_offset
                {
                    bail!(MixPresentationError::GainOffsetOutsideRange {
                        default: *default_element_gain_offset,
                        min: *min_element_gain_offset,
                        max: *max_element_gain_offset,
                    });
                }
            }
            Self::Extension {
                element_gain_offset_config_type,
                ..
            } => {
                if *element_gain_offset_config_type <= ELEMENT_GAIN_OFFSET_RANGE_TYPE {
                    bail!(MixPresentationError::ReservedGainOffsetType(
                        *element_gain_offset_config_type
                    ));
                }
            }
            Self::Value { .. } => {}
        }
        Ok(())
    }

    fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;
        match self {
            Self::Value {
                element_gain_offset,
            } => {
                w.put_n(8, u32::from(ELEMENT_GAIN_OFFSET_VALUE_TYPE))?;
                w.put_s(16, i32::from(*element_gain_offset))?;
            }
            Self::Range {
                default_element_gain_offset,
                min_element_gain_offset,
                max_element_gain_offset,
            } => {
                w.put_n(8, u32::from(ELEMENT_GAIN_OFFSET_RANGE_TYPE))?;
                w.put_s(16, i32::from(*default_element_gain_offset))?;
                w.put_s(16, i32::from(*min_element_gain_offset))?;
                w.put_s(16, i32::from(*max_element_gain_offset))?;
            }
            Self::Extension {
                element_gain_offset_config_type,
                element_gain_offset_bytes,
            } => {
                w.put_n(8, u32::from(*element_gain_offset_config_type))?;
                w.put_uleb128(element_gain_offset_bytes.len() as u32)?;
                w.put_bytes(element_gain_offset_bytes)?;
            }
        }
        Ok(())
    }

    fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let element_gain_offset_config_type: u8 = r.get_n(8)?;
        let config = match element_gain_offset_config_type {
            ELEMENT_GAIN_OFFSET_VALUE_TYPE => Self::Value {
                element_gain_offset: r.get_s(16)?,
            },
            ELEMENT_GAIN_OFFSET_RANGE_TYPE => Self::Range {
                default_element_gain_offset: r.get_s(16)?,
                min_element_gain_offset: r.get_s(16)?,
                max_element_gain_offset: r.get_s(16)?,
            },
            _ => {
                let element_gain_offset_size = r.get_uleb128()?;
                Self::Extension {
                    element_gain_offset_config_type,
                    element_gain_offset_bytes: r.get_vec(element_gain_offset_size as usize)?,
                }
            }
        };
        config.validate()?;
        Ok(config)
    }
}

/// Per-element rendering behavior inside a sub-mix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderingConfig {
    /// 2-bit headphone rendering mode.
    pub headphones_rendering_mode: u8,
    /// 2-bit binaural filter profile.
    pub binaural_filter_profile: u8,
    pub reserved: u8,
    /// Positional parameter definitions carried in the extension block.
    pub rendering_config_param_definitions: Vec<ParamDefinitionVariant>,
    pub element_gain_offset_config: Option<ElementGainOffsetConfig>,
    /// Opaque tail of the extension block.
    pub rendering_config_extension_bytes: Vec<u8>,
}

impl RenderingConfig {
    fn validate(&self) -> Result<()> {
        for param in &self.rendering_config_param_definitions {
            match param {
                ParamDefinitionVariant::Polar(_)
                | ParamDefinitionVariant::Cart8(_)
                | ParamDefinitionVariant::Cart16(_)
                | ParamDefinitionVariant::DualPolar(_)
                | ParamDefinitionVariant::DualCart8(_)
                | ParamDefinitionVariant::DualCart16(_)
                | ParamDefinitionVariant::Extended(_) => {}
                other => bail!(
                    "Parameter definition type {} is not allowed in a rendering config",
                    other.param_definition_type()
                ),
            }
        }
        Ok(())
    }

    fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;

        w.put_n(2, u32::from(self.headphones_rendering_mode))?;
        w.put(self.element_gain_offset_config.is_some())?;
        w.put_n(2, u32::from(self.binaural_filter_profile))?;
        w.put_n(3, u32::from(self.reserved))?;

        if self.rendering_config_param_definitions.is_empty()
            && self.element_gain_offset_config.is_none()
            && self.rendering_config_extension_bytes.is_empty()
        {
            // Nothing to carry; older profiles wrote an empty extension.
            return w.put_uleb128(0);
        }

        // The extension block is length-prefixed, so render it first.
        let mut extension = BitstreamIoWriter::new(w.leb_style());
        extension.put_uleb128(self.rendering_config_param_definitions.len() as u32)?;
        for param in &self.rendering_config_param_definitions {
            extension.put_uleb128(param.param_definition_type())?;
            param.write(&mut extension)?;
        }
        if let Some(element_gain_offset_config) = &self.element_gain_offset_config {
            element_gain_offset_config.write(&mut extension)?;
        }
        extension.put_bytes(&self.rendering_config_extension_bytes)?;

        let extension = extension.into_bytes()?;
        w.put_uleb128(extension.len() as u32)?;
        w.put_bytes(&extension)
    }

    fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let headphones_rendering_mode = r.get_n(2)?;
        let element_gain_offset_flag = r.get()?;
        let binaural_filter_profile = r.get_n(2)?;
        let reserved = r.get_n(3)?;

        let rendering_config_extension_size = r.get_uleb128()?;
        let mut config = Self {
            headphones_rendering_mode,
            binaural_filter_profile,
            reserved,
            ..Default::default()
        };
        if rendering_config_extension_size == 0 {
            return Ok(config);
        }

        let extension_start = r.position()?;
        let extension_end = extension_start + (u64::from(rendering_config_extension_size) << 3);

        match Self::read_extension(element_gain_offset_flag, r) {
            Ok((params, element_gain_offset_config)) if r.position()? <= extension_end => {
                config.rendering_config_param_definitions = params;
                config.element_gain_offset_config = element_gain_offset_config;
                let remaining = (extension_end - r.position()?) >> 3;
                config.rendering_config_extension_bytes = r.get_vec(remaining as usize)?;
            }
            _ => {
                // The extension did not parse as parameter definitions; keep
                // it verbatim so it round-trips.
                r.seek_to(extension_start)?;
                config.rendering_config_extension_bytes =
                    r.get_vec(rendering_config_extension_size as usize)?;
            }
        }
        Ok(config)
    }

    fn read_extension(
        element_gain_offset_flag: bool,
        r: &mut BsIoSliceReader,
    ) -> Result<(Vec<ParamDefinitionVariant>, Option<ElementGainOffsetConfig>)> {
        let num_parameters = r.get_uleb128()?;
        let mut params = Vec::with_capacity(num_parameters as usize);
        for _ in 0..num_parameters {
            let param_definition_type = r.get_uleb128()?;
            params.push(match param_definition_type {
                PARAMETER_DEFINITION_POLAR => {
                    ParamDefinitionVariant::Polar(PolarParamDefinition::read(r)?)
                }
                PARAMETER_DEFINITION_CART8 => {
                    ParamDefinitionVariant::Cart8(Cart8ParamDefinition::read(r)?)
                }
                PARAMETER_DEFINITION_CART16 => {
                    ParamDefinitionVariant::Cart16(Cart16ParamDefinition::read(r)?)
                }
                PARAMETER_DEFINITION_DUAL_POLAR => {
                    ParamDefinitionVariant::DualPolar(DualPolarParamDefinition::read(r)?)
                }
                PARAMETER_DEFINITION_DUAL_CART8 => {
                    ParamDefinitionVariant::DualCart8(DualCart8ParamDefinition::read(r)?)
                }
                PARAMETER_DEFINITION_DUAL_CART16 => {
                    ParamDefinitionVariant::DualCart16(DualCart16ParamDefinition::read(r)?)
                }
                param_type => ParamDefinitionVariant::Extended(ExtendedParamDefinition::read(
                    param_type, r,
                )?),
            });
        }

        let element_gain_offset_config = if element_gain_offset_flag {
            Some(ElementGainOffsetConfig::read(r)?)
        } else {
            None
        };
        Ok((params, element_gain_offset_config))
    }
}

/// One audio element's entry in a sub-mix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubMixAudioElement {
    pub audio_element_id: u32,
    /// One annotation per `count_label` language.
    pub localized_element_annotations: Vec<String>,
    pub rendering_config: RenderingConfig,
    pub element_mix_gain: MixGainParamDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixPresentationSubMix {
    pub audio_elements: Vec<SubMixAudioElement>,
    pub output_mix_gain: MixGainParamDefinition,
    pub layouts: Vec<MixPresentationLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub tag_name: String,
    pub tag_value: String,
}

/// Optional trailing tags block. Tags are freeform and may repeat, except
/// `content_language` which appears at most once and must look like an
/// ISO-639-2 code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MixPresentationTags {
    pub tags: Vec<Tag>,
}

impl MixPresentationTags {
    fn validate(&self) -> Result<()> {
        let content_language_tags: Vec<&Tag> = self
            .tags
            .iter()
            .filter(|tag| tag.tag_name == "content_language")
            .collect();
        if content_language_tags.len() > 1 {
            bail!(MixPresentationError::MultipleContentLanguageTags(
                content_language_tags.len()
            ));
        }
        for tag in content_language_tags {
            if tag.tag_value.len() != 3 || !tag.tag_value.is_ascii() {
                bail!(MixPresentationError::InvalidContentLanguage(
                    tag.tag_value.clone()
                ));
            }
        }
        Ok(())
    }

    fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;
        let num_tags: u8 = try_cast(self.tags.len())?;
        w.put_n(8, u32::from(num_tags))?;
        for tag in &self.tags {
            w.put_string(&tag.tag_name)?;
            w.put_string(&tag.tag_value)?;
        }
        Ok(())
    }

    fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let num_tags: u8 = r.get_n(8)?;
        let mut tags = Vec::with_capacity(usize::from(num_tags));
        for _ in 0..num_tags {
            tags.push(Tag {
                tag_name: r.get_string()?,
                tag_value: r.get_string()?,
            });
        }
        let block = Self { tags };
        block.validate()?;
        Ok(block)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixPresentationObu {
    pub header: ObuHeader,
    pub mix_presentation_id: u32,
    /// Languages of the annotations, unique, one per label.
    pub annotations_language: Vec<String>,
    pub localized_presentation_annotations: Vec<String>,
    pub sub_mixes: Vec<MixPresentationSubMix>,
    pub mix_presentation_tags: Option<MixPresentationTags>,
}

impl MixPresentationObu {
    fn count_label(&self) -> u32 {
        self.annotations_language.len() as u32
    }

    fn validate(&self) -> Result<()> {
        let count_label = self.count_label();
        validate_unique(self.annotations_language.iter(), "Annotation languages")?;
        validate_container_size_equal(
            "localized_presentation_annotations",
            self.localized_presentation_annotations.len(),
            count_label,
        )?;

        if self.sub_mixes.is_empty() {
            bail!(MixPresentationError::NoSubMixes);
        }

        let mut audio_element_ids = Vec::new();
        for sub_mix in &self.sub_mixes {
            if sub_mix.audio_elements.is_empty() {
                bail!(MixPresentationError::NoAudioElements);
            }
            for element in &sub_mix.audio_elements {
                if audio_element_ids.contains(&element.audio_element_id) {
                    bail!(MixPresentationError::DuplicateAudioElementId(
                        element.audio_element_id
                    ));
                }
                audio_element_ids.push(element.audio_element_id);

                validate_container_size_equal(
                    "localized_element_annotations",
                    element.localized_element_annotations.len(),
                    count_label,
                )?;
            }

            if !sub_mix
                .layouts
                .iter()
                .any(|layout| layout.loudness_layout.is_stereo())
            {
                bail!(MixPresentationError::MissingStereoLayout);
            }
        }
        Ok(())
    }

    /// Audio element ids referenced across all sub-mixes.
    pub fn audio_element_ids(&self) -> Vec<u32> {
        self.sub_mixes
            .iter()
            .flat_map(|sub_mix| {
                sub_mix
                    .audio_elements
                    .iter()
                    .map(|element| element.audio_element_id)
            })
            .collect()
    }

    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;

        write_obu(ObuType::MixPresentation, &self.header, w, |pw| {
            pw.put_uleb128(self.mix_presentation_id)?;
            pw.put_uleb128(self.count_label())?;

            for annotations_language in &self.annotations_language {
                pw.put_string(annotations_language)?;
            }
            for localized_presentation_annotation in &self.localized_presentation_annotations {
                pw.put_string(localized_presentation_annotation)?;
            }

            pw.put_uleb128(self.sub_mixes.len() as u32)?;
            for sub_mix in &self.sub_mixes {
                pw.put_uleb128(sub_mix.audio_elements.len() as u32)?;
                for element in &sub_mix.audio_elements {
                    pw.put_uleb128(element.audio_element_id)?;
                    for localized_element_annotation in &element.localized_element_annotations {
                        pw.put_string(localized_element_annotation)?;
                    }
                    element.rendering_config.write(pw)?;
                    element.element_mix_gain.write(pw)?;
                }

                sub_mix.output_mix_gain.write(pw)?;

                pw.put_uleb128(sub_mix.layouts.len() as u32)?;
                for layout in &sub_mix.layouts {
                    layout.loudness_layout.write(pw)?;
                    layout.loudness.write(pw)?;
                }
            }

            if let Some(tags) = &self.mix_presentation_tags {
                tags.write(pw)?;
            }
            Ok(())
        })
    }

    pub fn read(header: ObuHeader, payload_size: u64, r: &mut BsIoSliceReader) -> Result<Self> {
        let payload_end = r.position()? + (payload_size << 3);

        let mix_presentation_id = r.get_uleb128()?;
        let count_label = r.get_uleb128()?;

        let mut annotations_language = Vec::with_capacity(count_label as usize);
        for _ in 0..count_label {
            annotations_language.push(r.get_string()?);
        }
        let mut localized_presentation_annotations = Vec::with_capacity(count_label as usize);
        for _ in 0..count_label {
            localized_presentation_annotations.push(r.get_string()?);
        }

        let num_sub_mixes = r.get_uleb128()?;
        let mut sub_mixes = Vec::with_capacity(num_sub_mixes as usize);
        for _ in 0..num_sub_mixes {
            let num_audio_elements = r.get_uleb128()?;
            let mut audio_elements = Vec::with_capacity(num_audio_elements as usize);
            for _ in 0..num_audio_elements {
                let audio_element_id = r.get_uleb128()?;
                let mut localized_element_annotations =
                    Vec::with_capacity(count_label as usize);
                for _ in 0..count_label {
                    localized_element_annotations.push(r.get_string()?);
                }
                let rendering_config = RenderingConfig::read(r)?;
                let element_mix_gain = MixGainParamDefinition::read(r)?;
                audio_elements.push(SubMixAudioElement {
                    audio_element_id,
                    localized_element_annotations,
                    rendering_config,
                    element_mix_gain,
                });
            }

            let output_mix_gain = MixGainParamDefinition::read(r)?;

            let num_layouts = r.get_uleb128()?;
            let mut layouts = Vec::with_capacity(num_layouts as usize);
            for _ in 0..num_layouts {
                layouts.push(MixPresentationLayout {
                    loudness_layout: Layout::read(r)?,
                    loudness: LoudnessInfo::read(r)?,
                });
            }

            sub_mixes.push(MixPresentationSubMix {
                audio_elements,
                output_mix_gain,
                layouts,
            });
        }

        // A tags block is present exactly when payload bytes remain.
        let mix_presentation_tags = if r.position()? < payload_end {
            Some(MixPresentationTags::read(r)?)
        } else {
            None
        };

        let obu = Self {
            header,
            mix_presentation_id,
            annotations_language,
            localized_presentation_annotations,
            sub_mixes,
            mix_presentation_tags,
        };
        obu.validate()?;
        Ok(obu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::param_definition::{ParamDefinition, PolarPosition};

    fn mix_gain(parameter_id: u32) -> MixGainParamDefinition {
        MixGainParamDefinition {
            base: ParamDefinition {
                parameter_id,
                parameter_rate: 48000,
                param_definition_mode: 1,
                ..Default::default()
            },
            default_mix_gain: 0,
        }
    }

    fn stereo_layout() -> MixPresentationLayout {
        MixPresentationLayout {
            loudness_layout: Layout::SsConvention {
                sound_system: SOUND_SYSTEM_A_0_2_0,
                reserved: 0,
            },
            loudness: LoudnessInfo {
                info_type: 0,
                integrated_loudness: -5632, // -22 LUFS in Q7.8
                digital_peak: -256,
                ..Default::default()
            },
        }
    }

    fn minimal_obu() -> MixPresentationObu {
        MixPresentationObu {
            header: ObuHeader::default(),
            mix_presentation_id: 21,
            annotations_language: vec!["en-us".into()],
            localized_presentation_annotations: vec!["Default".into()],
            sub_mixes: vec![MixPresentationSubMix {
                audio_elements: vec![SubMixAudioElement {
                    audio_element_id: 11,
                    localized_element_annotations: vec!["bed".into()],
                    rendering_config: RenderingConfig::default(),
                    element_mix_gain: mix_gain(100),
                }],
                output_mix_gain: mix_gain(101),
                layouts: vec![stereo_layout()],
            }],
            mix_presentation_tags: None,
        }
    }

    fn round_trip(obu: &MixPresentationObu) -> MixPresentationObu {
        let mut w = BitstreamIoWriter::default();
        obu.write(&mut w).unwrap();
        let bytes = w.into_bytes().unwrap();

        let mut r = BsIoSliceReader::from_slice(&bytes);
        let (obu_type, header, payload_size) = ObuHeader::read(&mut r).unwrap();
        assert_eq!(obu_type, ObuType::MixPresentation);
        MixPresentationObu::read(header, payload_size, &mut r).unwrap()
    }

    #[test]
    fn minimal_round_trip() {
        let obu = minimal_obu();
        assert_eq!(round_trip(&obu), obu);
    }

    #[test]
    fn loudness_sections_round_trip() {
        let mut obu = minimal_obu();
        obu.sub_mixes[0].layouts[0].loudness = LoudnessInfo {
            info_type: INFO_TYPE_TRUE_PEAK | INFO_TYPE_ANCHORED_LOUDNESS | 0x04,
            integrated_loudness: -4096,
            digital_peak: -512,
            true_peak: -256,
            anchored_loudness: AnchoredLoudness {
                anchor_elements: vec![
                    AnchoredLoudnessElement {
                        anchor_element: 1,
                        anchored_loudness: -4000,
                    },
                    AnchoredLoudnessElement {
                        anchor_element: 2,
                        anchored_loudness: -4100,
                    },
                ],
            },
            layout_extension: LayoutExtension {
                info_type_bytes: vec![0xAB, 0xCD],
            },
        };
        assert_eq!(round_trip(&obu), obu);
    }

    #[test]
    fn duplicate_anchor_elements_are_rejected() {
        let mut obu = minimal_obu();
        obu.sub_mixes[0].layouts[0].loudness.info_type = INFO_TYPE_ANCHORED_LOUDNESS;
        obu.sub_mixes[0].layouts[0]
            .loudness
            .anchored_loudness
            .anchor_elements = vec![
            AnchoredLoudnessElement {
                anchor_element: 1,
                anchored_loudness: 0,
            },
            AnchoredLoudnessElement {
                anchor_element: 1,
                anchored_loudness: 1,
            },
        ];
        let mut w = BitstreamIoWriter::default();
        assert!(obu.write(&mut w).is_err());
    }

    #[test]
    fn rendering_config_with_positional_params_round_trips() {
        let mut obu = minimal_obu();
        obu.sub_mixes[0].audio_elements[0].rendering_config = RenderingConfig {
            headphones_rendering_mode: 1,
            binaural_filter_profile: 1,
            reserved: 0,
            rendering_config_param_definitions: vec![ParamDefinitionVariant::Polar(
                PolarParamDefinition {
                    base: ParamDefinition {
                        parameter_id: 300,
                        parameter_rate: 48000,
                        param_definition_mode: 1,
                        ..Default::default()
                    },
                    default_position: PolarPosition {
                        azimuth: -30,
                        elevation: 15,
                        distance: 3,
                    },
                },
            )],
            element_gain_offset_config: Some(ElementGainOffsetConfig::Range {
                default_element_gain_offset: 0,
                min_element_gain_offset: -256,
                max_element_gain_offset: 256,
            }),
            rendering_config_extension_bytes: vec![0x7F],
        };
        assert_eq!(round_trip(&obu), obu);
    }

    #[test]
    fn gain_offset_range_is_validated() {
        let bad = ElementGainOffsetConfig::Range {
            default_element_gain_offset: 512,
            min_element_gain_offset: -256,
            max_element_gain_offset: 256,
        };
        let mut w = BitstreamIoWriter::default();
        assert!(bad.write(&mut w).is_err());
    }

    #[test]
    fn tags_round_trip_and_content_language_rules() {
        let mut obu = minimal_obu();
        obu.mix_presentation_tags = Some(MixPresentationTags {
            tags: vec![
                Tag {
                    tag_name: "content_language".into(),
                    tag_value: "eng".into(),
                },
                Tag {
                    tag_name: "artist".into(),
                    tag_value: "someone".into(),
                },
                Tag {
                    tag_name: "artist".into(),
                    tag_value: "someone else".into(),
                },
            ],
        });
        assert_eq!(round_trip(&obu), obu);

        let mut bad = obu.clone();
        bad.mix_presentation_tags
            .as_mut()
            .unwrap()
            .tags
            .push(Tag {
                tag_name: "content_language".into(),
                tag_value: "deu".into(),
            });
        let mut w = BitstreamIoWriter::default();
        assert!(bad.write(&mut w).is_err());

        let mut bad = obu.clone();
        bad.mix_presentation_tags.as_mut().unwrap().tags[0].tag_value = "english".into();
        let mut w = BitstreamIoWriter::default();
        assert!(bad.write(&mut w).is_err());
    }

    #[test]
    fn structural_rules_are_enforced() {
        let mut w = BitstreamIoWriter::default();

        let mut bad = minimal_obu();
        bad.sub_mixes.clear();
        assert!(bad.write(&mut w).is_err());

        let mut bad = minimal_obu();
        bad.sub_mixes[0].audio_elements.clear();
        assert!(bad.write(&mut w).is_err());

        // A second sub-mix referencing the same audio element id.
        let mut bad = minimal_obu();
        let duplicate = bad.sub_mixes[0].clone();
        bad.sub_mixes.push(duplicate);
        assert!(bad.write(&mut w).is_err());

        // No stereo layout.
        let mut bad = minimal_obu();
        bad.sub_mixes[0].layouts[0].loudness_layout = Layout::SsConvention {
            sound_system: 1,
            reserved: 0,
        };
        assert!(bad.write(&mut w).is_err());

        // Annotation languages must be unique.
        let mut bad = minimal_obu();
        bad.annotations_language = vec!["en-us".into(), "en-us".into()];
        bad.localized_presentation_annotations = vec!["a".into(), "b".into()];
        bad.sub_mixes[0].audio_elements[0].localized_element_annotations =
            vec!["a".into(), "b".into()];
        assert!(bad.write(&mut w).is_err());
    }

    #[test]
    fn binaural_layout_round_trips() {
        let mut obu = minimal_obu();
        obu.sub_mixes[0].layouts.push(MixPresentationLayout {
            loudness_layout: Layout::ReservedOrBinaural {
                layout_type: LAYOUT_TYPE_BINAURAL,
                reserved: 0,
            },
            loudness: LoudnessInfo::default(),
        });
        let read = round_trip(&obu);
        assert_eq!(read, obu);
        assert_eq!(read.sub_mixes[0].layouts[1].loudness_layout.num_channels().unwrap(), 2);
    }
}
