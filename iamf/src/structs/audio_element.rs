//! Audio Element OBU.
//!
//! Binds a set of substreams to a codec config, carries the element's
//! parameter definitions, and describes its topology: scalable channel
//! layers for channel-based elements, mono or projection configs for
//! ambisonics.

use anyhow::{Result, bail};

use crate::structs::header::{ObuHeader, ObuType, write_obu};
use crate::structs::param_definition::{
    DemixingParamDefinition, ExtendedParamDefinition, PARAMETER_DEFINITION_DEMIXING,
    PARAMETER_DEFINITION_RECON_GAIN, ParamDefinitionVariant, ReconGainParamDefinition,
};
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::AudioElementError;
use crate::utils::validate::validate_unique;

pub const AUDIO_ELEMENT_CHANNEL_BASED: u8 = 0;
pub const AUDIO_ELEMENT_SCENE_BASED: u8 = 1;

pub const AMBISONICS_MODE_MONO: u8 = 0;
pub const AMBISONICS_MODE_PROJECTION: u8 = 1;

pub const MAX_CHANNEL_LAYERS: u32 = 6;

/// Optional per-layer output gain section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerOutputGain {
    /// 6-bit flags selecting the channels the gain applies to.
    pub output_gain_flags: u8,
    pub reserved: u8,
    /// Q7.8.
    pub output_gain: i16,
}

/// One layer of a scalable channel layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelAudioLayerConfig {
    /// 4-bit loudspeaker layout code.
    pub loudspeaker_layout: u8,
    pub recon_gain_is_present_flag: bool,
    pub reserved_a: u8,
    pub substream_count: u8,
    pub coupled_substream_count: u8,
    pub output_gain: Option<LayerOutputGain>,
}

impl ChannelAudioLayerConfig {
    fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        w.put_n(4, u32::from(self.loudspeaker_layout))?;
        w.put(self.output_gain.is_some())?;
        w.put(self.recon_gain_is_present_flag)?;
        w.put_n(2, u32::from(self.reserved_a))?;
        w.put_n(8, u32::from(self.substream_count))?;
        w.put_n(8, u32::from(self.coupled_substream_count))?;
        if let Some(output_gain) = &self.output_gain {
            w.put_n(6, u32::from(output_gain.output_gain_flags))?;
            w.put_n(2, u32::from(output_gain.reserved))?;
            w.put_s(16, i32::from(output_gain.output_gain))?;
        }
        Ok(())
    }

    fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let loudspeaker_layout = r.get_n(4)?;
        let output_gain_is_present_flag = r.get()?;
        let recon_gain_is_present_flag = r.get()?;
        let reserved_a = r.get_n(2)?;
        let substream_count = r.get_n(8)?;
        let coupled_substream_count = r.get_n(8)?;
        let output_gain = if output_gain_is_present_flag {
            Some(LayerOutputGain {
                output_gain_flags: r.get_n(6)?,
                reserved: r.get_n(2)?,
                output_gain: r.get_s(16)?,
            })
        } else {
            None
        };

        Ok(Self {
            loudspeaker_layout,
            recon_gain_is_present_flag,
            reserved_a,
            substream_count,
            coupled_substream_count,
            output_gain,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScalableChannelLayoutConfig {
    pub channel_audio_layer_configs: Vec<ChannelAudioLayerConfig>,
}

impl ScalableChannelLayoutConfig {
    fn validate(&self) -> Result<()> {
        let num_layers = self.channel_audio_layer_configs.len() as u32;
        if num_layers == 0 || num_layers > MAX_CHANNEL_LAYERS {
            bail!(AudioElementError::InvalidLayerCount(num_layers));
        }
        Ok(())
    }

    fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;
        w.put_uleb128(self.channel_audio_layer_configs.len() as u32)?;
        for layer in &self.channel_audio_layer_configs {
            layer.write(w)?;
        }
        Ok(())
    }

    fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let num_layers = r.get_uleb128()?;
        if num_layers == 0 || num_layers > MAX_CHANNEL_LAYERS {
            bail!(AudioElementError::InvalidLayerCount(num_layers));
        }
        let mut channel_audio_layer_configs = Vec::with_capacity(num_layers as usize);
        for _ in 0..num_layers {
            channel_audio_layer_configs.push(ChannelAudioLayerConfig::read(r)?);
        }
        Ok(Self {
            channel_audio_layer_configs,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbisonicsMonoConfig {
    pub output_channel_count: u8,
    pub substream_count: u8,
    /// One entry per output channel, naming its source substream.
    pub channel_mapping: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbisonicsProjectionConfig {
    pub output_channel_count: u8,
    pub substream_count: u8,
    /// Column-major, `substream_count x output_channel_count`, Q15.
    pub demixing_matrix: Vec<i16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmbisonicsConfig {
    Mono(AmbisonicsMonoConfig),
    Projection(AmbisonicsProjectionConfig),
}

impl AmbisonicsConfig {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Mono(mono) => {
                if mono.channel_mapping.len() != usize::from(mono.output_channel_count) {
                    bail!(AudioElementError::ChannelMappingSizeMismatch {
                        expected: usize::from(mono.output_channel_count),
                        actual: mono.channel_mapping.len(),
                    });
                }
            }
            Self::Projection(projection) => {
                let expected = usize::from(projection.substream_count)
                    * usize::from(projection.output_channel_count);
                if projection.demixing_matrix.len() != expected {
                    bail!(AudioElementError::DemixingMatrixSizeMismatch {
                        expected,
                        actual: projection.demixing_matrix.len(),
                    });
                }
            }
        }
        Ok(())
    }

    fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;
        match self {
            Self::Mono(mono) => {
                w.put_n(8, u32::from(AMBISONICS_MODE_MONO))?;
                w.put_n(8, u32::from(mono.output_channel_count))?;
                w.put_n(8, u32::from(mono.substream_count))?;
                for mapping in &mono.channel_mapping {
                    w.put_n(8, u32::from(*mapping))?;
                }
            }
            Self::Projection(projection) => {
                w.put_n(8, u32::from(AMBISONICS_MODE_PROJECTION))?;
                w.put_n(8, u32::from(projection.output_channel_count))?;
                w.put_n(8, u32::from(projection.substream_count))?;
                for coefficient in &projection.demixing_matrix {
                    w.put_s(16, i32::from(*coefficient))?;
                }
            }
        }
        Ok(())
    }

    fn read(r: &mut BsIoSliceReader) -> Result<Self> {
        let ambisonics_mode: u8 = r.get_n(8)?;
        let config = match ambisonics_mode {
            AMBISONICS_MODE_MONO => {
                let output_channel_count: u8 = r.get_n(8)?;
                let substream_count = r.get_n(8)?;
                let mut channel_mapping = Vec::with_capacity(usize::from(output_channel_count));
                for _ in 0..output_channel_count {
                    channel_mapping.push(r.get_n(8)?);
                }
                Self::Mono(AmbisonicsMonoConfig {
                    output_channel_count,
                    substream_count,
                    channel_mapping,
                })
            }
            AMBISONICS_MODE_PROJECTION => {
                let output_channel_count: u8 = r.get_n(8)?;
                let substream_count: u8 = r.get_n(8)?;
                let coefficients =
                    usize::from(output_channel_count) * usize::from(substream_count);
                let mut demixing_matrix = Vec::with_capacity(coefficients);
                for _ in 0..coefficients {
                    demixing_matrix.push(r.get_s(16)?);
                }
                Self::Projection(AmbisonicsProjectionConfig {
                    output_channel_count,
                    substream_count,
                    demixing_matrix,
                })
            }
            v => bail!(AudioElementError::UnsupportedAmbisonicsMode(v)),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Per-type element config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioElementConfig {
    Channel(ScalableChannelLayoutConfig),
    Ambisonics(AmbisonicsConfig),
}

impl AudioElementConfig {
    pub fn audio_element_type(&self) -> u8 {
        match self {
            Self::Channel(_) => AUDIO_ELEMENT_CHANNEL_BASED,
            Self::Ambisonics(_) => AUDIO_ELEMENT_SCENE_BASED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioElementObu {
    pub header: ObuHeader,
    pub audio_element_id: u32,
    pub reserved: u8,
    pub codec_config_id: u32,
    pub audio_substream_ids: Vec<u32>,
    pub audio_element_params: Vec<ParamDefinitionVariant>,
    pub config: AudioElementConfig,
}

impl AudioElementObu {
    fn validate(&self) -> Result<()> {
        validate_unique(self.audio_substream_ids.iter(), "Audio substream IDs")?;

        for param in &self.audio_element_params {
            match param {
                ParamDefinitionVariant::Demixing(_)
                | ParamDefinitionVariant::ReconGain(_)
                | ParamDefinitionVariant::Extended(_) => {}
                other => bail!(AudioElementError::UnexpectedParameterType(
                    other.param_definition_type() as u8
                )),
            }
        }
        Ok(())
    }

    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        self.validate()?;

        write_obu(ObuType::AudioElement, &self.header, w, |pw| {
            pw.put_uleb128(self.audio_element_id)?;
            pw.put_n(3, u32::from(self.config.audio_element_type()))?;
            pw.put_n(5, u32::from(self.reserved))?;
            pw.put_uleb128(self.codec_config_id)?;

            pw.put_uleb128(self.audio_substream_ids.len() as u32)?;
            for substream_id in &self.audio_substream_ids {
                pw.put_uleb128(*substream_id)?;
            }

            pw.put_uleb128(self.audio_element_params.len() as u32)?;
            for param in &self.audio_element_params {
                pw.put_n(8, param.param_definition_type())?;
                param.write(pw)?;
            }

            match &self.config {
                AudioElementConfig::Channel(config) => config.write(pw),
                AudioElementConfig::Ambisonics(config) => config.write(pw),
            }
        })
    }

    pub fn read(header: ObuHeader, r: &mut BsIoSliceReader) -> Result<Self> {
        let audio_element_id = r.get_uleb128()?;
        let audio_element_type: u8 = r.get_n(3)?;
        let reserved = r.get_n(5)?;
        let codec_config_id = r.get_uleb128()?;

        let num_substreams = r.get_uleb128()?;
        let mut audio_substream_ids = Vec::with_capacity(num_substreams as usize);
        for _ in 0..num_substreams {
            audio_substream_ids.push(r.get_uleb128()?);
        }

        let num_parameters = r.get_uleb128()?;
        let mut audio_element_params = Vec::with_capacity(num_parameters as usize);
        for _ in 0..num_parameters {
            let param_definition_type: u8 = r.get_n(8)?;
            audio_element_params.push(match u32::from(param_definition_type) {
                PARAMETER_DEFINITION_DEMIXING => {
                    ParamDefinitionVariant::Demixing(DemixingParamDefinition::read(r)?)
                }
                PARAMETER_DEFINITION_RECON_GAIN => {
                    ParamDefinitionVariant::ReconGain(ReconGainParamDefinition::read(r)?)
                }
                // Mix gain and positional parameters are never bound directly
                // to an audio element; everything else passes through as an
                // extension.
                param_type if param_type > PARAMETER_DEFINITION_RECON_GAIN => {
                    ParamDefinitionVariant::Extended(ExtendedParamDefinition::read(param_type, r)?)
                }
                param_type => bail!(AudioElementError::UnexpectedParameterType(param_type as u8)),
            });
        }

        let config = match audio_element_type {
            AUDIO_ELEMENT_CHANNEL_BASED => {
                AudioElementConfig::Channel(ScalableChannelLayoutConfig::read(r)?)
            }
            AUDIO_ELEMENT_SCENE_BASED => {
                AudioElementConfig::Ambisonics(AmbisonicsConfig::read(r)?)
            }
            v => bail!(AudioElementError::ReservedElementType(v)),
        };

        let obu = Self {
            header,
            audio_element_id,
            reserved,
            codec_config_id,
            audio_substream_ids,
            audio_element_params,
            config,
        };
        obu.validate()?;
        Ok(obu)
    }

    /// Per-layer recon gain flags, used to size recon gain parameter data.
    /// Empty for ambisonics elements.
    pub fn recon_gain_is_present_flags(&self) -> Vec<bool> {
        match &self.config {
            AudioElementConfig::Channel(config) => config
                .channel_audio_layer_configs
                .iter()
                .map(|layer| layer.recon_gain_is_present_flag)
                .collect(),
            AudioElementConfig::Ambisonics(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::param_definition::{DefaultDemixingInfo, ParamDefinition};

    fn demixing_param(parameter_id: u32) -> ParamDefinitionVariant {
        ParamDefinitionVariant::Demixing(DemixingParamDefinition {
            base: ParamDefinition {
                parameter_id,
                parameter_rate: 48000,
                param_definition_mode: 0,
                duration: 1024,
                constant_subblock_duration: 1024,
                ..Default::default()
            },
            default_demixing_info: DefaultDemixingInfo::default(),
        })
    }

    fn channel_element() -> AudioElementObu {
        AudioElementObu {
            header: ObuHeader::default(),
            audio_element_id: 11,
            reserved: 0,
            codec_config_id: 0,
            audio_substream_ids: vec![0, 1, 2, 3],
            audio_element_params: vec![demixing_param(5)],
            config: AudioElementConfig::Channel(ScalableChannelLayoutConfig {
                channel_audio_layer_configs: vec![
                    ChannelAudioLayerConfig {
                        loudspeaker_layout: 1,
                        recon_gain_is_present_flag: false,
                        substream_count: 1,
                        coupled_substream_count: 1,
                        ..Default::default()
                    },
                    ChannelAudioLayerConfig {
                        loudspeaker_layout: 2,
                        recon_gain_is_present_flag: true,
                        substream_count: 3,
                        coupled_substream_count: 1,
                        output_gain: Some(LayerOutputGain {
                            output_gain_flags: 0b100000,
                            reserved: 0,
                            output_gain: -0x0100,
                        }),
                        ..Default::default()
                    },
                ],
            }),
        }
    }

    fn round_trip(obu: &AudioElementObu) -> AudioElementObu {
        let mut w = BitstreamIoWriter::default();
        obu.write(&mut w).unwrap();
        let bytes = w.into_bytes().unwrap();

        let mut r = BsIoSliceReader::from_slice(&bytes);
        let (obu_type, header, _) = ObuHeader::read(&mut r).unwrap();
        assert_eq!(obu_type, ObuType::AudioElement);
        AudioElementObu::read(header, &mut r).unwrap()
    }

    #[test]
    fn channel_based_round_trip() {
        let obu = channel_element();
        let read = round_trip(&obu);
        assert_eq!(read, obu);
        assert_eq!(read.recon_gain_is_present_flags(), [false, true]);
    }

    #[test]
    fn ambisonics_mono_round_trip() {
        let obu = AudioElementObu {
            header: ObuHeader::default(),
            audio_element_id: 2,
            reserved: 0,
            codec_config_id: 1,
            audio_substream_ids: vec![10, 11, 12, 13],
            audio_element_params: vec![],
            config: AudioElementConfig::Ambisonics(AmbisonicsConfig::Mono(AmbisonicsMonoConfig {
                output_channel_count: 4,
                substream_count: 4,
                channel_mapping: vec![0, 1, 2, 3],
            })),
        };
        assert_eq!(round_trip(&obu), obu);
        assert!(obu.recon_gain_is_present_flags().is_empty());
    }

    #[test]
    fn ambisonics_projection_round_trip() {
        let obu = AudioElementObu {
            header: ObuHeader::default(),
            audio_element_id: 3,
            reserved: 0,
            codec_config_id: 1,
            audio_substream_ids: vec![20, 21],
            audio_element_params: vec![],
            config: AudioElementConfig::Ambisonics(AmbisonicsConfig::Projection(
                AmbisonicsProjectionConfig {
                    output_channel_count: 4,
                    substream_count: 2,
                    demixing_matrix: vec![0x7FFF, 0, 0, 0x7FFF, -0x8000, 0, 0, 0x1000],
                },
            )),
        };
        assert_eq!(round_trip(&obu), obu);
    }

    #[test]
    fn duplicate_substream_ids_are_rejected() {
        let mut obu = channel_element();
        obu.audio_substream_ids = vec![0, 1, 1];
        let mut w = BitstreamIoWriter::default();
        assert!(obu.write(&mut w).is_err());
    }

    #[test]
    fn layer_count_limits() {
        let mut obu = channel_element();
        if let AudioElementConfig::Channel(config) = &mut obu.config {
            config.channel_audio_layer_configs.clear();
        }
        let mut w = BitstreamIoWriter::default();
        assert!(obu.write(&mut w).is_err());

        let mut obu = channel_element();
        if let AudioElementConfig::Channel(config) = &mut obu.config {
            let layer = config.channel_audio_layer_configs[0].clone();
            config.channel_audio_layer_configs = vec![layer; 7];
        }
        let mut w = BitstreamIoWriter::default();
        assert!(obu.write(&mut w).is_err());
    }

    #[test]
    fn mismatched_projection_matrix_is_rejected() {
        let obu = AudioElementObu {
            header: ObuHeader::default(),
            audio_element_id: 3,
            reserved: 0,
            codec_config_id: 1,
            audio_substream_ids: vec![20, 21],
            audio_element_params: vec![],
            config: AudioElementConfig::Ambisonics(AmbisonicsConfig::Projection(
                AmbisonicsProjectionConfig {
                    output_channel_count: 4,
                    substream_count: 2,
                    demixing_matrix: vec![0; 7],
                },
            )),
        };
        let mut w = BitstreamIoWriter::default();
        assert!(obu.write(&mut w).is_err());
    }

    #[test]
    fn unknown_element_parameter_round_trips_as_extension() {
        let mut obu = channel_element();
        obu.audio_element_params = vec![ParamDefinitionVariant::Extended(
            ExtendedParamDefinition {
                param_definition_type: 200,
                param_definition_bytes: vec![9, 8, 7],
            },
        )];
        assert_eq!(round_trip(&obu), obu);
    }
}
