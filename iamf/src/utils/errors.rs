#[derive(thiserror::Error, Debug)]
pub enum BitIoError {
    #[error("leb128 uses more than 8 bytes but the continuation bit is still set")]
    Leb128TooLong,

    #[error("Decoded leb128 does not fit into 32 bits: value = {0:#X}")]
    Leb128Overflow(u64),

    #[error("leb128 value {value:#X} does not fit into a fixed {size}-byte encoding")]
    Leb128FixedOverflow { value: u32, size: u8 },

    #[error("ISO 14496-1 expandable size exceeds 2^28 - 1")]
    ExpandableSizeOverflow,

    #[error("Expandable size field uses more than 4 bytes")]
    ExpandableSizeTooLong,

    #[error("String and its NUL terminator must fit in {max} bytes, got {actual}")]
    StringTooLong { max: usize, actual: usize },

    #[error("No NUL terminator within the first {0} bytes of a string")]
    StringNotTerminated(usize),

    #[error("Byte-aligned access at bit offset {0}")]
    UnalignedByteAccess(u64),

    #[error("Writer finished with a partial byte at bit offset {0}")]
    UnalignedFinish(u64),
}

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("obu_redundant_copy must be 0 for {0}")]
    RedundantCopyForbidden(&'static str),

    #[error("obu_trimming_status_flag must be 0 for {0}")]
    TrimmingForbidden(&'static str),

    #[error("OBU payload of {0} bytes does not fit into obu_size")]
    PayloadTooLarge(usize),

    #[error("obu_size = {obu_size} is smaller than its {consumed} bytes of header fields")]
    SizeSmallerThanHeaderFields { obu_size: u32, consumed: u64 },

    #[error("OBU payload ended at bit {actual}, expected bit {expected}")]
    PayloadSizeMismatch { expected: u64, actual: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum SequenceHeaderError {
    #[error("Invalid ia_code. Read {0:#010X}, expected 0x69616D66 (\"iamf\")")]
    InvalidIaCode(u32),

    #[error("Cannot write reserved profile value {0}")]
    ReservedProfile(u8),
}

#[derive(thiserror::Error, Debug)]
pub enum CodecConfigError {
    #[error("num_samples_per_frame must not be zero")]
    ZeroSamplesPerFrame,

    #[error("Unknown codec_id {0:?}")]
    UnknownCodecId([u8; 4]),

    #[error("Invalid audio_roll_distance. Read {actual}, expected {expected}")]
    InvalidAudioRollDistance { expected: i16, actual: i16 },

    #[error("Invalid LPCM sample_size. Read {0}, expected 16, 24 or 32")]
    InvalidSampleSize(u8),

    #[error("Invalid LPCM sample_rate. Read {0}")]
    InvalidSampleRate(u32),

    #[error("Only sample_format_flags 0 and 1 are defined. Read {0}")]
    InvalidSampleFormatFlags(u8),

    #[error("Opus version 0 is invalid")]
    ZeroOpusVersion,

    #[error("Unsupported Opus major version {0}")]
    UnsupportedOpusMajorVersion(u8),

    #[error("Opus output_channel_count must be 2. Read {0}")]
    InvalidOpusChannelCount(u8),

    #[error("Opus output_gain must be 0. Read {0}")]
    NonZeroOutputGain(i16),

    #[error("Opus mapping_family must be 0. Read {0}")]
    NonZeroMappingFamily(u8),

    #[error("Invalid descriptor tag. Read {actual}, expected {expected}")]
    InvalidDescriptorTag { expected: u8, actual: u8 },

    #[error("object_type_indication must be 0x40. Read {0:#04X}")]
    InvalidObjectTypeIndication(u8),

    #[error("stream_type must be 5. Read {0}")]
    InvalidStreamType(u8),

    #[error("upstream must be 0 and reserved must be 1")]
    InvalidDescriptorFlags,

    #[error("audio_object_type must be 2 (AAC-LC). Read {0}")]
    InvalidAudioObjectType(u8),

    #[error("Reserved sample_frequency_index {0}")]
    ReservedSampleFrequencyIndex(u8),

    #[error("No sample rate defined for sample_frequency_index {0}")]
    UnknownSampleFrequencyIndex(u8),

    #[error("ga_specific_config flags must all be 0")]
    InvalidGaSpecificConfig,

    #[error("The first FLAC metadata block must be a STREAMINFO block")]
    StreamInfoNotFirst,

    #[error("Exactly the final FLAC metadata block must set last_metadata_block_flag")]
    MisplacedLastMetadataBlock,

    #[error("FLAC {field} must equal num_samples_per_frame = {expected}. Read {actual}")]
    FlacBlockSizeMismatch {
        field: &'static str,
        expected: u32,
        actual: u16,
    },

    #[error("FLAC sample_rate must be in [1, 655350]. Read {0}")]
    FlacSampleRateOutOfRange(u32),

    #[error("FLAC streams must carry 2 channels, read channels - 1 = {0}")]
    FlacChannelCountMismatch(u8),

    #[error("FLAC bits_per_sample - 1 must be in [15, 31]. Read {0}")]
    FlacBitsPerSampleOutOfRange(u8),

    #[error("FLAC {0} must be written as zero")]
    FlacNonZeroEncoderField(&'static str),

    #[error("FLAC metadata block promised {expected} bytes but used {actual} bits")]
    FlacBlockLengthMismatch { expected: u32, actual: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum AudioElementError {
    #[error("Reserved audio_element_type {0}")]
    ReservedElementType(u8),

    #[error("num_layers must be in [1, 6]. Read {0}")]
    InvalidLayerCount(u32),

    #[error("Duplicate substream id {0} within an audio element")]
    DuplicateSubstreamId(u32),

    #[error("Unsupported ambisonics_mode {0}")]
    UnsupportedAmbisonicsMode(u8),

    #[error("Ambisonics channel_mapping has {actual} entries, expected {expected}")]
    ChannelMappingSizeMismatch { expected: usize, actual: usize },

    #[error("Demixing matrix has {actual} entries, expected {expected}")]
    DemixingMatrixSizeMismatch { expected: usize, actual: usize },

    #[error("Audio element parameter of type {0} is not allowed here")]
    UnexpectedParameterType(u8),
}

#[derive(thiserror::Error, Debug)]
pub enum MixPresentationError {
    #[error("num_sub_mixes must not be zero")]
    NoSubMixes,

    #[error("num_audio_elements must not be zero in a sub-mix")]
    NoAudioElements,

    #[error("Every sub-mix must contain a stereo loudspeaker layout")]
    MissingStereoLayout,

    #[error("Audio element id {0} appears in more than one sub-mix entry")]
    DuplicateAudioElementId(u32),

    #[error("Duplicate annotations_language \"{0}\"")]
    DuplicateAnnotationLanguage(String),

    #[error("annotations count {actual} does not match count_label {expected}")]
    AnnotationCountMismatch { expected: u32, actual: usize },

    #[error("Duplicate anchor_element {0} in anchored loudness")]
    DuplicateAnchorElement(u8),

    #[error("At most one content_language tag is allowed, found {0}")]
    MultipleContentLanguageTags(usize),

    #[error("content_language value \"{0}\" is not a 3-character ISO-639-2 code")]
    InvalidContentLanguage(String),

    #[error("rendering_config_extension_size {size} is smaller than its parameter payload")]
    RenderingExtensionTooSmall { size: u32 },

    #[error("element_gain_offset range is invalid: default {default} outside [{min}, {max}]")]
    GainOffsetOutsideRange { default: i16, min: i16, max: i16 },

    #[error("Extension element_gain_offset_config_type {0} collides with a defined type")]
    ReservedGainOffsetType(u8),
}

#[derive(thiserror::Error, Debug)]
pub enum ParamError {
    #[error("parameter_rate must not be zero for parameter_id = {0}")]
    ZeroParameterRate(u32),

    #[error("duration must not be zero for parameter_id = {0}")]
    ZeroDuration(u32),

    #[error("constant_subblock_duration {csd} exceeds duration {duration} for parameter_id = {id}")]
    ConstantSubblockTooLong { id: u32, csd: u32, duration: u32 },

    #[error("subblock_durations[{0}] must not be zero")]
    ZeroSubblockDuration(usize),

    #[error("Subblock durations sum to {actual}, expected duration {expected}")]
    SubblockSumMismatch { expected: u32, actual: u32 },

    #[error("num_subblocks = {expected} but {actual} subblock durations are present")]
    SubblockCountMismatch { expected: u32, actual: usize },

    #[error(
        "Demixing and recon gain parameters require mode 0 with a single implicit subblock, parameter_id = {0}"
    )]
    SingleSubblockRequired(u32),

    #[error("Unknown animation_type {0}")]
    UnknownAnimationType(u32),

    #[error("Reserved dmixp_mode {0}")]
    ReservedDmixPMode(u8),

    #[error("w_idx {0} has no w value")]
    UnknownWIdx(i32),

    #[error("Cannot interpolate at time {target} outside [{start}, {end}]")]
    InterpolationOutOfRange { start: i64, end: i64, target: i64 },

    #[error("Subblock index {index} exceeds num_subblocks {num_subblocks}")]
    SubblockIndexOutOfRange { index: u32, num_subblocks: u32 },

    #[error("No parameter definition known for parameter_id = {0}")]
    UnknownParameterId(u32),

    #[error("recon gain data carries {actual} layers, audio element defines {expected}")]
    ReconGainLayerMismatch { expected: usize, actual: usize },

    #[error("Recon gain bitmask {0:#05X} uses bits beyond the 12 canonical channels")]
    ReconGainMaskOverflow(u32),

    #[error("Parameter block payload for parameter_id = {0} is not a mix gain")]
    NotAMixGain(u32),

    #[error("Parameter data does not match the definition type for parameter_id = {0}")]
    DataTypeMismatch(u32),
}

#[derive(thiserror::Error, Debug)]
pub enum TemporalUnitError {
    #[error("Every temporal unit must have an audio frame")]
    NoAudioFrames,

    #[error("Cumulative trim {trim} exceeds num_samples_per_frame {samples_per_frame}")]
    TrimExceedsFrame { trim: u64, samples_per_frame: u32 },

    #[error("Duplicate substream id {0} within a temporal unit")]
    DuplicateSubstreamId(u32),

    #[error("Duplicate parameter id {0} within a temporal unit")]
    DuplicateParameterId(u32),

    #[error("{field} of {actual} does not match the temporal unit value {expected}")]
    StatisticMismatch {
        field: &'static str,
        expected: i64,
        actual: i64,
    },

    #[error("Parameter block [{start}, {end}) does not cover the temporal unit [{tu_start}, {tu_end})")]
    ParameterSpanMismatch {
        start: i64,
        end: i64,
        tu_start: i64,
        tu_end: i64,
    },

    #[error("Arbitrary OBU insertion_tick {tick} does not match the temporal unit start {start}")]
    InsertionTickMismatch { tick: i64, start: i64 },

    #[error("Audio frames within a temporal unit must share one duration")]
    DurationMismatch,
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("push_frame called after flush")]
    PushAfterFlush,

    #[error("flush called twice")]
    DoubleFlush,

    #[error("Frame carries {actual} samples, more than max_input_samples_per_frame {max}")]
    FrameTooLong { max: usize, actual: usize },

    #[error("Frame carries {actual} channels, expected {expected}")]
    ChannelCountMismatch { expected: usize, actual: usize },

    #[error("No codec config with id {0}")]
    UnknownCodecConfigId(u32),

    #[error("No audio element with id {0}")]
    UnknownAudioElementId(u32),

    #[error("No substream with id {0}")]
    UnknownSubstreamId(u32),

    #[error("Substream {0} already received a frame for this temporal unit")]
    SubstreamAlreadyPushed(u32),

    #[error("Encoder is finalized")]
    Finalized,
}

#[derive(thiserror::Error, Debug)]
pub enum NumericError {
    #[error("Value {0} cannot be cast to the target width")]
    CastOutOfRange(i128),

    #[error("Sum {0} + {1} overflows a u32")]
    AdditionOverflow(u32, u32),

    #[error("Value {0} cannot be represented in Q7.8 format")]
    NotQ7_8(f32),

    #[error("Value {0} cannot be represented in Q0.8 format")]
    NotQ0_8(f32),

    #[error("Cannot normalize a non-finite sample")]
    NonFiniteSample,

    #[error("PCM sample_size must be 8, 16, 24 or 32 bits. Got {0}")]
    InvalidPcmSampleSize(u8),
}
