//! Numeric conversions shared by the OBU codec and the sample pipeline.
//!
//! Covers the fixed-point formats used on the wire (Q7.8 and Q0.8), checked
//! integer casts, PCM packing, and the normalized-float sample conversions.
//! Conversions into the internal 32-bit sample representation clip rather
//! than wrap.

use crate::utils::errors::NumericError;

/// Casts between integer widths, failing when the value does not fit.
pub fn try_cast<T, U>(value: T) -> Result<U, NumericError>
where
    T: Copy + TryInto<i128>,
    U: TryFrom<T>,
{
    U::try_from(value)
        .map_err(|_| NumericError::CastOutOfRange(value.try_into().unwrap_or(i128::MAX)))
}

/// Sums two `u32` values, failing on overflow.
pub fn add_u32_checked(x_1: u32, x_2: u32) -> Result<u32, NumericError> {
    x_1.checked_add(x_2)
        .ok_or(NumericError::AdditionOverflow(x_1, x_2))
}

/// Converts a float to Q7.8 format, flooring to the nearest representable
/// value. Valid inputs are in [-128, 128 - 1/256].
pub fn q7_8_from_float(value: f32) -> Result<i16, NumericError> {
    if value.is_nan() || value < -128.0 || (128.0 - 1.0 / 256.0) < value {
        return Err(NumericError::NotQ7_8(value));
    }
    Ok((f64::from(value) * 256.0).floor() as i16)
}

/// Converts Q7.8 to float. Lossless.
pub fn q7_8_to_float(value: i16) -> f32 {
    f32::from(value) / 256.0
}

/// Converts a float to Q0.8 format, flooring. Valid inputs are in
/// [0, 1 - 1/256].
pub fn q0_8_from_float(value: f32) -> Result<u8, NumericError> {
    if value.is_nan() || value < 0.0 || 1.0 <= value {
        return Err(NumericError::NotQ0_8(value));
    }
    Ok((f64::from(value) * 256.0).floor() as u8)
}

/// Converts Q0.8 to float. Lossless.
pub fn q0_8_to_float(value: u8) -> f32 {
    f32::from(value) / 256.0
}

/// Maps an `i32` sample onto [-1.0, 1.0) by dividing by 2^31.
pub fn int32_to_normalized_float(value: i32) -> f64 {
    f64::from(value) / 2147483648.0
}

/// Maps a normalized float onto the full `i32` range, clamping the input to
/// [-1.0, 1.0] and clipping the scaled result.
pub fn normalized_float_to_int32(value: f64) -> Result<i32, NumericError> {
    if !value.is_finite() {
        return Err(NumericError::NonFiniteSample);
    }
    let scaled = value.clamp(-1.0, 1.0) * 2147483648.0;
    Ok(if scaled >= f64::from(i32::MAX) {
        i32::MAX
    } else if scaled <= f64::from(i32::MIN) {
        i32::MIN
    } else {
        scaled as i32
    })
}

/// Assembles an `i32` from 1 to 4 big-endian bytes, left-justified.
pub fn big_endian_bytes_to_int32(bytes: &[u8]) -> Result<i32, NumericError> {
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(NumericError::InvalidPcmSampleSize((bytes.len() * 8) as u8));
    }
    let mut result: i32 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        result |= (i32::from(*byte)) << (8 * (3 - i));
    }
    Ok(result)
}

/// Assembles an `i32` from 1 to 4 little-endian bytes, left-justified.
pub fn little_endian_bytes_to_int32(bytes: &[u8]) -> Result<i32, NumericError> {
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(NumericError::InvalidPcmSampleSize((bytes.len() * 8) as u8));
    }
    let mut result: i32 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        result |= (i32::from(*byte)) << (8 * (4 - bytes.len() + i));
    }
    Ok(result)
}

/// Writes the top `sample_size` bits of a left-justified sample into `buffer`
/// at `write_position`, advancing the position.
pub fn write_pcm_sample(
    sample: u32,
    sample_size: u8,
    big_endian: bool,
    buffer: &mut Vec<u8>,
    write_position: &mut usize,
) -> Result<(), NumericError> {
    if !matches!(sample_size, 8 | 16 | 24 | 32) {
        return Err(NumericError::InvalidPcmSampleSize(sample_size));
    }

    let num_bytes = usize::from(sample_size / 8);
    if buffer.len() < *write_position + num_bytes {
        buffer.resize(*write_position + num_bytes, 0);
    }

    for i in 0..num_bytes {
        let shift = if big_endian {
            32 - 8 * (i + 1)
        } else {
            32 - 8 * (num_bytes - i)
        };
        buffer[*write_position + i] = ((sample >> shift) & 0xFF) as u8;
    }
    *write_position += num_bytes;
    Ok(())
}

/// Native byte order of the runtime system.
pub fn is_native_big_endian() -> bool {
    cfg!(target_endian = "big")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q7_8_round_trips_every_representable_value() {
        for q in [i16::MIN, -256, -1, 0, 1, 255, 256, i16::MAX] {
            assert_eq!(q7_8_from_float(q7_8_to_float(q)).unwrap(), q);
        }
    }

    #[test]
    fn q7_8_rejects_out_of_range() {
        assert!(q7_8_from_float(f32::NAN).is_err());
        assert!(q7_8_from_float(-128.5).is_err());
        assert!(q7_8_from_float(128.0).is_err());
        assert_eq!(q7_8_from_float(128.0 - 1.0 / 256.0).unwrap(), i16::MAX);
        assert_eq!(q7_8_from_float(-128.0).unwrap(), i16::MIN);
        assert_eq!(q7_8_from_float(6.0).unwrap(), 0x0600);
        assert_eq!(q7_8_from_float(-6.0).unwrap(), -0x0600);
    }

    #[test]
    fn q0_8_bounds() {
        assert_eq!(q0_8_from_float(0.0).unwrap(), 0);
        assert_eq!(q0_8_from_float(1.0 - 1.0 / 256.0).unwrap(), u8::MAX);
        assert!(q0_8_from_float(1.0).is_err());
        assert!(q0_8_from_float(-0.001).is_err());
    }

    #[test]
    fn normalized_float_conversions_clip() {
        assert_eq!(int32_to_normalized_float(i32::MIN), -1.0);
        assert_eq!(normalized_float_to_int32(-1.0).unwrap(), i32::MIN);
        assert_eq!(normalized_float_to_int32(1.0).unwrap(), i32::MAX);
        assert_eq!(normalized_float_to_int32(2.0).unwrap(), i32::MAX);
        assert_eq!(normalized_float_to_int32(0.0).unwrap(), 0);
        assert!(normalized_float_to_int32(f64::NAN).is_err());
        assert!(normalized_float_to_int32(f64::INFINITY).is_err());
    }

    #[test]
    fn pcm_sample_packing() {
        let mut buffer = Vec::new();
        let mut position = 0;
        write_pcm_sample(0x1234_5600, 24, true, &mut buffer, &mut position).unwrap();
        assert_eq!(buffer, [0x12, 0x34, 0x56]);
        assert_eq!(position, 3);

        let mut position = 0;
        let mut buffer = Vec::new();
        write_pcm_sample(0x1234_5600, 24, false, &mut buffer, &mut position).unwrap();
        assert_eq!(buffer, [0x56, 0x34, 0x12]);

        let mut buffer = Vec::new();
        let mut position = 0;
        assert!(write_pcm_sample(0, 12, true, &mut buffer, &mut position).is_err());
    }

    #[test]
    fn bytes_to_int32_left_justified() {
        assert_eq!(
            big_endian_bytes_to_int32(&[0x12, 0x34]).unwrap(),
            0x1234_0000
        );
        assert_eq!(
            little_endian_bytes_to_int32(&[0x34, 0x12]).unwrap(),
            0x1234_0000
        );
        assert!(big_endian_bytes_to_int32(&[]).is_err());
        assert!(big_endian_bytes_to_int32(&[0; 5]).is_err());
    }

    #[test]
    fn checked_helpers() {
        assert_eq!(add_u32_checked(1, 2).unwrap(), 3);
        assert!(add_u32_checked(u32::MAX, 1).is_err());
        assert_eq!(try_cast::<u32, u8>(255).unwrap(), 255u8);
        assert!(try_cast::<u32, u8>(256).is_err());
    }
}
