//! Validation helpers shared by OBU serialization and parsing.

use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;

use anyhow::{Result, bail};

/// Fails unless `lhs == rhs`.
pub fn validate_equal<T: PartialEq + Display>(lhs: T, rhs: T, context: &str) -> Result<()> {
    if lhs != rhs {
        bail!("Invalid {context}. Expected {lhs} == {rhs}");
    }
    Ok(())
}

/// Fails unless `lhs != rhs`.
pub fn validate_not_equal<T: PartialEq + Display>(lhs: T, rhs: T, context: &str) -> Result<()> {
    if lhs == rhs {
        bail!("Invalid {context}. Expected {lhs} != {rhs}");
    }
    Ok(())
}

/// Fails when the iterator yields a duplicate value.
pub fn validate_unique<T, I>(iter: I, context: &str) -> Result<()>
where
    T: Eq + Hash + Display,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    for value in iter {
        if !seen.insert(value.to_string()) {
            bail!("{context} must be unique. Found duplicate: {value}");
        }
    }
    Ok(())
}

/// Fails unless a container's actual size matches the size a `*_size` or
/// `count_*` field reported.
pub fn validate_container_size_equal(
    context: &str,
    actual_size: usize,
    reported_size: u32,
) -> Result<()> {
    if actual_size as u64 != u64::from(reported_size) {
        bail!("Found inconsistency with {context}: size {actual_size}, expected {reported_size}");
    }
    Ok(())
}

/// Fails unless `value` lies in the inclusive range `[min, max]`.
pub fn validate_in_range<T: PartialOrd + Display>(
    value: T,
    min: T,
    max: T,
    context: &str,
) -> Result<()> {
    if value < min || value > max {
        bail!("Invalid {context}. Expected {value} in range [{min}, {max}]");
    }
    Ok(())
}
