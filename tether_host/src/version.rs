//! HAL version argument resolution.
//!
//! Callers may name a target version either as separate major/minor integers
//! or as a single float (the older calling convention). Exactly one form is
//! required.

use tether_common::{TetherError, TetherResult};

/// A resolved HAL interface version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalVersion {
    /// Major version component
    pub major: u32,
    /// Minor version component
    pub minor: u32,
}

impl std::fmt::Display for HalVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Resolve the target version from whichever form the caller supplied.
///
/// Major and minor, when both present, win unchanged. Otherwise a float
/// version is split on its decimal point into integer components. A float
/// collapses trailing zeros in the minor component (`1.10` resolves to
/// `1.1`); callers with multi-digit minor versions must pass major and
/// minor explicitly.
///
/// # Errors
/// `UserInput` if neither form is supplied.
pub fn resolve(
    version: Option<f32>,
    major: Option<u32>,
    minor: Option<u32>,
) -> TetherResult<HalVersion> {
    if let (Some(major), Some(minor)) = (major, minor) {
        return Ok(HalVersion { major, minor });
    }

    if let Some(version) = version {
        let text = version.to_string();
        let (major_text, minor_text) = match text.split_once('.') {
            Some((major_text, minor_text)) => (major_text, minor_text),
            // An integral float renders without a decimal point.
            None => (text.as_str(), "0"),
        };
        let major = major_text.parse().map_err(|_| {
            TetherError::UserInput(format!("cannot parse major component of version {text}"))
        })?;
        let minor = minor_text.parse().map_err(|_| {
            TetherError::UserInput(format!("cannot parse minor component of version {text}"))
        })?;
        return Ok(HalVersion { major, minor });
    }

    Err(TetherError::UserInput(
        "a target version is required, either as major/minor or as a single float".to_string(),
    ))
}
