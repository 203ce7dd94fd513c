use crate::error::InvalidDelegateError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::IntoEnumIterator;

/// The compute backend the engine uses to execute a model.
///
/// CoreML and Metal (iOS) or NNAPI and the Android GPU delegate might be faster than the CPU, but
/// not every model supports them. An incompatible delegate is reported when the model is loaded,
/// never while running it.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(try_from = "String", into = "&'static str")]
pub enum ComputeDelegate {
    /// Standard CPU execution.
    #[default]
    Default,
    Metal,
    CoreMl,
    AndroidGpu,
    #[strum(serialize = "nnapi")]
    NnApi,
}

impl ComputeDelegate {
    /// Whether this delegate offloads work to a GPU or NPU.
    pub fn is_accelerated(self) -> bool {
        !matches!(self, ComputeDelegate::Default)
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl FromStr for ComputeDelegate {
    type Err = InvalidDelegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComputeDelegate::iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| InvalidDelegateError(s.to_string()))
    }
}

impl TryFrom<String> for ComputeDelegate {
    type Error = InvalidDelegateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
