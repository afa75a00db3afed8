//! Application language selection.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Languages the application ships translations for.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    uniffi::Enum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Language {
    /// French. Also the fallback for unsupported device locales.
    #[default]
    Fr,
    /// English.
    En,
}

impl Language {
    /// Picks the language for a device locale identifier such as `en-US`, `fr_CA` or `de`.
    ///
    /// Only the primary language subtag is considered; anything unsupported falls back to French.
    #[must_use]
    pub fn from_device_locale(locale: &str) -> Self {
        let primary = locale
            .split(['-', '_', '.', '@'])
            .next()
            .unwrap_or_default()
            .trim();
        Self::from_str(primary).unwrap_or_default()
    }
}

/// Exported for foreign callers: see [`Language::from_device_locale`].
#[uniffi::export]
#[must_use]
pub fn language_for_device_locale(locale: String) -> Language {
    Language::from_device_locale(&locale)
}
