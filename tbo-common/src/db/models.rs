//! Database models shared across services

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: Option<String>,
}

/// Access tier a catalog item is published under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessTier {
    Free,
    Preview,
    Premium,
}

/// Kind of access actually granted to a learner
///
/// Distinct from [`AccessTier`]: a premium grant on a preview-tier item is normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Free,
    Preview,
    Premium,
}

impl AccessTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::Free => "free",
            AccessTier::Preview => "preview",
            AccessTier::Premium => "premium",
        }
    }
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Free => "free",
            AccessType::Preview => "preview",
            AccessType::Premium => "premium",
        }
    }

    /// Access type recorded when a learner starts watching without a grant
    pub fn inferred_from_tier(tier: AccessTier) -> Self {
        match tier {
            AccessTier::Free => AccessType::Free,
            AccessTier::Preview => AccessType::Preview,
            AccessTier::Premium => AccessType::Premium,
        }
    }
}

impl FromStr for AccessTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(AccessTier::Free),
            "preview" => Ok(AccessTier::Preview),
            "premium" => Ok(AccessTier::Premium),
            other => Err(Error::InvalidInput(format!("Unknown access tier: {}", other))),
        }
    }
}

impl FromStr for AccessType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(AccessType::Free),
            "preview" => Ok(AccessType::Preview),
            "premium" => Ok(AccessType::Premium),
            other => Err(Error::InvalidInput(format!("Unknown access type: {}", other))),
        }
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog entry as seen by the entitlement engine (read-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub guid: Uuid,
    #[serde(default)]
    pub title: String,
    pub access_tier: AccessTier,
    /// Price in minor currency units (paise for INR)
    #[serde(default)]
    pub price_minor: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub total_duration_seconds: f64,
    /// Only meaningful for [`AccessTier::Preview`]
    #[serde(default)]
    pub preview_duration_seconds: f64,
}

fn default_currency() -> String {
    "INR".to_string()
}

impl ContentItem {
    /// Check catalog values the engine relies on
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.total_duration_seconds.is_finite() && self.total_duration_seconds > 0.0) {
            return Err(Error::InvalidInput(format!(
                "Content {} has non-positive total duration {}",
                self.guid, self.total_duration_seconds
            )));
        }
        if !(self.preview_duration_seconds.is_finite() && self.preview_duration_seconds >= 0.0) {
            return Err(Error::InvalidInput(format!(
                "Content {} has invalid preview duration {}",
                self.guid, self.preview_duration_seconds
            )));
        }
        if self.price_minor < 0 {
            return Err(Error::InvalidInput(format!(
                "Content {} has negative price",
                self.guid
            )));
        }
        Ok(())
    }
}
