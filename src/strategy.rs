//! Routing strategy and its Ingress annotation encoding
//!
//! The strategy is the only decision state in the system. It is stored as
//! three nginx annotations on the staging Ingress:
//!
//! | Strategy          | canary  | canary-by-header | canary-weight |
//! |-------------------|---------|------------------|---------------|
//! | CurrentSlotOnly   | false   | removed          | removed       |
//! | StagingSlotOnly   | true    | `UseCanary`      | removed       |
//! | Weighted(w)       | true    | removed          | w             |
//!
//! [`RoutingStrategy::encode`] and [`RoutingStrategy::decode`] are inverses for
//! the three writable strategies. `None` is what decoding yields when nothing
//! can be read; it is never written.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    Error, Result, ANNOTATION_CANARY, ANNOTATION_CANARY_BY_HEADER, ANNOTATION_CANARY_WEIGHT,
    CANARY_HEADER,
};

/// Largest accepted canary weight (percent)
pub const MAX_WEIGHT: u8 = 100;

/// Traffic split between the primary and staging slots
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoutingStrategy {
    /// No strategy could be read (e.g. the staging Ingress does not exist)
    None,
    /// All traffic goes to the primary slot
    CurrentSlotOnly,
    /// Requests carrying the canary header go to the staging slot
    StagingSlotOnly,
    /// A fixed percentage of all traffic goes to the staging slot
    Weighted {
        /// Percentage (0-100) routed to staging
        weight: u8,
    },
}

impl RoutingStrategy {
    /// Decode the wire form `{strategy: int, weight?: int}`.
    ///
    /// `0` = current slot only, `1` = staging slot only, `2` = weighted.
    /// Anything else is rejected rather than mapped to a default.
    pub fn from_wire(strategy: i64, weight: Option<i64>) -> Result<Self> {
        match strategy {
            0 => Ok(Self::CurrentSlotOnly),
            1 => Ok(Self::StagingSlotOnly),
            2 => {
                let weight = weight.ok_or_else(|| {
                    Error::validation_field("weight", "weight missing for the weighted strategy")
                })?;
                let weight = u8::try_from(weight)
                    .ok()
                    .filter(|w| *w <= MAX_WEIGHT)
                    .ok_or_else(|| {
                        Error::validation_field(
                            "weight",
                            format!("weight must be between 0 and {MAX_WEIGHT}, got {weight}"),
                        )
                    })?;
                Ok(Self::Weighted { weight })
            }
            other => Err(Error::validation_field(
                "strategy",
                format!("unknown strategy {other}, expected 0, 1 or 2"),
            )),
        }
    }

    /// Wire integer for this strategy (`-1` for `None`)
    pub fn wire_code(&self) -> i64 {
        match self {
            Self::None => -1,
            Self::CurrentSlotOnly => 0,
            Self::StagingSlotOnly => 1,
            Self::Weighted { .. } => 2,
        }
    }

    /// Canary weight, when weighted
    pub fn weight(&self) -> Option<u8> {
        match self {
            Self::Weighted { weight } => Some(*weight),
            _ => None,
        }
    }

    /// Write this strategy into an annotation map, replacing all three
    /// strategy keys. Unrelated annotations are left untouched.
    pub fn encode(&self, annotations: &mut BTreeMap<String, String>) -> Result<()> {
        let (canary, by_header, weight) = match self {
            Self::CurrentSlotOnly => ("false", None, None),
            Self::StagingSlotOnly => ("true", Some(CANARY_HEADER.to_string()), None),
            Self::Weighted { weight } => ("true", None, Some(weight.to_string())),
            Self::None => {
                return Err(Error::validation_field(
                    "strategy",
                    "the none strategy cannot be written",
                ))
            }
        };

        annotations.insert(ANNOTATION_CANARY.to_string(), canary.to_string());
        set_or_remove(annotations, ANNOTATION_CANARY_BY_HEADER, by_header);
        set_or_remove(annotations, ANNOTATION_CANARY_WEIGHT, weight);
        Ok(())
    }

    /// Read the strategy back from an Ingress annotation map.
    ///
    /// A weight key means weighted; a by-header key alone means staging only;
    /// neither means current slot only. An unparseable weight decodes to
    /// `None`.
    pub fn decode(annotations: &BTreeMap<String, String>) -> Self {
        if let Some(raw) = annotations.get(ANNOTATION_CANARY_WEIGHT) {
            return match raw.trim().parse::<u8>() {
                Ok(weight) if weight <= MAX_WEIGHT => Self::Weighted { weight },
                _ => Self::None,
            };
        }

        if annotations.contains_key(ANNOTATION_CANARY_BY_HEADER) {
            return Self::StagingSlotOnly;
        }

        Self::CurrentSlotOnly
    }
}

fn set_or_remove(annotations: &mut BTreeMap<String, String>, key: &str, value: Option<String>) {
    match value {
        Some(v) => {
            annotations.insert(key.to_string(), v);
        }
        None => {
            annotations.remove(key);
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::CurrentSlotOnly => write!(f, "Current Slot Only"),
            Self::StagingSlotOnly => write!(f, "Staging Slot Only"),
            Self::Weighted { weight } => write!(f, "Weighted ({weight}%)"),
        }
    }
}
