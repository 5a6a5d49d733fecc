//! Deployment slots
//!
//! A slot is one of the two isolated copies of the serving stack. Each maps
//! to exactly one namespace; object names are shared across slots.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{PRIMARY_NAMESPACE, STAGING_NAMESPACE};

/// One of the two deployment targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeploySlot {
    /// Serves the current model; receives all traffic unless a canary is active
    Primary,
    /// Serves the new model; receives canary traffic
    Staging,
}

impl DeploySlot {
    /// Both slots, primary first
    pub const ALL: [DeploySlot; 2] = [DeploySlot::Primary, DeploySlot::Staging];

    /// Namespace holding this slot's resources
    pub fn namespace(self) -> &'static str {
        match self {
            DeploySlot::Primary => PRIMARY_NAMESPACE,
            DeploySlot::Staging => STAGING_NAMESPACE,
        }
    }

    /// Slot selected by the `is-new-model` flag of a deploy request
    pub fn from_is_new_model(is_new_model: bool) -> Self {
        if is_new_model {
            DeploySlot::Staging
        } else {
            DeploySlot::Primary
        }
    }
}

impl fmt::Display for DeploySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploySlot::Primary => write!(f, "primary"),
            DeploySlot::Staging => write!(f, "staging"),
        }
    }
}
