//! Domain records cached per principal and governance canister.
//!
//! Fields that are optional upstream are plain `Option`s here; see
//! [`wire`](super::wire) for how they are decoded.

use serde::{Deserialize, Serialize};

/// How a neuron's dissolve delay is currently expressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DissolveState {
    /// Locked, with this much delay left when dissolving starts
    DissolveDelaySeconds(u64),
    /// Dissolving, unlocked at this timestamp
    WhenDissolvedTimestampSeconds(u64),
}

/// A principal's permissions on a neuron.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeuronPermission {
    pub principal: Option<String>,
    pub permission_type: Vec<i32>,
}

/// An SNS neuron as shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neuron {
    /// Hex-encoded neuron id subaccount
    pub id: Option<String>,
    pub cached_neuron_stake_e8s: u64,
    pub maturity_e8s_equivalent: u64,
    pub staked_maturity_e8s_equivalent: Option<u64>,
    pub dissolve_state: Option<DissolveState>,
    pub aging_since_timestamp_seconds: u64,
    pub voting_power_percentage_multiplier: u64,
    pub created_timestamp_seconds: u64,
    pub permissions: Vec<NeuronPermission>,
}

impl Neuron {
    /// Whether `principal` appears in this neuron's permission list.
    pub fn is_controlled_by(&self, principal: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p.principal.as_deref() == Some(principal))
    }
}

/// One entry of the SNS directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnsDescriptor {
    pub root_canister_id: String,
    pub governance_canister_id: Option<String>,
    pub ledger_canister_id: Option<String>,
    pub swap_canister_id: Option<String>,
    pub index_canister_id: Option<String>,
    pub name: Option<String>,
}
