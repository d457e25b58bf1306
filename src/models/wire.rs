//! Upstream gateway encoding.
//!
//! The gateway returns governance payloads in their Candid-derived JSON shape,
//! where an optional value is a sequence of zero or one elements. These types
//! decode that shape and convert into [`records`](super::records), so nothing
//! past this module sees the sequence encoding.

use serde::{Deserialize, Deserializer};

use super::records::{DissolveState, Neuron, NeuronPermission, SnsDescriptor};

/// `[]` / `[x]` decoded as `None` / `Some(x)`.
pub mod opt_seq {
    use serde::de::{self, Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        let mut items = Vec::<T>::deserialize(deserializer)?;
        match items.len() {
            0 => Ok(None),
            1 => Ok(items.pop()),
            n => Err(de::Error::invalid_length(n, &"a sequence of zero or one element")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NeuronIdWire {
    id: Vec<u8>,
}

#[derive(Debug, Deserialize)]
enum DissolveStateWire {
    DissolveDelaySeconds(u64),
    WhenDissolvedTimestampSeconds(u64),
}

#[derive(Debug, Deserialize)]
struct NeuronPermissionWire {
    #[serde(deserialize_with = "opt_seq::deserialize", default)]
    principal: Option<String>,
    #[serde(default)]
    permission_type: Vec<i32>,
}

/// A neuron as returned by the gateway.
#[derive(Debug, Deserialize)]
pub struct NeuronWire {
    #[serde(deserialize_with = "opt_seq::deserialize", default)]
    id: Option<NeuronIdWire>,
    cached_neuron_stake_e8s: u64,
    maturity_e8s_equivalent: u64,
    #[serde(deserialize_with = "opt_seq::deserialize", default)]
    staked_maturity_e8s_equivalent: Option<u64>,
    #[serde(deserialize_with = "opt_seq::deserialize", default)]
    dissolve_state: Option<DissolveStateWire>,
    aging_since_timestamp_seconds: u64,
    voting_power_percentage_multiplier: u64,
    #[serde(default)]
    created_timestamp_seconds: u64,
    #[serde(default)]
    permissions: Vec<NeuronPermissionWire>,
}

impl From<NeuronWire> for Neuron {
    fn from(wire: NeuronWire) -> Self {
        Self {
            id: wire.id.map(|id| to_hex(&id.id)),
            cached_neuron_stake_e8s: wire.cached_neuron_stake_e8s,
            maturity_e8s_equivalent: wire.maturity_e8s_equivalent,
            staked_maturity_e8s_equivalent: wire.staked_maturity_e8s_equivalent,
            dissolve_state: wire.dissolve_state.map(|state| match state {
                DissolveStateWire::DissolveDelaySeconds(s) => {
                    DissolveState::DissolveDelaySeconds(s)
                }
                DissolveStateWire::WhenDissolvedTimestampSeconds(t) => {
                    DissolveState::WhenDissolvedTimestampSeconds(t)
                }
            }),
            aging_since_timestamp_seconds: wire.aging_since_timestamp_seconds,
            voting_power_percentage_multiplier: wire.voting_power_percentage_multiplier,
            created_timestamp_seconds: wire.created_timestamp_seconds,
            permissions: wire
                .permissions
                .into_iter()
                .map(|p| NeuronPermission {
                    principal: p.principal,
                    permission_type: p.permission_type,
                })
                .collect(),
        }
    }
}

/// One deployed SNS as returned by the gateway.
#[derive(Debug, Deserialize)]
pub struct SnsInstanceWire {
    #[serde(deserialize_with = "opt_seq::deserialize", default)]
    root_canister_id: Option<String>,
    #[serde(deserialize_with = "opt_seq::deserialize", default)]
    governance_canister_id: Option<String>,
    #[serde(deserialize_with = "opt_seq::deserialize", default)]
    ledger_canister_id: Option<String>,
    #[serde(deserialize_with = "opt_seq::deserialize", default)]
    swap_canister_id: Option<String>,
    #[serde(deserialize_with = "opt_seq::deserialize", default)]
    index_canister_id: Option<String>,
    #[serde(deserialize_with = "opt_seq::deserialize", default)]
    name: Option<String>,
}

impl SnsInstanceWire {
    /// Instances without a root canister cannot be addressed and are dropped.
    pub fn into_descriptor(self) -> Option<SnsDescriptor> {
        Some(SnsDescriptor {
            root_canister_id: self.root_canister_id?,
            governance_canister_id: self.governance_canister_id,
            ledger_canister_id: self.ledger_canister_id,
            swap_canister_id: self.swap_canister_id,
            index_canister_id: self.index_canister_id,
            name: self.name,
        })
    }
}

/// Body of the gateway's SNS listing.
#[derive(Debug, Deserialize)]
pub struct ListSnsesResponse {
    #[serde(default)]
    pub instances: Vec<SnsInstanceWire>,
}

impl ListSnsesResponse {
    pub fn into_descriptors(self) -> Vec<SnsDescriptor> {
        self.instances
            .into_iter()
            .filter_map(SnsInstanceWire::into_descriptor)
            .collect()
    }
}

/// Decodes a gateway neuron list into records.
pub fn decode_neurons<'de, D>(deserializer: D) -> Result<Vec<Neuron>, D::Error>
where
    D: Deserializer<'de>,
{
    let wire = Vec::<NeuronWire>::deserialize(deserializer)?;
    Ok(wire.into_iter().map(Neuron::from).collect())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
