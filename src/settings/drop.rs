use crate::network::types::probability::Probability;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DropOptions {
    /// Probability of dropping a throttled packet, ranging from 0.0 to 1.0
    #[serde(default)]
    pub packet_drop_rate: Probability,
}
