//! Known networks and the endpoint table built from them at startup.

use std::collections::BTreeMap;

use crate::types::ChainId;

/// A network the relay knows how to reach without an explicit endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    pub chain_id: ChainId,
    /// Infura subdomain.
    pub name: &'static str,
    /// Block explorer host, used for links in chat messages.
    pub explorer: &'static str,
}

pub const NETWORKS: &[Network] = &[
    Network { chain_id: 1, name: "mainnet", explorer: "etherscan.io" },
    Network { chain_id: 5, name: "goerli", explorer: "goerli.etherscan.io" },
    Network { chain_id: 11_155_111, name: "sepolia", explorer: "sepolia.etherscan.io" },
    Network { chain_id: 137, name: "polygon-mainnet", explorer: "polygonscan.com" },
    Network { chain_id: 80_001, name: "polygon-mumbai", explorer: "mumbai.polygonscan.com" },
    Network { chain_id: 80_002, name: "polygon-amoy", explorer: "amoy.polygonscan.com" },
];

#[must_use]
pub fn network(chain_id: ChainId) -> Option<&'static Network> {
    NETWORKS.iter().find(|network| network.chain_id == chain_id)
}

/// `https://{network}.infura.io/v3/{key}`, or `None` for chains missing from [`NETWORKS`].
#[must_use]
pub fn infura_url(chain_id: ChainId, api_key: &str) -> Option<String> {
    network(chain_id).map(|network| format!("https://{}.infura.io/v3/{api_key}", network.name))
}

/// Transaction link on the chain's block explorer.
#[must_use]
pub fn explorer_tx_url(chain_id: ChainId, tx_hash: &str) -> Option<String> {
    network(chain_id).map(|network| format!("https://{}/tx/{tx_hash}", network.explorer))
}

/// RPC URLs of one chain: the primary first, then fallbacks in failover order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub primary: String,
    pub fallbacks: Vec<String>,
}

/// Chain id → RPC endpoints, populated once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointTable {
    endpoints: BTreeMap<ChainId, Endpoints>,
}

impl EndpointTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers explicit endpoints for `chain_id`, replacing any previous entry.
    pub fn insert(
        &mut self,
        chain_id: ChainId,
        primary: impl Into<String>,
        fallbacks: Vec<String>,
    ) {
        self.endpoints.insert(chain_id, Endpoints { primary: primary.into(), fallbacks });
    }

    /// Fills in an Infura endpoint for `chain_id` unless one is already registered.
    ///
    /// Returns `false` when the chain is unknown and no endpoint exists for it.
    pub fn ensure_infura(&mut self, chain_id: ChainId, api_key: &str) -> bool {
        if self.endpoints.contains_key(&chain_id) {
            return true;
        }
        match infura_url(chain_id, api_key) {
            Some(url) => {
                self.insert(chain_id, url, vec![]);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, chain_id: ChainId) -> Option<&Endpoints> {
        self.endpoints.get(&chain_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChainId, &Endpoints)> {
        self.endpoints.iter().map(|(chain_id, endpoints)| (*chain_id, endpoints))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
