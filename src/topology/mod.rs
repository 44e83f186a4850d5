//! Topology model: the devices known to the console and the operator's
//! current command target.
//!
//! Gateways, sinks, nodes and networks are discovered by the backend feed
//! and mirrored here in a [`DeviceRegistry`]. The registry is passive — it
//! never talks to the network itself — and everything else resolves
//! addressing through it. The mutable part is the [`Selection`]: which
//! gateway and sink the next command will be sent through.

use serde::{Deserialize, Serialize};

pub mod selection;

pub use selection::{Selection, SelectionError};

/// Gateway liveness as last reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GatewayState {
    Online,
    Offline,
    Unknown,
}

/// A backend gateway bridging the pub/sub transport and one or more sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub device_id: String,
    pub state: GatewayState,
    /// Sink device ids owned by this gateway, in discovery order.
    pub sinks: Vec<String>,
}

impl Gateway {
    /// A gateway typed in by the operator that the feed hasn't reported.
    pub fn custom(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            state: GatewayState::Unknown,
            sinks: Vec::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.state == GatewayState::Online
    }
}

/// A radio attached to a gateway, injecting traffic into one mesh network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sink {
    pub device_id: String,
    /// Owning gateway; `None` for an operator-typed custom sink until a
    /// configuration fetch resolves it.
    pub gateway_id: Option<String>,
    pub network_id: Option<u32>,
}

impl Sink {
    pub fn new(device_id: impl Into<String>, gateway_id: impl Into<String>, network_id: u32) -> Self {
        Self {
            device_id: device_id.into(),
            gateway_id: Some(gateway_id.into()),
            network_id: Some(network_id),
        }
    }

    /// A sink typed in by the operator that the feed hasn't reported.
    pub fn custom(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            gateway_id: None,
            network_id: None,
        }
    }
}

/// A mesh node as reported behind a specific gateway, addressed by its
/// numeric network address. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub device_id: u32,
    pub gateway_id: String,
}

/// One mesh network id. Read-only here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Network {
    pub network_id: u32,
}

/// Registry of every device the feed has reported. All collections keep
/// their contents unique by identity; updates overwrite in place.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    gateways: Vec<Gateway>,
    sinks: Vec<Sink>,
    nodes: Vec<NodeRecord>,
    networks: Vec<Network>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gateways(&self) -> &[Gateway] {
        &self.gateways
    }

    pub fn sinks(&self) -> &[Sink] {
        &self.sinks
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    /// Insert or update a gateway reported by the feed.
    pub fn upsert_gateway(&mut self, gateway: Gateway) {
        match self
            .gateways
            .iter()
            .position(|g| g.device_id == gateway.device_id)
        {
            Some(index) => self.gateways[index] = gateway,
            None => self.gateways.push(gateway),
        }
    }

    /// Insert or update a sink; links it into its owning gateway's sink list
    /// and records its network.
    pub fn upsert_sink(&mut self, sink: Sink) {
        if let (Some(gateway_id), Some(network_id)) = (&sink.gateway_id, sink.network_id) {
            if let Some(gw) = self.gateways.iter_mut().find(|g| &g.device_id == gateway_id) {
                if !gw.sinks.contains(&sink.device_id) {
                    gw.sinks.push(sink.device_id.clone());
                }
            }
            self.observe_network(network_id);
        }
        match self
            .sinks
            .iter()
            .position(|s| s.device_id == sink.device_id && s.gateway_id == sink.gateway_id)
        {
            Some(index) => self.sinks[index] = sink,
            None => self.sinks.push(sink),
        }
    }

    /// Record a node seen behind a gateway.
    pub fn observe_node(&mut self, device_id: u32, gateway_id: impl Into<String>) {
        let gateway_id = gateway_id.into();
        let seen = self
            .nodes
            .iter()
            .any(|n| n.device_id == device_id && n.gateway_id == gateway_id);
        if !seen {
            self.nodes.push(NodeRecord {
                device_id,
                gateway_id,
            });
        }
    }

    pub fn observe_network(&mut self, network_id: u32) {
        if !self.networks.iter().any(|n| n.network_id == network_id) {
            self.networks.push(Network { network_id });
        }
    }

    /// Drop a gateway and everything owned by it.
    pub fn remove_gateway(&mut self, device_id: &str) {
        self.gateways.retain(|g| g.device_id != device_id);
        self.sinks
            .retain(|s| s.gateway_id.as_deref() != Some(device_id));
        self.nodes.retain(|n| n.gateway_id != device_id);
    }

    /// Gateways currently reported online, sorted by device id.
    pub fn online_gateways(&self) -> Vec<&Gateway> {
        let mut online: Vec<&Gateway> = self.gateways.iter().filter(|g| g.is_online()).collect();
        online.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        online
    }

    /// Sinks owned by the given gateway, in registry order.
    pub fn sinks_of_gateway(&self, gateway_id: &str) -> Vec<&Sink> {
        filter_sinks_by_gateway(&self.sinks, gateway_id)
    }

    /// Node addresses seen behind the given gateway, in registry order.
    pub fn nodes_of_gateway(&self, gateway_id: &str) -> Vec<&NodeRecord> {
        filter_nodes_by_gateway(&self.nodes, gateway_id)
    }
}

/// Order-preserving filter of sinks by owning gateway.
pub fn filter_sinks_by_gateway<'a>(sinks: &'a [Sink], gateway_id: &str) -> Vec<&'a Sink> {
    sinks
        .iter()
        .filter(|s| s.gateway_id.as_deref() == Some(gateway_id))
        .collect()
}

/// Order-preserving filter of nodes by owning gateway.
pub fn filter_nodes_by_gateway<'a>(nodes: &'a [NodeRecord], gateway_id: &str) -> Vec<&'a NodeRecord> {
    nodes
        .iter()
        .filter(|n| n.gateway_id == gateway_id)
        .collect()
}

/// Order-preserving filter of nodes by exact address.
pub fn filter_nodes_by_address(nodes: &[NodeRecord], device_id: u32) -> Vec<&NodeRecord> {
    nodes.iter().filter(|n| n.device_id == device_id).collect()
}

/// Sort sinks by device id, stable.
pub fn sort_sinks_by_device_id<'a>(mut sinks: Vec<&'a Sink>) -> Vec<&'a Sink> {
    sinks.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    sinks
}

/// Sort gateways by device id, stable.
pub fn sort_gateways_by_device_id<'a>(mut gateways: Vec<&'a Gateway>) -> Vec<&'a Gateway> {
    gateways.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    gateways
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        let mut reg = DeviceRegistry::new();
        reg.upsert_gateway(Gateway {
            device_id: "gw-b".into(),
            state: GatewayState::Online,
            sinks: Vec::new(),
        });
        reg.upsert_gateway(Gateway {
            device_id: "gw-a".into(),
            state: GatewayState::Offline,
            sinks: Vec::new(),
        });
        reg.upsert_sink(Sink::new("sink-2", "gw-b", 777));
        reg.upsert_sink(Sink::new("sink-1", "gw-b", 777));
        reg.upsert_sink(Sink::new("sink-1", "gw-a", 778));
        reg.observe_node(1001, "gw-b");
        reg.observe_node(1002, "gw-a");
        reg
    }

    #[test]
    fn filters_preserve_order() {
        let reg = registry();
        let sinks = reg.sinks_of_gateway("gw-b");
        let ids: Vec<&str> = sinks.iter().map(|s| s.device_id.as_str()).collect();
        assert_eq!(ids, ["sink-2", "sink-1"]);

        let sorted = sort_sinks_by_device_id(sinks);
        let ids: Vec<&str> = sorted.iter().map(|s| s.device_id.as_str()).collect();
        assert_eq!(ids, ["sink-1", "sink-2"]);
    }

    #[test]
    fn online_gateways_excludes_offline() {
        let reg = registry();
        let online = reg.online_gateways();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].device_id, "gw-b");
    }

    #[test]
    fn upsert_gateway_overwrites_in_place() {
        let mut reg = registry();
        reg.upsert_gateway(Gateway {
            device_id: "gw-a".into(),
            state: GatewayState::Online,
            sinks: Vec::new(),
        });
        assert_eq!(reg.gateways().len(), 2);
        assert_eq!(reg.online_gateways().len(), 2);
    }

    #[test]
    fn upsert_sink_links_gateway_and_network() {
        let reg = registry();
        let gw = reg
            .gateways()
            .iter()
            .find(|g| g.device_id == "gw-b")
            .unwrap();
        assert_eq!(gw.sinks, ["sink-2", "sink-1"]);
        assert!(reg.networks().iter().any(|n| n.network_id == 777));
        assert!(reg.networks().iter().any(|n| n.network_id == 778));
    }

    #[test]
    fn remove_gateway_drops_owned_devices() {
        let mut reg = registry();
        reg.remove_gateway("gw-b");
        assert_eq!(reg.gateways().len(), 1);
        assert!(reg.sinks_of_gateway("gw-b").is_empty());
        assert!(reg.nodes_of_gateway("gw-b").is_empty());
        assert_eq!(reg.nodes_of_gateway("gw-a").len(), 1);
    }

    #[test]
    fn observe_node_is_idempotent() {
        let mut reg = registry();
        reg.observe_node(1001, "gw-b");
        assert_eq!(reg.nodes_of_gateway("gw-b").len(), 1);
    }
}
