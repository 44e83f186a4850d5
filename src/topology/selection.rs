//! The operator's current command target.
//!
//! Three nullable slots: gateway, sink, network. The one invariant that
//! matters is that a selected sink always belongs to the selected gateway —
//! selecting a new gateway therefore clears the sink slot, and selecting a
//! sink owned by some other gateway is refused outright.

use thiserror::Error;

use super::{Gateway, Network, Sink};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no gateway selected")]
    NoGateway,

    #[error("no sink selected")]
    NoSink,

    #[error("sink '{sink}' belongs to gateway '{owner}', not selected gateway '{selected}'")]
    SinkGatewayMismatch {
        sink: String,
        owner: String,
        selected: String,
    },
}

/// Gateway and sink ids a command addresses its requests to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTarget {
    pub gateway_id: String,
    pub sink_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    gateway: Option<Gateway>,
    sink: Option<Sink>,
    network: Option<Network>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gateway(&self) -> Option<&Gateway> {
        self.gateway.as_ref()
    }

    pub fn sink(&self) -> Option<&Sink> {
        self.sink.as_ref()
    }

    pub fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    /// Select a gateway. Any previously selected sink is cleared — it
    /// belonged to the old gateway.
    pub fn select_gateway(&mut self, gateway: Gateway) {
        self.gateway = Some(gateway);
        self.sink = None;
    }

    /// Select a sink under the current gateway.
    ///
    /// A sink whose owner is known and differs from the selected gateway is
    /// refused. A custom sink (owner unresolved) is accepted as-is; its
    /// owner resolves on the next configuration fetch.
    pub fn select_sink(&mut self, sink: Sink) -> Result<(), SelectionError> {
        let gateway = self.gateway.as_ref().ok_or(SelectionError::NoGateway)?;
        if let Some(owner) = &sink.gateway_id {
            if owner != &gateway.device_id {
                return Err(SelectionError::SinkGatewayMismatch {
                    sink: sink.device_id.clone(),
                    owner: owner.clone(),
                    selected: gateway.device_id.clone(),
                });
            }
        }
        if let Some(network_id) = sink.network_id {
            self.network = Some(Network { network_id });
        }
        self.sink = Some(sink);
        Ok(())
    }

    pub fn select_network(&mut self, network: Network) {
        self.network = Some(network);
    }

    /// Both slots resolved, ready to address a command.
    pub fn target(&self) -> Result<CommandTarget, SelectionError> {
        let gateway = self.gateway.as_ref().ok_or(SelectionError::NoGateway)?;
        let sink = self.sink.as_ref().ok_or(SelectionError::NoSink)?;
        Ok(CommandTarget {
            gateway_id: gateway.device_id.clone(),
            sink_id: sink.device_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::GatewayState;

    fn gateway(id: &str) -> Gateway {
        Gateway {
            device_id: id.into(),
            state: GatewayState::Online,
            sinks: Vec::new(),
        }
    }

    #[test]
    fn selecting_gateway_clears_sink() {
        let mut sel = Selection::new();
        sel.select_gateway(gateway("gw-a"));
        sel.select_sink(Sink::new("sink-1", "gw-a", 7)).unwrap();
        assert!(sel.sink().is_some());

        sel.select_gateway(gateway("gw-b"));
        assert!(sel.sink().is_none());
        assert_eq!(sel.target(), Err(SelectionError::NoSink));
    }

    #[test]
    fn foreign_sink_is_refused() {
        let mut sel = Selection::new();
        sel.select_gateway(gateway("gw-a"));
        let err = sel.select_sink(Sink::new("sink-1", "gw-b", 7)).unwrap_err();
        assert_eq!(
            err,
            SelectionError::SinkGatewayMismatch {
                sink: "sink-1".into(),
                owner: "gw-b".into(),
                selected: "gw-a".into(),
            }
        );
        assert!(sel.sink().is_none());
    }

    #[test]
    fn sink_requires_gateway() {
        let mut sel = Selection::new();
        assert_eq!(
            sel.select_sink(Sink::custom("sink-1")),
            Err(SelectionError::NoGateway)
        );
    }

    #[test]
    fn custom_sink_attaches_to_current_gateway() {
        let mut sel = Selection::new();
        sel.select_gateway(gateway("gw-a"));
        sel.select_sink(Sink::custom("sink-x")).unwrap();
        let target = sel.target().unwrap();
        assert_eq!(target.gateway_id, "gw-a");
        assert_eq!(target.sink_id, "sink-x");
    }

    #[test]
    fn selecting_sink_tracks_network() {
        let mut sel = Selection::new();
        sel.select_gateway(gateway("gw-a"));
        sel.select_sink(Sink::new("sink-1", "gw-a", 41)).unwrap();
        assert_eq!(sel.network().map(|n| n.network_id), Some(41));
    }
}
