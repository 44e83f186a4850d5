//! Shared helpers for integration tests.

use meshops::config::Config;
use meshops::console::Console;
use meshops::link::{GatewayLink, LinkBackend};
use meshops::topology::{Gateway, GatewayState, Sink};

pub const GW: &str = "gw-1";
pub const SINK: &str = "sink0";
pub const NETWORK: u32 = 0x2001;

/// Console wired to a fresh channel backend, with gateway and sink selected.
pub fn console_with_target() -> (Console, LinkBackend) {
    let (link, backend) = GatewayLink::channel();
    let mut console = Console::new(Config::default(), link);
    console.selection_mut().select_gateway(Gateway {
        device_id: GW.to_string(),
        state: GatewayState::Online,
        sinks: vec![SINK.to_string()],
    });
    console
        .selection_mut()
        .select_sink(Sink::new(SINK, GW, NETWORK))
        .expect("sink belongs to selected gateway");
    (console, backend)
}
