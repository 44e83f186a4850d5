//! Network-wide neighbor diagnostics configuration.
//!
//! Turning neighbor diagnostics on or off for a whole network means writing
//! a new app config to every sink injecting into that network, across every
//! gateway that owns one. The write fan-out runs as two cooperating loops:
//! the feature loop publishing the writes and watching for completion, and a
//! pump loop draining the link's inbound queues and dispatching each
//! acknowledgement into the shared state machine. Both loops run until the
//! shared completion flag is set, and both are joined before [`run`]
//! returns — the only mutable state they share is behind the flag and one
//! mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use log::{debug, warn};
use tokio::time::{sleep, Duration, Instant};

use crate::link::{GatewayLink, GatewayResponse, LinkError, Request, ResultCode};

/// Idle pause of the pump loop when every queue is empty.
const PUMP_IDLE: Duration = Duration::from_millis(50);

/// Neighbor diagnostics reporting interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagInterval {
    Off,
    S30,
    S60,
    S120,
    S300,
    S1200,
}

impl DiagInterval {
    /// Menu order: off first, then ascending.
    pub fn all() -> [DiagInterval; 6] {
        [
            DiagInterval::Off,
            DiagInterval::S30,
            DiagInterval::S60,
            DiagInterval::S120,
            DiagInterval::S300,
            DiagInterval::S1200,
        ]
    }

    /// Interval in seconds as written into the app config; zero disables.
    pub fn as_secs(self) -> u16 {
        match self {
            DiagInterval::Off => 0,
            DiagInterval::S30 => 30,
            DiagInterval::S60 => 60,
            DiagInterval::S120 => 120,
            DiagInterval::S300 => 300,
            DiagInterval::S1200 => 1200,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DiagInterval::Off => "off",
            DiagInterval::S30 => "30",
            DiagInterval::S60 => "60",
            DiagInterval::S120 => "120",
            DiagInterval::S300 => "300",
            DiagInterval::S1200 => "1200",
        }
    }
}

/// One sink to reconfigure.
#[derive(Debug, Clone)]
pub struct DiagTarget {
    pub gateway_id: String,
    pub sink_id: String,
    pub node_address: u32,
    /// App config sequence to write; must exceed the sink's current one.
    pub next_seq: u8,
    /// Current app config payload, written back unchanged.
    pub app_config_data: Bytes,
}

/// Outcome for one sink.
#[derive(Debug, Clone)]
pub struct DiagOutcome {
    pub gateway_id: String,
    pub sink_id: String,
    pub node_address: u32,
    pub ok: bool,
}

#[derive(Debug, Clone)]
pub struct DiagReport {
    pub outcomes: Vec<DiagOutcome>,
}

impl DiagReport {
    pub fn all_ok(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.ok)
    }
}

/// Per-run state shared between the two loops.
#[derive(Debug, Default)]
struct DiagState {
    /// request id -> target index, removed as acknowledgements land.
    pending: HashMap<u64, usize>,
    results: Vec<Option<bool>>,
}

impl DiagState {
    fn on_response(&mut self, response: &GatewayResponse) {
        if let Some(index) = self.pending.remove(&response.request_id) {
            self.results[index] = Some(response.result == ResultCode::Ok);
            debug!(
                "diag target {} acknowledged with {}",
                index, response.result
            );
        }
    }

    fn is_complete(&self) -> bool {
        self.results.iter().all(Option::is_some)
    }
}

/// Fan the diagnostics write out to every target and collect per-sink
/// outcomes. Targets that never get acknowledged within the deadline are
/// reported failed.
pub async fn run(
    link: &mut GatewayLink,
    targets: Vec<DiagTarget>,
    interval: DiagInterval,
    ack_wait: Duration,
) -> Result<DiagReport, LinkError> {
    let state = Arc::new(Mutex::new(DiagState {
        pending: HashMap::new(),
        results: vec![None; targets.len()],
    }));
    let done = Arc::new(AtomicBool::new(false));
    let request_tx = link.request_sender();

    // Publish one app config write per target and register it as pending.
    {
        let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
        for (index, target) in targets.iter().enumerate() {
            let request_id = crate::link::next_request_id();
            let request = Request::SetAppConfig {
                request_id,
                gateway_id: target.gateway_id.clone(),
                sink_id: target.sink_id.clone(),
                sequence: target.next_seq,
                diag_interval_secs: interval.as_secs(),
                data: target.app_config_data.clone(),
            };
            if request_tx.send(request).is_err() {
                return Err(LinkError::Closed);
            }
            guard.pending.insert(request_id, index);
        }
    }

    let deadline = Instant::now() + ack_wait;

    let feature_state = Arc::clone(&state);
    let feature_done = Arc::clone(&done);
    let feature_loop = async move {
        loop {
            {
                let guard = feature_state.lock().unwrap_or_else(|e| e.into_inner());
                if guard.is_complete() {
                    break;
                }
            }
            if Instant::now() >= deadline {
                warn!("neighbor diagnostics fan-out timed out waiting for acknowledgements");
                break;
            }
            sleep(PUMP_IDLE).await;
        }
        feature_done.store(true, Ordering::SeqCst);
    };

    let pump_state = Arc::clone(&state);
    let pump_done = Arc::clone(&done);
    let pump_loop = async {
        while !pump_done.load(Ordering::SeqCst) {
            let mut received = false;
            while let Some(response) = link.try_next_response() {
                received = true;
                pump_state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .on_response(&response);
            }
            for message in link.drain_data() {
                received = true;
                debug!(
                    "diag pump: ignoring data message from {}",
                    message.source_address
                );
            }
            for event in link.drain_events() {
                received = true;
                debug!("diag pump: gateway {} event", event.gateway_id);
            }
            if !received {
                sleep(PUMP_IDLE).await;
            }
        }
    };

    // Both loops complete before control returns.
    tokio::join!(feature_loop, pump_loop);

    let guard = state.lock().unwrap_or_else(|e| e.into_inner());
    let outcomes = targets
        .iter()
        .enumerate()
        .map(|(index, target)| DiagOutcome {
            gateway_id: target.gateway_id.clone(),
            sink_id: target.sink_id.clone(),
            node_address: target.node_address,
            ok: guard.results[index].unwrap_or(false),
        })
        .collect();
    Ok(DiagReport { outcomes })
}
