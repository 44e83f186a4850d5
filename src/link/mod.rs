//! Gateway link: typed message envelopes and the channel seam between the
//! console and the pub/sub backend.
//!
//! The console never speaks to a broker directly. It publishes [`Request`]
//! envelopes into an outbound queue and polls three inbound queues: data
//! messages from mesh nodes, gateway state events, and gateway responses
//! (acknowledgements). A broker client — or a test, or the bundled
//! simulator — owns the [`LinkBackend`] half and moves envelopes to and
//! from the actual transport.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

pub mod sim;

/// Destination endpoint for all maintenance and diagnostic traffic.
pub const DIAGNOSTIC_CONTROL_ENDPOINT: u8 = 240;
/// Source endpoint stamped on every request originating here.
pub const SOURCE_ENDPOINT: u8 = 255;
/// Mesh broadcast address: every node behind the sink.
pub const BROADCAST_ADDRESS: u32 = 4_294_967_295;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Fresh process-unique request id for correlating acknowledgements.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QosLevel {
    AtLeastOnce,
    ExactlyOnce,
}

/// Result code in a gateway acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultCode {
    Ok,
    InternalError,
    InvalidParam,
    InvalidSequenceNumber,
    AccessDenied,
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResultCode::Ok => "OK",
            ResultCode::InternalError => "INTERNAL_ERROR",
            ResultCode::InvalidParam => "INVALID_PARAM",
            ResultCode::InvalidSequenceNumber => "INVALID_SEQUENCE_NUMBER",
            ResultCode::AccessDenied => "ACCESS_DENIED",
        };
        f.write_str(s)
    }
}

/// Downlink data transmission through a sink.
#[derive(Debug, Clone)]
pub struct DataRequest {
    pub request_id: u64,
    pub gateway_id: String,
    pub sink_id: String,
    pub destination: u32,
    pub source_endpoint: u8,
    pub destination_endpoint: u8,
    pub qos: QosLevel,
    pub payload: Bytes,
}

impl DataRequest {
    /// Maintenance request: diagnostic-control endpoint, exactly-once.
    pub fn diagnostic(
        gateway_id: impl Into<String>,
        sink_id: impl Into<String>,
        destination: u32,
        payload: Bytes,
    ) -> Self {
        Self {
            request_id: next_request_id(),
            gateway_id: gateway_id.into(),
            sink_id: sink_id.into(),
            destination,
            source_endpoint: SOURCE_ENDPOINT,
            destination_endpoint: DIAGNOSTIC_CONTROL_ENDPOINT,
            qos: QosLevel::ExactlyOnce,
            payload,
        }
    }
}

/// Outbound request envelopes, one variant per gateway API command the
/// console issues. Required fields are typed per kind; there is no grab-bag
/// of optional keys.
#[derive(Debug, Clone)]
pub enum Request {
    SendData(DataRequest),
    GetConfigs {
        request_id: u64,
        gateway_id: String,
    },
    OtapStatus {
        request_id: u64,
        gateway_id: String,
        sink_id: String,
    },
    ProcessScratchpad {
        request_id: u64,
        gateway_id: String,
        sink_id: String,
    },
    UploadScratchpad {
        request_id: u64,
        gateway_id: String,
        sink_id: String,
        sequence: u8,
        image: Bytes,
    },
    SetAppConfig {
        request_id: u64,
        gateway_id: String,
        sink_id: String,
        sequence: u8,
        diag_interval_secs: u16,
        data: Bytes,
    },
    /// Retained clear event wiping a dead gateway off the broker.
    ClearGateway {
        gateway_id: String,
    },
}

impl Request {
    /// Request id for commands that expect an acknowledgement.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Request::SendData(req) => Some(req.request_id),
            Request::GetConfigs { request_id, .. }
            | Request::OtapStatus { request_id, .. }
            | Request::ProcessScratchpad { request_id, .. }
            | Request::UploadScratchpad { request_id, .. }
            | Request::SetAppConfig { request_id, .. } => Some(*request_id),
            Request::ClearGateway { .. } => None,
        }
    }

    pub fn gateway_id(&self) -> &str {
        match self {
            Request::SendData(req) => &req.gateway_id,
            Request::GetConfigs { gateway_id, .. }
            | Request::OtapStatus { gateway_id, .. }
            | Request::ProcessScratchpad { gateway_id, .. }
            | Request::UploadScratchpad { gateway_id, .. }
            | Request::SetAppConfig { gateway_id, .. }
            | Request::ClearGateway { gateway_id } => gateway_id,
        }
    }
}

/// Uplink data message from one mesh node.
#[derive(Debug, Clone)]
pub struct DataMessage {
    pub gateway_id: String,
    pub sink_id: String,
    pub network_id: Option<u32>,
    pub source_address: u32,
    pub source_endpoint: u8,
    pub destination_endpoint: u8,
    pub travel_time_ms: u64,
    pub hop_count: u32,
    pub payload: Bytes,
}

impl DataMessage {
    /// Machine-readable dump of the envelope, payload hex encoded.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "gw_id": self.gateway_id,
            "sink_id": self.sink_id,
            "network_id": self.network_id,
            "source_address": self.source_address,
            "source_endpoint": self.source_endpoint,
            "destination_endpoint": self.destination_endpoint,
            "travel_time_ms": self.travel_time_ms,
            "hop_count": self.hop_count,
            "payload": hex::encode(&self.payload),
        })
    }
}

/// Gateway liveness event.
#[derive(Debug, Clone)]
pub struct EventMessage {
    pub gateway_id: String,
    pub online: bool,
}

/// Sink configuration block returned by a configuration fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub sink_id: String,
    pub node_address: u32,
    pub network_address: u32,
    pub network_channel: u8,
    pub node_role: u8,
    pub started: bool,
    pub app_config_seq: u8,
    pub app_config_diag: u16,
    pub app_config_data: Bytes,
    pub firmware_version: [u8; 4],
}

/// Sink-local scratchpad report from the otap status command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchpadInfo {
    pub stored_seq: u8,
    pub stored_crc: u16,
    pub stored_len: u32,
    pub stored_status: String,
    pub stored_type: String,
    pub processed_seq: u8,
    pub processed_crc: u16,
    pub processed_len: u32,
    pub firmware_area_id: u32,
}

/// Acknowledgement / response envelope from a gateway.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub request_id: u64,
    pub gateway_id: String,
    pub result: ResultCode,
    pub configs: Option<Vec<SinkConfig>>,
    pub scratchpad: Option<ScratchpadInfo>,
}

impl GatewayResponse {
    /// Plain acknowledgement with no attached body.
    pub fn ack(request_id: u64, gateway_id: impl Into<String>, result: ResultCode) -> Self {
        Self {
            request_id,
            gateway_id: gateway_id.into(),
            result,
            configs: None,
            scratchpad: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("transport backend is gone")]
    Closed,

    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),
}

/// The console's half of the link.
#[derive(Debug)]
pub struct GatewayLink {
    request_tx: mpsc::UnboundedSender<Request>,
    data_rx: mpsc::UnboundedReceiver<DataMessage>,
    event_rx: mpsc::UnboundedReceiver<EventMessage>,
    response_rx: mpsc::UnboundedReceiver<GatewayResponse>,
}

/// The transport's half of the link.
#[derive(Debug)]
pub struct LinkBackend {
    pub request_rx: mpsc::UnboundedReceiver<Request>,
    pub data_tx: mpsc::UnboundedSender<DataMessage>,
    pub event_tx: mpsc::UnboundedSender<EventMessage>,
    pub response_tx: mpsc::UnboundedSender<GatewayResponse>,
}

impl GatewayLink {
    /// Create both halves of a link.
    pub fn channel() -> (GatewayLink, LinkBackend) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        (
            GatewayLink {
                request_tx,
                data_rx,
                event_rx,
                response_rx,
            },
            LinkBackend {
                request_rx,
                data_tx,
                event_tx,
                response_tx,
            },
        )
    }

    /// Place a request on the outbound queue.
    pub fn publish(&self, request: Request) -> Result<(), LinkError> {
        log::debug!(
            "publish request to gateway {} (id {:?})",
            request.gateway_id(),
            request.request_id()
        );
        self.request_tx.send(request).map_err(|_| LinkError::Closed)
    }

    /// Clone of the outbound sender, for tasks that publish concurrently.
    pub fn request_sender(&self) -> mpsc::UnboundedSender<Request> {
        self.request_tx.clone()
    }

    /// Wait for the acknowledgement matching `request_id` from `gateway_id`.
    /// Responses for other requests are stale answers to earlier commands
    /// and are discarded.
    pub async fn wait_for_response(
        &mut self,
        gateway_id: &str,
        request_id: u64,
        wait: Duration,
    ) -> Result<GatewayResponse, LinkError> {
        let fut = async {
            loop {
                match self.response_rx.recv().await {
                    Some(resp)
                        if resp.request_id == request_id && resp.gateway_id == gateway_id =>
                    {
                        return Ok(resp);
                    }
                    Some(resp) => {
                        log::debug!(
                            "discarding stale response for request {} from {}",
                            resp.request_id,
                            resp.gateway_id
                        );
                    }
                    None => return Err(LinkError::Closed),
                }
            }
        };
        match timeout(wait, fut).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::AckTimeout(wait)),
        }
    }

    /// The inbound data queue, for the aggregation loop.
    pub fn data_rx(&mut self) -> &mut mpsc::UnboundedReceiver<DataMessage> {
        &mut self.data_rx
    }

    /// Drain whatever data messages are queued right now, without waiting.
    pub fn drain_data(&mut self) -> Vec<DataMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.data_rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Drain whatever events are queued right now, without waiting.
    pub fn drain_events(&mut self) -> Vec<EventMessage> {
        let mut out = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            out.push(event);
        }
        out
    }

    /// Next already-queued response, if any.
    pub fn try_next_response(&mut self) -> Option<GatewayResponse> {
        self.response_rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_response_skips_stale_answers() {
        let (mut link, backend) = GatewayLink::channel();
        backend
            .response_tx
            .send(GatewayResponse::ack(1, "gw", ResultCode::Ok))
            .unwrap();
        backend
            .response_tx
            .send(GatewayResponse::ack(2, "gw", ResultCode::InvalidParam))
            .unwrap();

        let resp = link
            .wait_for_response("gw", 2, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resp.result, ResultCode::InvalidParam);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_response_times_out() {
        let (mut link, _backend) = GatewayLink::channel();
        let err = link
            .wait_for_response("gw", 1, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, LinkError::AckTimeout(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn wait_for_response_reports_closed_backend() {
        let (mut link, backend) = GatewayLink::channel();
        drop(backend);
        let err = link
            .wait_for_response("gw", 1, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, LinkError::Closed);
    }

    #[test]
    fn request_ids_are_unique() {
        let a = next_request_id();
        let b = next_request_id();
        assert_ne!(a, b);
    }

    #[test]
    fn diagnostic_request_uses_protocol_constants() {
        let req = DataRequest::diagnostic("gw", "sink", BROADCAST_ADDRESS, Bytes::new());
        assert_eq!(req.source_endpoint, SOURCE_ENDPOINT);
        assert_eq!(req.destination_endpoint, DIAGNOSTIC_CONTROL_ENDPOINT);
        assert_eq!(req.qos, QosLevel::ExactlyOnce);
    }
}
