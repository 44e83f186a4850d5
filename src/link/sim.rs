//! Simulated gateway backend.
//!
//! Drives the [`LinkBackend`] half of a link with one make-believe gateway,
//! one sink and a handful of nodes, so the console can be exercised end to
//! end without a broker. Every maintenance record a request carries gets a
//! well-formed success reply from each simulated node.

use bytes::{Bytes, BytesMut};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::msap;
use crate::msap::{
    BeginResp, CancelResp, EndResp, PingResp, ScratchpadUpdateResp, StatusResp, UpdateResp,
};

use super::{
    DataMessage, EventMessage, GatewayResponse, LinkBackend, Request, ResultCode, SinkConfig,
    ScratchpadInfo, BROADCAST_ADDRESS, DIAGNOSTIC_CONTROL_ENDPOINT, SOURCE_ENDPOINT,
};

/// Shape of the simulated topology.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub gateway_id: String,
    pub sink_id: String,
    pub network_id: u32,
    /// Mesh node address of the sink itself.
    pub sink_node_address: u32,
    /// Addresses of the simulated nodes behind the sink.
    pub node_addresses: Vec<u32>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            gateway_id: "sim-gw".to_string(),
            sink_id: "sink0".to_string(),
            network_id: 0x2001,
            sink_node_address: 1,
            node_addresses: (0..8).map(|i| 0x6001 + i).collect(),
        }
    }
}

/// Run the simulator until the console side hangs up.
pub fn spawn(mut backend: LinkBackend, config: SimConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _ = backend.event_tx.send(EventMessage {
            gateway_id: config.gateway_id.clone(),
            online: true,
        });

        while let Some(request) = backend.request_rx.recv().await {
            handle_request(&backend, &config, request).await;
        }
        log::debug!("simulator exiting: console side closed the link");
    })
}

async fn handle_request(backend: &LinkBackend, config: &SimConfig, request: Request) {
    match request {
        Request::GetConfigs {
            request_id,
            gateway_id,
        } => {
            let mut resp = GatewayResponse::ack(request_id, &gateway_id, ResultCode::Ok);
            resp.configs = Some(vec![sink_config(config)]);
            let _ = backend.response_tx.send(resp);
        }
        Request::OtapStatus {
            request_id,
            gateway_id,
            ..
        } => {
            let mut resp = GatewayResponse::ack(request_id, &gateway_id, ResultCode::Ok);
            resp.scratchpad = Some(scratchpad_info());
            let _ = backend.response_tx.send(resp);
        }
        Request::ProcessScratchpad {
            request_id,
            gateway_id,
            ..
        }
        | Request::UploadScratchpad {
            request_id,
            gateway_id,
            ..
        }
        | Request::SetAppConfig {
            request_id,
            gateway_id,
            ..
        } => {
            sleep(Duration::from_millis(30)).await;
            let _ = backend
                .response_tx
                .send(GatewayResponse::ack(request_id, &gateway_id, ResultCode::Ok));
        }
        Request::ClearGateway { gateway_id } => {
            log::debug!("simulator: retained clear for gateway {gateway_id}");
        }
        Request::SendData(req) => {
            let _ = backend.response_tx.send(GatewayResponse::ack(
                req.request_id,
                &req.gateway_id,
                ResultCode::Ok,
            ));
            if req.destination_endpoint != DIAGNOSTIC_CONTROL_ENDPOINT {
                return;
            }
            let Some(reply) = reply_payload(&req.payload) else {
                return;
            };
            let responders: Vec<u32> = if req.destination == BROADCAST_ADDRESS {
                config.node_addresses.clone()
            } else if req.destination == config.sink_node_address {
                vec![config.sink_node_address]
            } else {
                config
                    .node_addresses
                    .iter()
                    .copied()
                    .filter(|a| *a == req.destination)
                    .collect()
            };
            for (i, address) in responders.into_iter().enumerate() {
                let hops = 1 + (i as u32 % 5);
                // rng stays out of scope across the await below
                let travel_time_ms: u64 =
                    rand::thread_rng().gen_range(20..400) * u64::from(hops);
                let jitter_ms: u64 = rand::thread_rng().gen_range(10..80);
                let message = DataMessage {
                    gateway_id: req.gateway_id.clone(),
                    sink_id: req.sink_id.clone(),
                    network_id: Some(config.network_id),
                    source_address: address,
                    source_endpoint: DIAGNOSTIC_CONTROL_ENDPOINT,
                    destination_endpoint: SOURCE_ENDPOINT,
                    travel_time_ms,
                    hop_count: hops,
                    payload: reply.clone(),
                };
                sleep(Duration::from_millis(jitter_ms)).await;
                if backend.data_tx.send(message).is_err() {
                    return;
                }
            }
        }
    }
}

/// Map each request record in the payload to its success reply record.
/// Returns `None` for payloads that aren't maintenance records.
fn reply_payload(payload: &[u8]) -> Option<Bytes> {
    let mut out = BytesMut::new();
    let mut pos = 0;
    while pos < payload.len() {
        if payload.len() - pos < msap::HEADER_LEN {
            return None;
        }
        let op = payload[pos];
        let declared = payload[pos + 1] as usize;
        let end = pos + msap::HEADER_LEN + declared;
        if end > payload.len() {
            return None;
        }
        let record = &payload[pos..end];
        let reply = match op {
            msap::OP_PING => {
                let mut reference = [0u8; 4];
                if declared != 4 {
                    return None;
                }
                reference.copy_from_slice(&record[2..6]);
                PingResp::record(reference)
            }
            msap::OP_BEGIN => BeginResp::record(0),
            msap::OP_END => EndResp::record(0),
            msap::OP_CANCEL => CancelResp::record(0),
            msap::OP_UPDATE => UpdateResp::record(0),
            msap::OP_SCRATCHPAD_UPDATE => ScratchpadUpdateResp::record(0),
            msap::OP_SCRATCHPAD_STATUS => node_status().record(),
            _ => return None,
        };
        out.extend_from_slice(&reply);
        pos = end;
    }
    if out.is_empty() {
        None
    } else {
        Some(out.freeze())
    }
}

fn node_status() -> StatusResp {
    StatusResp {
        stored_seq: 7,
        stored_crc: 0xe302,
        stored_len: 98_304,
        stored_status: 0xff,
        stored_type: 1,
        processed_seq: 7,
        processed_crc: 0xe302,
        processed_len: 98_304,
        firmware_area_id: 0x103,
        firmware_version: [5, 1, 0, 12],
        app_processed_seq: 7,
        app_area_id: 0x204,
        app_version: [2, 0, 3, 1],
    }
}

fn sink_config(config: &SimConfig) -> SinkConfig {
    SinkConfig {
        sink_id: config.sink_id.clone(),
        node_address: config.sink_node_address,
        network_address: config.network_id,
        network_channel: 3,
        node_role: 4,
        started: true,
        app_config_seq: 3,
        app_config_diag: 60,
        app_config_data: Bytes::from_static(&[0x00, 0x11]),
        firmware_version: [5, 1, 0, 12],
    }
}

fn scratchpad_info() -> ScratchpadInfo {
    ScratchpadInfo {
        stored_seq: 7,
        stored_crc: 0xe302,
        stored_len: 98_304,
        stored_status: "new".to_string(),
        stored_type: "present".to_string(),
        processed_seq: 7,
        processed_crc: 0xe302,
        processed_len: 98_304,
        firmware_area_id: 0x103,
    }
}
