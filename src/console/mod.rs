//! The operator console: command orchestration over the topology model,
//! the maintenance codecs and the aggregation engine.
//!
//! Each command is an async method that resolves its target through the
//! current [`Selection`], builds its request(s), publishes them on the
//! [`GatewayLink`], waits for the gateway acknowledgement, and — for the
//! broadcast commands — drives a [`SilenceWindow`] over the inbound data
//! queue. Methods return typed reports; the interactive shell in
//! [`Console::run`] does all the printing. Nothing in here retries, and
//! nothing in here panics on a failed command: failures surface as a
//! rendered status line.

use std::collections::BTreeMap;
use std::io::Write as _;

use bytes::Bytes;
use log::{debug, warn};
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio::time::Duration;

use crate::aggregate::{HopHistogram, NodeTally, RatioTally, SilenceWindow, WindowStats};
use crate::config::Config;
use crate::diag::{self, DiagInterval, DiagTarget};
use crate::link::{
    DataRequest, GatewayLink, LinkError, Request, ResultCode, ScratchpadInfo, SinkConfig,
    BROADCAST_ADDRESS, DIAGNOSTIC_CONTROL_ENDPOINT,
};
use crate::msap::combo::{build_combo, ComboError, ComboReply};
use crate::msap::{
    self, BeginReq, CancelReq, CancelResp, EndReq, PingReq, PingResp, ScratchpadUpdateReq,
    StatusReq, StatusResp, UpdateReq,
};
use crate::topology::{
    sort_sinks_by_device_id, DeviceRegistry, Gateway, GatewayState, SelectionError, Selection,
    Sink,
};
use crate::validation::{self, ArgError};

pub mod render;

/// Why a command failed. Every variant renders as one operator-facing line.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("set sink first ({0})")]
    Selection(#[from] SelectionError),

    #[error("invalid argument: {0}")]
    Arg(#[from] ArgError),

    #[error("cannot build request: {0}")]
    Build(#[from] ComboError),

    #[error("{0}")]
    Link(#[from] LinkError),

    #[error("gateway reported [{0}]")]
    GatewayResult(ResultCode),

    #[error("gateway reported invalid sequence number; check the current one with 'gateway_configuration'")]
    InvalidSequence,

    #[error("sink node address lookup failed")]
    NoSinkAddress,

    #[error("cannot read scratchpad file '{path}': {source}")]
    ScratchpadFile {
        path: String,
        source: std::io::Error,
    },
}

fn ensure_ok(result: ResultCode) -> Result<(), CommandError> {
    match result {
        ResultCode::Ok => Ok(()),
        ResultCode::InvalidSequenceNumber => Err(CommandError::InvalidSequence),
        other => Err(CommandError::GatewayResult(other)),
    }
}

/// Result of a broadcast ping sweep.
#[derive(Debug)]
pub struct PingReport {
    pub responded: NodeTally,
    pub histogram: HopHistogram,
    pub stats: WindowStats,
}

/// Result of a broadcast cancel sweep.
#[derive(Debug)]
pub struct CancelReport {
    pub responded: NodeTally,
    pub stats: WindowStats,
}

/// Result of the packed update sequence sweep.
#[derive(Debug)]
pub struct UpdateNodesReport {
    pub responded: NodeTally,
    /// Nodes that answered on the maintenance endpoint with a reply that
    /// failed the combo check.
    pub rejected: Vec<u32>,
    pub countdown_secs: u16,
    pub stats: WindowStats,
}

/// Result of the network-wide scratchpad status sweep.
#[derive(Debug)]
pub struct CheckAllReport {
    /// Latest status per node, sorted by address.
    pub statuses: BTreeMap<u32, StatusResp>,
    /// Node addresses in order of first appearance.
    pub arrival: Vec<u32>,
    pub stored: RatioTally,
    pub processed: RatioTally,
    pub stats: WindowStats,
}

/// Arguments for the raw send_data command.
#[derive(Debug, Clone)]
pub struct SendDataArgs {
    pub destination: u32,
    pub source_endpoint: u8,
    pub destination_endpoint: u8,
    pub payload: Vec<u8>,
}

pub struct Console {
    config: Config,
    registry: DeviceRegistry,
    selection: Selection,
    link: GatewayLink,
}

impl Console {
    pub fn new(config: Config, link: GatewayLink) -> Self {
        Self {
            config,
            registry: DeviceRegistry::new(),
            selection: Selection::new(),
            link,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut Selection {
        &mut self.selection
    }

    fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.config.console.ack_timeout_secs)
    }

    fn silence(&self) -> Duration {
        Duration::from_secs(self.config.console.silence_timeout_secs)
    }

    /// Fold queued gateway liveness events into the registry.
    pub fn absorb_events(&mut self) {
        for event in self.link.drain_events() {
            let state = if event.online {
                GatewayState::Online
            } else {
                GatewayState::Offline
            };
            let known = self
                .registry
                .gateways()
                .iter()
                .find(|g| g.device_id == event.gateway_id)
                .cloned();
            match known {
                Some(mut gateway) => {
                    gateway.state = state;
                    self.registry.upsert_gateway(gateway);
                }
                None => self.registry.upsert_gateway(Gateway {
                    device_id: event.gateway_id,
                    state,
                    sinks: Vec::new(),
                }),
            }
        }
    }

    // ---- gateway configuration -------------------------------------------

    async fn fetch_configs(&mut self, gateway_id: &str) -> Result<Vec<SinkConfig>, CommandError> {
        let request_id = crate::link::next_request_id();
        self.link.publish(Request::GetConfigs {
            request_id,
            gateway_id: gateway_id.to_string(),
        })?;
        let response = self
            .link
            .wait_for_response(gateway_id, request_id, self.ack_wait())
            .await?;
        ensure_ok(response.result)?;
        Ok(response.configs.unwrap_or_default())
    }

    fn apply_configs(&mut self, gateway_id: &str, configs: &[SinkConfig]) {
        for config in configs {
            self.registry.upsert_sink(Sink::new(
                &config.sink_id,
                gateway_id,
                config.network_address,
            ));
        }
    }

    /// Fetch and absorb the configuration of the selected gateway, or of
    /// every online gateway when none is selected. Gateways that fail to
    /// answer are skipped with a warning; they don't fail the sweep.
    pub async fn gateway_configuration(
        &mut self,
    ) -> Result<Vec<(String, Vec<SinkConfig>)>, CommandError> {
        let targets: Vec<String> = match self.selection.gateway() {
            Some(gateway) => vec![gateway.device_id.clone()],
            None => self
                .registry
                .online_gateways()
                .iter()
                .map(|g| g.device_id.clone())
                .collect(),
        };
        let mut out = Vec::new();
        for gateway_id in targets {
            match self.fetch_configs(&gateway_id).await {
                Ok(configs) => {
                    self.apply_configs(&gateway_id, &configs);
                    out.push((gateway_id, configs));
                }
                Err(e) => warn!("configuration fetch from {} failed: {}", gateway_id, e),
            }
        }
        Ok(out)
    }

    /// Mesh network address of a sink, resolved through its gateway's
    /// configuration. Needed to address a unicast at the sink itself.
    async fn lookup_node_address(
        &mut self,
        gateway_id: &str,
        sink_id: &str,
    ) -> Result<u32, CommandError> {
        let configs = self.fetch_configs(gateway_id).await?;
        self.apply_configs(gateway_id, &configs);
        configs
            .iter()
            .find(|c| c.sink_id == sink_id)
            .map(|c| c.node_address)
            .ok_or(CommandError::NoSinkAddress)
    }

    // ---- the four broadcast commands -------------------------------------

    /// Ping every node behind the selected sink and histogram the replies
    /// by hop count.
    pub async fn ping(&mut self) -> Result<PingReport, CommandError> {
        let target = self.selection.target()?;
        let req = PingReq::new();
        let reference = req.reference();
        let payload = msap::encode_single(&req)?;
        let request =
            DataRequest::diagnostic(&target.gateway_id, &target.sink_id, BROADCAST_ADDRESS, payload);
        let request_id = request.request_id;
        self.link.publish(Request::SendData(request))?;

        let ack = self
            .link
            .wait_for_response(&target.gateway_id, request_id, self.ack_wait())
            .await?;
        ensure_ok(ack.result)?;

        let mut responded = NodeTally::new();
        let mut histogram =
            HopHistogram::with_base_size(self.config.console.histogram_base_size);
        let stats = SilenceWindow::new(self.silence())
            .collect(self.link.data_rx(), |msg| {
                if msg.source_endpoint != DIAGNOSTIC_CONTROL_ENDPOINT {
                    return false;
                }
                match PingResp::decode(&msg.payload) {
                    Ok(resp) if resp.reference() == reference => {
                        responded.record(msg.source_address);
                        histogram.record(msg.hop_count);
                        debug!(
                            "ping reply from {} after {} hops ({} ms)",
                            msg.source_address, msg.hop_count, msg.travel_time_ms
                        );
                        true
                    }
                    _ => false,
                }
            })
            .await;

        Ok(PingReport {
            responded,
            histogram,
            stats,
        })
    }

    /// Broadcast a cancel to every node behind the selected sink.
    pub async fn send_msap_cancel(&mut self) -> Result<CancelReport, CommandError> {
        let target = self.selection.target()?;
        let payload = msap::encode_single(&CancelReq)?;
        let request =
            DataRequest::diagnostic(&target.gateway_id, &target.sink_id, BROADCAST_ADDRESS, payload);
        let request_id = request.request_id;
        self.link.publish(Request::SendData(request))?;

        let ack = self
            .link
            .wait_for_response(&target.gateway_id, request_id, self.ack_wait())
            .await?;
        ensure_ok(ack.result)?;

        let mut responded = NodeTally::new();
        let stats = SilenceWindow::new(self.silence())
            .collect(self.link.data_rx(), |msg| {
                if msg.source_endpoint != DIAGNOSTIC_CONTROL_ENDPOINT {
                    return false;
                }
                match CancelResp::decode(&msg.payload) {
                    Ok(resp) if resp.is_ok() => {
                        responded.record(msg.source_address);
                        true
                    }
                    _ => false,
                }
            })
            .await;

        Ok(CancelReport { responded, stats })
    }

    /// Ask every node behind the selected sink to take the scratchpad with
    /// the given sequence into use: one packed cancel/begin/mark/end/update
    /// transmission, answered by a combo reply.
    ///
    /// The sequence argument is validated before any request is built.
    pub async fn scratchpad_update_only_nodes(
        &mut self,
        seq_arg: &str,
    ) -> Result<UpdateNodesReport, CommandError> {
        let seq = validation::parse_sequence(seq_arg)?;
        let target = self.selection.target()?;
        let countdown_secs = self.config.console.update_countdown_secs;

        let cancel = CancelReq;
        let begin = BeginReq;
        let mark = ScratchpadUpdateReq::new(seq);
        let end = EndReq;
        let update = UpdateReq::new(countdown_secs);
        let payload = build_combo(&[&cancel, &begin, &mark, &end, &update])?;

        let request =
            DataRequest::diagnostic(&target.gateway_id, &target.sink_id, BROADCAST_ADDRESS, payload);
        let request_id = request.request_id;
        self.link.publish(Request::SendData(request))?;

        let ack = self
            .link
            .wait_for_response(&target.gateway_id, request_id, self.ack_wait())
            .await?;
        ensure_ok(ack.result)?;

        // Nodes sit out the countdown before answering; wait twice that.
        let silence = Duration::from_secs(u64::from(countdown_secs) * 2);
        let parser = ComboReply::update_combo();
        let mut responded = NodeTally::new();
        let mut rejected = Vec::new();
        let stats = SilenceWindow::new(silence)
            .collect(self.link.data_rx(), |msg| {
                if msg.source_endpoint != DIAGNOSTIC_CONTROL_ENDPOINT {
                    return false;
                }
                if parser.parse(&msg.payload) {
                    responded.record(msg.source_address);
                    true
                } else {
                    rejected.push(msg.source_address);
                    false
                }
            })
            .await;

        Ok(UpdateNodesReport {
            responded,
            rejected,
            countdown_secs,
            stats,
        })
    }

    /// Collect the scratchpad status of every node behind the selected sink,
    /// the sink itself included (it gets its own unicast).
    pub async fn scratchpad_check_all(&mut self) -> Result<CheckAllReport, CommandError> {
        let target = self.selection.target()?;
        let sink_address = self
            .lookup_node_address(&target.gateway_id, &target.sink_id)
            .await?;

        let payload = msap::encode_single(&StatusReq)?;
        let broadcast = DataRequest::diagnostic(
            &target.gateway_id,
            &target.sink_id,
            BROADCAST_ADDRESS,
            payload.clone(),
        );
        let unicast =
            DataRequest::diagnostic(&target.gateway_id, &target.sink_id, sink_address, payload);
        let broadcast_id = broadcast.request_id;
        let unicast_id = unicast.request_id;
        self.link.publish(Request::SendData(broadcast))?;
        self.link.publish(Request::SendData(unicast))?;

        let broadcast_ack = self
            .link
            .wait_for_response(&target.gateway_id, broadcast_id, self.ack_wait())
            .await;
        let unicast_ack = self
            .link
            .wait_for_response(&target.gateway_id, unicast_id, self.ack_wait())
            .await;

        let ok = |ack: &Result<crate::link::GatewayResponse, LinkError>| {
            matches!(ack, Ok(resp) if resp.result == ResultCode::Ok)
        };
        // One accepted publish is enough to arm the window; a lone failure
        // only costs the sink's own row.
        if !ok(&broadcast_ack) && !ok(&unicast_ack) {
            return Err(match broadcast_ack {
                Ok(resp) => CommandError::GatewayResult(resp.result),
                Err(e) => e.into(),
            });
        }
        if !ok(&broadcast_ack) || !ok(&unicast_ack) {
            warn!("one of the two status publishes was not accepted");
        }

        let mut statuses: BTreeMap<u32, StatusResp> = BTreeMap::new();
        let mut arrival = Vec::new();
        let mut stored = RatioTally::new();
        let mut processed = RatioTally::new();
        let stats = SilenceWindow::new(self.silence())
            .collect(self.link.data_rx(), |msg| {
                if msg.source_endpoint != DIAGNOSTIC_CONTROL_ENDPOINT {
                    return false;
                }
                match StatusResp::decode(&msg.payload) {
                    Ok(status) => {
                        if !statuses.contains_key(&msg.source_address) {
                            arrival.push(msg.source_address);
                        }
                        statuses.insert(msg.source_address, status);
                        stored.record(render::stored_key(&status));
                        processed.record(render::processed_key(&status));
                        true
                    }
                    Err(_) => false,
                }
            })
            .await;

        Ok(CheckAllReport {
            statuses,
            arrival,
            stored,
            processed,
            stats,
        })
    }

    // ---- sink-directed commands ------------------------------------------

    /// Scratchpad report of the selected sink itself.
    pub async fn scratchpad_check_sink(&mut self) -> Result<ScratchpadInfo, CommandError> {
        let target = self.selection.target()?;
        let request_id = crate::link::next_request_id();
        self.link.publish(Request::OtapStatus {
            request_id,
            gateway_id: target.gateway_id.clone(),
            sink_id: target.sink_id,
        })?;
        let response = self
            .link
            .wait_for_response(&target.gateway_id, request_id, self.ack_wait())
            .await?;
        ensure_ok(response.result)?;
        response
            .scratchpad
            .ok_or(CommandError::GatewayResult(ResultCode::InternalError))
    }

    /// Ask the selected sink to process its stored scratchpad.
    pub async fn scratchpad_update_only_sink(&mut self) -> Result<(), CommandError> {
        let target = self.selection.target()?;
        let request_id = crate::link::next_request_id();
        self.link.publish(Request::ProcessScratchpad {
            request_id,
            gateway_id: target.gateway_id.clone(),
            sink_id: target.sink_id,
        })?;
        // Processing reboots the sink stack; give it a minute.
        let response = self
            .link
            .wait_for_response(&target.gateway_id, request_id, Duration::from_secs(60))
            .await?;
        ensure_ok(response.result)
    }

    /// Upload a scratchpad image file to the selected sink.
    pub async fn scratchpad_upload_to_sink(
        &mut self,
        path: &str,
        seq_arg: &str,
    ) -> Result<(), CommandError> {
        let sequence = validation::parse_sequence(seq_arg)?;
        let target = self.selection.target()?;
        let image = tokio::fs::read(path)
            .await
            .map_err(|source| CommandError::ScratchpadFile {
                path: path.to_string(),
                source,
            })?;
        let request_id = crate::link::next_request_id();
        self.link.publish(Request::UploadScratchpad {
            request_id,
            gateway_id: target.gateway_id.clone(),
            sink_id: target.sink_id,
            sequence,
            image: Bytes::from(image),
        })?;
        let response = self
            .link
            .wait_for_response(&target.gateway_id, request_id, Duration::from_secs(60))
            .await?;
        ensure_ok(response.result)
    }

    /// Write a new app config to the selected sink.
    pub async fn set_app_config(
        &mut self,
        seq_arg: &str,
        data_hex: &str,
        diag_interval_secs: u16,
    ) -> Result<(), CommandError> {
        let sequence = validation::parse_sequence(seq_arg)?;
        let data = validation::parse_hex_payload(data_hex)?;
        let target = self.selection.target()?;
        let request_id = crate::link::next_request_id();
        self.link.publish(Request::SetAppConfig {
            request_id,
            gateway_id: target.gateway_id.clone(),
            sink_id: target.sink_id,
            sequence,
            diag_interval_secs,
            data: Bytes::from(data),
        })?;
        let response = self
            .link
            .wait_for_response(&target.gateway_id, request_id, Duration::from_secs(30))
            .await?;
        ensure_ok(response.result)
    }

    /// Send a raw payload to an explicit address and endpoint pair.
    pub async fn send_data(&mut self, args: SendDataArgs) -> Result<(), CommandError> {
        let target = self.selection.target()?;
        let mut request = DataRequest::diagnostic(
            &target.gateway_id,
            &target.sink_id,
            args.destination,
            Bytes::from(args.payload),
        );
        request.source_endpoint = args.source_endpoint;
        request.destination_endpoint = args.destination_endpoint;
        let request_id = request.request_id;
        self.link.publish(Request::SendData(request))?;
        let response = self
            .link
            .wait_for_response(&target.gateway_id, request_id, self.ack_wait())
            .await?;
        ensure_ok(response.result)
    }

    /// Emit a retained clear for every offline gateway and drop them from
    /// the registry. Returns how many were cleared.
    pub fn clear_offline_gateways(&mut self) -> Result<u32, CommandError> {
        let offline: Vec<String> = self
            .registry
            .gateways()
            .iter()
            .filter(|g| g.state == GatewayState::Offline)
            .map(|g| g.device_id.clone())
            .collect();
        for gateway_id in &offline {
            self.link.publish(Request::ClearGateway {
                gateway_id: gateway_id.clone(),
            })?;
            self.registry.remove_gateway(gateway_id);
        }
        Ok(offline.len() as u32)
    }

    /// Configure neighbor diagnostics across every sink of one network.
    pub async fn set_ndiag(
        &mut self,
        network_id: u32,
        interval: DiagInterval,
    ) -> Result<diag::DiagReport, CommandError> {
        let fetched = self.gateway_configuration().await?;
        let mut targets = Vec::new();
        for (gateway_id, configs) in &fetched {
            for config in configs {
                if config.network_address == network_id {
                    targets.push(DiagTarget {
                        gateway_id: gateway_id.clone(),
                        sink_id: config.sink_id.clone(),
                        node_address: config.node_address,
                        next_seq: config.app_config_seq.wrapping_add(1),
                        app_config_data: config.app_config_data.clone(),
                    });
                }
            }
        }
        if targets.is_empty() {
            return Err(CommandError::NoSinkAddress);
        }
        let ack_wait = self.ack_wait();
        let report = diag::run(&mut self.link, targets, interval, ack_wait).await?;
        Ok(report)
    }

    // ---- interactive selection -------------------------------------------

    fn pick_gateway(&mut self) -> anyhow::Result<()> {
        let online: Vec<Gateway> = self
            .registry
            .online_gateways()
            .into_iter()
            .cloned()
            .collect();
        let mut items: Vec<String> = online.iter().map(|g| g.device_id.clone()).collect();
        items.push("custom gateway id".to_string());

        let choice = dialoguer::Select::new()
            .with_prompt("Select gateway")
            .items(&items)
            .default(0)
            .interact_opt()?;
        match choice {
            Some(index) if index < online.len() => {
                self.selection.select_gateway(online[index].clone());
            }
            Some(_) => {
                let id: String = dialoguer::Input::new()
                    .with_prompt("Custom gateway id")
                    .interact_text()?;
                self.selection.select_gateway(Gateway::custom(id));
            }
            // Declined: the selection simply stays unset.
            None => {}
        }
        Ok(())
    }

    fn pick_sink(&mut self) -> anyhow::Result<()> {
        if self.selection.gateway().is_none() {
            self.pick_gateway()?;
        }
        let Some(gateway) = self.selection.gateway() else {
            return Ok(());
        };
        let gateway_id = gateway.device_id.clone();
        let sinks: Vec<Sink> = sort_sinks_by_device_id(self.registry.sinks_of_gateway(&gateway_id))
            .into_iter()
            .cloned()
            .collect();

        let mut items: Vec<String> = sinks
            .iter()
            .map(|s| match s.network_id {
                Some(network) => format!("{} ( {} )", s.device_id, network),
                None => s.device_id.clone(),
            })
            .collect();
        items.push("custom sink id".to_string());

        let choice = dialoguer::Select::new()
            .with_prompt(format!("Select sink of gateway {}", gateway_id))
            .items(&items)
            .default(0)
            .interact_opt()?;
        let picked = match choice {
            Some(index) if index < sinks.len() => Some(sinks[index].clone()),
            Some(_) => {
                let id: String = dialoguer::Input::new()
                    .with_prompt("Custom sink id")
                    .interact_text()?;
                Some(Sink::custom(id))
            }
            None => None,
        };
        if let Some(sink) = picked {
            if let Err(e) = self.selection.select_sink(sink) {
                println!("Command FAIL. {e}");
            }
        }
        Ok(())
    }

    // ---- interactive shell -----------------------------------------------

    fn prompt(&self) -> String {
        let mut name = "meshops".to_string();
        if let Some(gateway) = self.selection.gateway() {
            name = format!("{}:{}", name, gateway.device_id);
        }
        if let Some(sink) = self.selection.sink() {
            name = format!("{}:{}", name, sink.device_id);
        }
        format!("{} | {} > ", chrono::Local::now().format("%H:%M.%S"), name)
    }

    /// Run the interactive shell until EOF or `quit`.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        println!(
            "Welcome to the meshops console!\n\
             Broker {}@{}:{} (unsecure: {})\n\n\
             Type help or ? to list commands. CTRL-D or q to exit.\n",
            self.config.mqtt.username,
            self.config.mqtt.host,
            self.config.mqtt.port,
            self.config.mqtt.force_unsecure,
        );

        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        loop {
            self.absorb_events();
            print!("{}", self.prompt());
            let _ = std::io::stdout().flush();
            let Some(line) = lines.next_line().await? else {
                break;
            };
            if !self.dispatch(line.trim()).await {
                break;
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return true;
        };
        let args: Vec<&str> = parts.collect();
        match command {
            "quit" | "q" | "bye" => return false,
            "help" | "?" => print_help(),
            "selection" => self.print_selection(),
            "gateways" => self.print_gateways(),
            "sinks" => self.print_sinks(),
            "nodes" => self.print_nodes(),
            "networks" => self.print_networks(),
            "set_gateway" => {
                if let Err(e) = self.pick_gateway() {
                    println!("Command FAIL. {e}");
                }
            }
            "set_sink" => {
                if let Err(e) = self.pick_sink() {
                    println!("Command FAIL. {e}");
                }
            }
            "clear_offline_gateways" => match self.clear_offline_gateways() {
                Ok(0) => println!("Command OK. No action needed."),
                Ok(n) => println!("Command OK. Offline gateway count was {n}."),
                Err(e) => println!("Command FAIL. {e}"),
            },
            "gateway_configuration" => match self.gateway_configuration().await {
                Ok(fetched) => {
                    for (gateway_id, configs) in fetched {
                        println!("\nConfiguration of gateway '{gateway_id}':\n");
                        for config in configs {
                            println!("{}", render::sink_config_block(&config));
                        }
                    }
                }
                Err(e) => println!("Command FAIL. {e}"),
            },
            "ping" => self.run_ping().await,
            "send_msap_cancel" => self.run_cancel().await,
            "scratchpad_update_only_nodes" => match args.first() {
                Some(seq) => self.run_update_only_nodes(seq).await,
                None => println!("Usage: scratchpad_update_only_nodes <sequence 0..=255>"),
            },
            "scratchpad_check_all" => self.run_check_all().await,
            "scratchpad_check_sink" => match self.scratchpad_check_sink().await {
                Ok(info) => {
                    println!("Command OK.\n");
                    println!("{}", render::scratchpad_info_block(&info));
                }
                Err(e) => println!("Command FAIL. {e}"),
            },
            "scratchpad_update_only_sink" => {
                println!("Performing update. Request sent.");
                match self.scratchpad_update_only_sink().await {
                    Ok(()) => println!("Command OK."),
                    Err(e) => println!("Command FAIL. {e}"),
                }
            }
            "scratchpad_upload_to_sink" => match (args.first(), args.get(1)) {
                (Some(path), Some(seq)) => {
                    println!("Performing upload. Request sent.");
                    match self.scratchpad_upload_to_sink(path, seq).await {
                        Ok(()) => println!("Command OK."),
                        Err(e) => println!("Command FAIL. {e}"),
                    }
                }
                _ => println!("Usage: scratchpad_upload_to_sink <filepath> <sequence>"),
            },
            "set_app_config" => match (args.first(), args.get(1)) {
                (Some(seq), Some(data)) => {
                    let diag = args
                        .get(2)
                        .and_then(|a| a.parse().ok())
                        .unwrap_or(60u16);
                    match self.set_app_config(seq, data, diag).await {
                        Ok(()) => println!("Command OK."),
                        Err(e) => println!("Command FAIL. {e}"),
                    }
                }
                _ => println!("Usage: set_app_config <sequence> <hex data> [diag interval secs]"),
            },
            "send_data" => match parse_send_data_args(&args) {
                Ok(parsed) => match self.send_data(parsed).await {
                    Ok(()) => println!("Command OK."),
                    Err(e) => println!("Command FAIL. {e}"),
                },
                Err(usage) => println!("{usage}"),
            },
            "set_ndiag" => self.run_set_ndiag().await,
            other => println!("Unknown command '{other}'. Type help to list commands."),
        }
        true
    }

    // ---- shell command runners (print-only wrappers) ---------------------

    async fn run_ping(&mut self) {
        if !self.require_target() {
            return;
        }
        println!(
            "Command sent. Collecting node answers; silence threshold {} secs.",
            self.config.console.silence_timeout_secs
        );
        match self.ping().await {
            Ok(report) => {
                println!();
                println!("{}", render::histogram_block(&report.histogram));
                println!("{}", render::tally_line(&report.responded));
            }
            Err(e) => println!("Command FAIL. {e}"),
        }
        println!();
    }

    async fn run_cancel(&mut self) {
        if !self.require_target() {
            return;
        }
        println!(
            "Command sent. Collecting node answers; silence threshold {} secs.",
            self.config.console.silence_timeout_secs
        );
        match self.send_msap_cancel().await {
            Ok(report) => println!("{}", render::tally_line(&report.responded)),
            Err(e) => println!("Command FAIL. {e}"),
        }
        println!();
    }

    async fn run_update_only_nodes(&mut self, seq_arg: &str) {
        if !self.require_target() {
            return;
        }
        println!(
            "Using {} secs as node update countdown time.",
            self.config.console.update_countdown_secs
        );
        match self.scratchpad_update_only_nodes(seq_arg).await {
            Ok(report) => {
                for address in &report.rejected {
                    println!("Node {address} responded nok");
                }
                println!("{}", render::tally_line(&report.responded));
            }
            Err(e) => println!("Command FAIL. {e}"),
        }
        println!();
    }

    async fn run_check_all(&mut self) {
        if !self.require_target() {
            return;
        }
        println!(
            "Command sent. Collecting node answers; silence threshold {} secs.",
            self.config.console.silence_timeout_secs
        );
        match self.scratchpad_check_all().await {
            Ok(report) => {
                println!("\nNodes info in order of appearance ----------------");
                println!("{}", render::node_status_header());
                for address in &report.arrival {
                    if let Some(status) = report.statuses.get(address) {
                        println!("{}", render::node_status_row(*address, status));
                    }
                }
                println!("\nNodes info in sorted order -----------------------");
                for (address, status) in &report.statuses {
                    println!("{}", render::node_status_row(*address, status));
                }
                println!();
                println!("{}", render::ratio_block(&report.processed, "Processed"));
                println!("{}", render::ratio_block(&report.stored, "Stored"));
                println!("--");
                match report.stored.sole_key() {
                    Some(key) => {
                        println!("All nodes of the network have firmware '{key}' stored.")
                    }
                    None => println!("More than one firmware detected."),
                }
            }
            Err(e) => println!("Command FAIL. {e}"),
        }
        println!();
    }

    async fn run_set_ndiag(&mut self) {
        println!("Set neighbor diagnostics for network\n");
        println!("Refreshing network list..");
        if let Err(e) = self.gateway_configuration().await {
            println!("Command FAIL. {e}");
            return;
        }
        let mut networks: Vec<u32> = self
            .registry
            .networks()
            .iter()
            .map(|n| n.network_id)
            .collect();
        networks.sort_unstable();
        if networks.is_empty() {
            println!("No networks available!");
            return;
        }
        let labels: Vec<String> = networks.iter().map(u32::to_string).collect();
        let Ok(Some(index)) = dialoguer::Select::new()
            .with_prompt("Network to operate on")
            .items(&labels)
            .default(0)
            .interact_opt()
        else {
            println!("Aborted!");
            return;
        };
        let network_id = networks[index];

        let intervals = DiagInterval::all();
        let interval_labels: Vec<String> =
            intervals.iter().map(|i| i.label().to_string()).collect();
        let Ok(Some(choice)) = dialoguer::Select::new()
            .with_prompt("Diagnostic interval (or off)")
            .items(&interval_labels)
            .default(0)
            .interact_opt()
        else {
            println!("Aborted!");
            return;
        };
        let interval = intervals[choice];

        let Ok(Some(1)) = dialoguer::Select::new()
            .with_prompt("Args good. Proceed?")
            .items(&["no", "yes"])
            .default(0)
            .interact_opt()
        else {
            println!("Aborted!");
            return;
        };

        match self.set_ndiag(network_id, interval).await {
            Ok(report) => {
                for outcome in &report.outcomes {
                    println!(
                        "{}/{}:{}  {}",
                        outcome.gateway_id,
                        outcome.sink_id,
                        outcome.node_address,
                        if outcome.ok { "OK" } else { "FAIL" }
                    );
                }
                if report.all_ok() {
                    println!("Command OK.");
                } else {
                    println!("Command FAIL. Not every sink accepted the configuration.");
                }
            }
            Err(e) => println!("Command FAIL. {e}"),
        }
    }

    /// Resolve the command target, prompting for missing pieces. False when
    /// the operator declined and the target is still unset.
    fn require_target(&mut self) -> bool {
        if self.selection.target().is_ok() {
            return true;
        }
        println!("Please define your target gateway and sink");
        if self.selection.gateway().is_none() {
            if self.pick_gateway().is_err() {
                return false;
            }
        }
        if self.selection.sink().is_none() {
            if self.pick_sink().is_err() {
                return false;
            }
        }
        if self.selection.target().is_ok() {
            true
        } else {
            println!("Command FAIL. Set sink first");
            false
        }
    }

    // ---- listing commands ------------------------------------------------

    fn print_selection(&self) {
        println!(
            "gateway : {}",
            self.selection
                .gateway()
                .map(|g| g.device_id.as_str())
                .unwrap_or("None")
        );
        println!(
            "sink    : {}",
            self.selection
                .sink()
                .map(|s| s.device_id.as_str())
                .unwrap_or("None")
        );
        println!(
            "network : {}",
            self.selection
                .network()
                .map(|n| n.network_id.to_string())
                .unwrap_or_else(|| "None".to_string())
        );
    }

    fn print_gateways(&self) {
        println!("Known gateways:");
        let sorted = crate::topology::sort_gateways_by_device_id(
            self.registry.gateways().iter().collect(),
        );
        for gateway in sorted {
            let sinks = gateway.sinks.join(" ");
            println!("{}", render::device_line(&gateway.device_id, &sinks));
        }
    }

    fn print_sinks(&self) {
        match self.selection.gateway() {
            Some(gateway) => {
                println!("Sinks of gateway '{}':", gateway.device_id);
                let sinks = sort_sinks_by_device_id(
                    self.registry.sinks_of_gateway(&gateway.device_id),
                );
                if sinks.is_empty() {
                    println!("No sinks!");
                }
                for sink in sinks {
                    println!("{}", sink.device_id);
                }
            }
            None => {
                println!("Sinks of all gateways:");
                let sinks = sort_sinks_by_device_id(self.registry.sinks().iter().collect());
                for sink in sinks {
                    let owner = sink.gateway_id.as_deref().unwrap_or("?");
                    println!("{}", render::device_line(&sink.device_id, owner));
                }
            }
        }
    }

    fn print_nodes(&self) {
        let nodes: Vec<u32> = match self.selection.gateway() {
            Some(gateway) => {
                println!("Nodes of gateway '{}':", gateway.device_id);
                self.registry
                    .nodes_of_gateway(&gateway.device_id)
                    .iter()
                    .map(|n| n.device_id)
                    .collect()
            }
            None => {
                println!("Nodes of all gateways:");
                self.registry.nodes().iter().map(|n| n.device_id).collect()
            }
        };
        let mut sorted = nodes;
        sorted.sort_unstable();
        if !sorted.is_empty() {
            let joined: Vec<String> = sorted.iter().map(u32::to_string).collect();
            println!("( {} )", joined.join(" "));
        }
        println!("Total {} nodes", sorted.len());
    }

    fn print_networks(&self) {
        println!("Known networks:");
        let mut ids: Vec<u32> = self
            .registry
            .networks()
            .iter()
            .map(|n| n.network_id)
            .collect();
        ids.sort_unstable();
        for id in ids {
            println!("{id}");
        }
    }
}

fn parse_send_data_args(args: &[&str]) -> Result<SendDataArgs, String> {
    const USAGE: &str = "Usage: send_data <destination> <source ep> <destination ep> <hex payload>";
    let (dest, src_ep, dst_ep, payload) = match (args.first(), args.get(1), args.get(2), args.get(3))
    {
        (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
        _ => return Err(USAGE.to_string()),
    };
    let destination: u32 = dest.parse().map_err(|_| USAGE.to_string())?;
    let source_endpoint: u8 = src_ep.parse().map_err(|_| USAGE.to_string())?;
    let destination_endpoint: u8 = dst_ep.parse().map_err(|_| USAGE.to_string())?;
    let payload =
        validation::parse_hex_payload(payload).map_err(|e| format!("Command FAIL. {e}"))?;
    Ok(SendDataArgs {
        destination,
        source_endpoint,
        destination_endpoint,
        payload,
    })
}

fn print_help() {
    println!(
        "Topology:\n\
         \x20 gateways | sinks | nodes | networks | selection\n\
         \x20 set_gateway | set_sink | clear_offline_gateways\n\
         \x20 gateway_configuration\n\
         Scratchpad:\n\
         \x20 scratchpad_check_all | scratchpad_check_sink\n\
         \x20 scratchpad_update_only_nodes <seq> | scratchpad_update_only_sink\n\
         \x20 scratchpad_upload_to_sink <filepath> <seq>\n\
         Maintenance:\n\
         \x20 ping | send_msap_cancel | set_app_config <seq> <hex> [diag]\n\
         \x20 send_data <dest> <src ep> <dst ep> <hex> | set_ndiag\n\
         Other:\n\
         \x20 help | quit"
    );
}
