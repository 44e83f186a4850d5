//! # Meshops - Operations Console for Gateway-Fronted Mesh Networks
//!
//! Meshops is an operator console for wireless mesh networks reached through
//! remote gateways over a publish/subscribe transport. The operator selects
//! a gateway and a radio sink, then issues maintenance commands — firmware
//! scratchpad lifecycle operations, cancel, ping, diagnostics — delivered to
//! one or many mesh nodes.
//!
//! Because delivery is broadcast and asynchronous, the interesting parts are
//! not the commands themselves but what sits underneath them:
//!
//! - **Combo codec**: several maintenance sub-operations packed back to back
//!   into one wire payload, with an all-or-nothing parser for the replies.
//! - **Silence windows**: a broadcast command collects replies for as long
//!   as they keep arriving, and stops once the stream has been quiet for a
//!   configured span — there is no reply count to wait for.
//! - **Topology selection**: a registry of discovered gateways, sinks, nodes
//!   and networks, and one mutable selection every command resolves its
//!   addressing through.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshops::config::Config;
//! use meshops::console::Console;
//! use meshops::link::GatewayLink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let (link, backend) = GatewayLink::channel();
//!     // hand `backend` to a broker bridge, or to link::sim for a dry run
//!     meshops::link::sim::spawn(backend, Default::default());
//!
//!     let mut console = Console::new(config, link);
//!     console.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`console`] - command orchestration and the interactive shell
//! - [`aggregate`] - silence-window collection, tallies, hop histogram
//! - [`msap`] - per-operation maintenance codecs and the combo codec
//! - [`topology`] - device registry and the gateway/sink selection
//! - [`link`] - typed envelopes and the seam to the pub/sub transport
//! - [`diag`] - network-wide neighbor diagnostics fan-out
//! - [`config`] - configuration management
//! - [`validation`] - operator argument validation

pub mod aggregate;
pub mod config;
pub mod console;
pub mod diag;
pub mod link;
pub mod msap;
pub mod topology;
pub mod validation;
