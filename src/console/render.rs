//! Console output formatting.
//!
//! Everything here is a pure string builder so the command orchestrators
//! stay print-free and the formats stay testable.

use crate::aggregate::{HopHistogram, NodeTally, RatioTally};
use crate::link::{ScratchpadInfo, SinkConfig};
use crate::msap::StatusResp;

/// Fixed column width for rendered firmware versions ("x.x.x.xx ").
pub const VERSION_FIELD_WIDTH: usize = 9;

const DEVICE_ID_WIDTH: usize = 16;

/// Left-justify into a fixed-width field, one trailing space guaranteed.
pub fn pad(value: impl ToString, width: usize) -> String {
    let mut s = value.to_string();
    while s.len() < width {
        s.push(' ');
    }
    s.push(' ');
    s
}

/// Four-part firmware version, left-justified to the version field width.
pub fn version_str(version: &[u8; 4]) -> String {
    let mut s = format!(
        "{}.{}.{}.{}",
        version[0], version[1], version[2], version[3]
    );
    while s.len() < VERSION_FIELD_WIDTH {
        s.push(' ');
    }
    s
}

/// Fingerprint of a node's processed (running) scratchpad.
pub fn processed_key(status: &StatusResp) -> String {
    format!(
        "CRC: 0x{:04x} Stack SW: {} stack proc seq: {:<3} App SW: {} app proc seq: {:<3}",
        status.processed_crc,
        version_str(&status.firmware_version),
        status.processed_seq,
        version_str(&status.app_version),
        status.app_processed_seq,
    )
}

/// Fingerprint of a node's stored (staged) scratchpad.
pub fn stored_key(status: &StatusResp) -> String {
    format!(
        "CRC: 0x{:04x} Stack SW: {} stack stored seq: {:<3}",
        status.stored_crc,
        version_str(&status.firmware_version),
        status.stored_seq,
    )
}

/// Column header matching [`node_status_row`].
pub fn node_status_header() -> String {
    let mut s = String::new();
    s += &pad("Address", 17);
    s += &pad("Stored seq", 11);
    s += &pad("Stored crc", 11);
    s += &pad("Proc seq", 11);
    s += &pad("Proc crc", 11);
    s += &pad("Stack SW", 10);
    s += &pad("Fw area id", 11);
    s += &pad("App seq", 8);
    s += &pad("App SW", 10);
    s += &pad("App area id", 11);
    s
}

/// One node's scratchpad status as a table row.
pub fn node_status_row(address: u32, status: &StatusResp) -> String {
    let mut s = String::new();
    s += &pad(address, 17);
    s += &pad(status.stored_seq, 11);
    s += &pad(format!("0x{:04x}", status.stored_crc), 11);
    s += &pad(status.processed_seq, 11);
    s += &pad(format!("0x{:04x}", status.processed_crc), 11);
    s += &pad(version_str(&status.firmware_version), 10);
    s += &pad(format!("0x{:x}", status.firmware_area_id), 11);
    s += &pad(status.app_processed_seq, 8);
    s += &pad(version_str(&status.app_version), 10);
    s += &pad(format!("0x{:x}", status.app_area_id), 11);
    s
}

/// Multi-line stored/processed scratchpad block for the sink report.
pub fn scratchpad_info_block(info: &ScratchpadInfo) -> String {
    let mut s = String::new();
    s += "Stored scratchpad:\n";
    s += &format!("seq     : {}\n", info.stored_seq);
    s += &format!("len     : {}\n", info.stored_len);
    s += &format!("crc     : 0x{:04x}\n", info.stored_crc);
    s += &format!("status  : {}\n", info.stored_status);
    s += &format!("type    : {}\n", info.stored_type);
    s += "\nProcessed scratchpad:\n";
    s += &format!("seq     : {}\n", info.processed_seq);
    s += &format!("len     : {}\n", info.processed_len);
    s += &format!("crc     : 0x{:04x}\n", info.processed_crc);
    s += "\nFirmware:\n";
    s += &format!("area id : 0x{:x}\n", info.firmware_area_id);
    s
}

/// One sink configuration block from a gateway configuration fetch.
pub fn sink_config_block(config: &SinkConfig) -> String {
    let mut s = String::new();
    s += &format!(
        "Sink:       id: {}  nw address: {}  nw channel: {}\n",
        config.sink_id, config.network_address, config.network_channel
    );
    s += &format!(
        "Node:       address: {}  role: {}\n",
        config.node_address, config.node_role
    );
    s += &format!(
        "App config: diag: {}  seq: {}  data: {} ({} bytes)\n",
        config.app_config_diag,
        config.app_config_seq,
        hex::encode(&config.app_config_data),
        config.app_config_data.len()
    );
    s += &format!(
        "Stack:      started: {}  firmware: {}\n",
        if config.started { "yes" } else { "no" },
        version_str(&config.firmware_version).trim_end()
    );
    s
}

/// Hop-count histogram block with the derived difficulty sum.
pub fn histogram_block(histogram: &HopHistogram) -> String {
    let mut s = String::new();
    s += "Nodes distribution ----------------------------\n";
    for (hop, count) in histogram.buckets() {
        s += &format!("| Hop count {:<4}: {}\n", hop, "*".repeat(count as usize));
    }
    s += &format!("| C: {}\n", histogram.difficulty());
    s += "-----------------------------------------------\n";
    s += "C = sum of each category ([node hop count] * amount of nodes in category)\n";
    s += "Smaller C value should be 'easier network'.\n";
    s
}

/// Fingerprint distribution block ("Processed stats" / "Stored stats").
pub fn ratio_block(tally: &RatioTally, name: &str) -> String {
    let mut s = String::new();
    s += &format!("{} stats\n", name);
    if tally.is_empty() {
        s += "no items\n";
        return s;
    }
    for (key, count, percent) in tally.ratios() {
        s += &format!(
            "{} running on {:<4} node(s) ({}%)\n",
            pad(key, 80),
            count,
            percent
        );
    }
    s += &format!("Total {} nodes\n", tally.total());
    s
}

/// Per-node reply counts for cancel/update sweeps.
pub fn tally_line(tally: &NodeTally) -> String {
    format!("Ok response received from {} node(s).", tally.nodes())
}

/// One line per known device for the listing commands.
pub fn device_line(device_id: &str, detail: &str) -> String {
    if detail.is_empty() {
        pad(device_id, DEVICE_ID_WIDTH).trim_end().to_string()
    } else {
        format!("{}( {} )", pad(device_id, DEVICE_ID_WIDTH), detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> StatusResp {
        StatusResp {
            stored_seq: 7,
            stored_crc: 0xe302,
            stored_len: 896,
            stored_status: 1,
            stored_type: 2,
            processed_seq: 6,
            processed_crc: 0x8fe8,
            processed_len: 105_072,
            firmware_area_id: 0x103,
            firmware_version: [5, 1, 0, 12],
            app_processed_seq: 6,
            app_area_id: 0x204,
            app_version: [2, 0, 3, 1],
        }
    }

    #[test]
    fn version_field_has_stable_width() {
        assert_eq!(version_str(&[5, 1, 0, 12]), "5.1.0.12 ");
        assert_eq!(version_str(&[0, 0, 0, 0]).len(), VERSION_FIELD_WIDTH);
        // a wide version is not truncated
        assert!(version_str(&[255, 255, 255, 255]).len() >= VERSION_FIELD_WIDTH);
    }

    #[test]
    fn fingerprints_distinguish_stored_and_processed() {
        let s = status();
        assert_ne!(stored_key(&s), processed_key(&s));
        assert!(stored_key(&s).contains("0xe302"));
        assert!(processed_key(&s).contains("0x8fe8"));
    }

    #[test]
    fn histogram_block_draws_stars() {
        let mut histo = HopHistogram::with_base_size(3);
        histo.record(1);
        histo.record(1);
        let block = histogram_block(&histo);
        assert!(block.contains("| Hop count 1   : **"));
        assert!(block.contains("| C: 2"));
    }

    #[test]
    fn status_row_aligns_with_header() {
        let header = node_status_header();
        let row = node_status_row(0x6001, &status());
        assert!(!header.is_empty());
        assert!(row.starts_with(&pad(0x6001u32, 17)));
    }
}
