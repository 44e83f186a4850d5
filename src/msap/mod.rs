//! MSAP maintenance command codecs.
//!
//! Every mesh maintenance operation travels as a type/length/payload record:
//!
//!   `<type (1)><length (1)><payload (length bytes)>`
//!
//! where `length` counts only the payload. A node answers with the request
//! type plus the high bit set; most replies carry a single result byte where
//! zero means success. Several records can be packed back to back into one
//! wire payload — see [`combo`].

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use thiserror::Error;

pub mod combo;

/// Record header size: one type byte plus one length byte.
pub const HEADER_LEN: usize = 2;

// Request opcodes. A reply uses the request opcode with RESP_FLAG set.
pub const OP_PING: u8 = 0x00;
pub const OP_BEGIN: u8 = 0x01;
pub const OP_END: u8 = 0x03;
pub const OP_CANCEL: u8 = 0x04;
pub const OP_UPDATE: u8 = 0x05;
pub const OP_SCRATCHPAD_STATUS: u8 = 0x19;
pub const OP_SCRATCHPAD_UPDATE: u8 = 0x1a;

/// High bit distinguishing replies from requests.
pub const RESP_FLAG: u8 = 0x80;

/// Reply opcode for a given request opcode.
pub const fn resp_op(req_op: u8) -> u8 {
    req_op | RESP_FLAG
}

/// One encodable maintenance sub-operation. The combo builder works over this
/// seam; concrete request types also expose typed constructors.
pub trait MsapReq {
    /// Request opcode.
    fn op(&self) -> u8;

    /// Whether the parameters are within protocol limits. An invalid
    /// operation must never be encoded onto the wire.
    fn is_valid(&self) -> bool;

    /// Payload bytes, excluding the two header bytes.
    fn payload(&self) -> Vec<u8>;

    /// Full record: type, length, payload.
    fn encode(&self) -> Bytes {
        let payload = self.payload();
        debug_assert!(payload.len() <= u8::MAX as usize);
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u8(self.op());
        buf.put_u8(payload.len() as u8);
        buf.put_slice(&payload);
        buf.freeze()
    }
}

/// Encode one stand-alone request record.
///
/// The single-operation counterpart of [`combo::build_combo`]: an invalid
/// operation is an explicit error, not a silently missing message.
pub fn encode_single(op: &dyn MsapReq) -> Result<Bytes, combo::ComboError> {
    if !op.is_valid() {
        return Err(combo::ComboError::InvalidOperation { op: op.op() });
    }
    Ok(op.encode())
}

/// Reasons a reply record failed to decode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record is {0} bytes, shorter than the {HEADER_LEN} byte header")]
    Truncated(usize),

    #[error("unexpected record type 0x{got:02x}, wanted 0x{want:02x}")]
    WrongType { got: u8, want: u8 },

    #[error("declared length {declared} does not match {actual} payload bytes")]
    LengthMismatch { declared: u8, actual: usize },

    #[error("payload size {got} does not fit the record type (wanted {want})")]
    BadPayloadSize { got: usize, want: usize },
}

/// Split a record into its declared payload after header checks.
fn check_record<'a>(record: &'a [u8], want_type: u8) -> Result<&'a [u8], DecodeError> {
    if record.len() < HEADER_LEN {
        return Err(DecodeError::Truncated(record.len()));
    }
    if record[0] != want_type {
        return Err(DecodeError::WrongType {
            got: record[0],
            want: want_type,
        });
    }
    let declared = record[1];
    let payload = &record[HEADER_LEN..];
    if declared as usize != payload.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    Ok(payload)
}

fn expect_payload_len(payload: &[u8], want: usize) -> Result<(), DecodeError> {
    if payload.len() == want {
        Ok(())
    } else {
        Err(DecodeError::BadPayloadSize {
            got: payload.len(),
            want,
        })
    }
}

macro_rules! bare_request {
    ($(#[$doc:meta])* $name:ident, $op:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl MsapReq for $name {
            fn op(&self) -> u8 {
                $op
            }
            fn is_valid(&self) -> bool {
                true
            }
            fn payload(&self) -> Vec<u8> {
                Vec::new()
            }
        }
    };
}

bare_request!(
    /// Open an update session on the node.
    BeginReq,
    OP_BEGIN
);
bare_request!(
    /// Close the update session.
    EndReq,
    OP_END
);
bare_request!(
    /// Abandon any update session and pending countdown.
    CancelReq,
    OP_CANCEL
);
bare_request!(
    /// Ask a node for its scratchpad status report.
    StatusReq,
    OP_SCRATCHPAD_STATUS
);

/// Reboot-into-scratchpad countdown, in seconds. Zero is reserved on the
/// wire, and the top bit of the two-byte field is a flag, so valid countdowns
/// are `1..=32767`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReq {
    countdown_secs: u16,
}

impl UpdateReq {
    pub const MAX_COUNTDOWN_SECS: u16 = 32767;

    pub fn new(countdown_secs: u16) -> Self {
        Self { countdown_secs }
    }

    pub fn countdown_secs(&self) -> u16 {
        self.countdown_secs
    }
}

impl MsapReq for UpdateReq {
    fn op(&self) -> u8 {
        OP_UPDATE
    }
    fn is_valid(&self) -> bool {
        self.countdown_secs >= 1 && self.countdown_secs <= Self::MAX_COUNTDOWN_SECS
    }
    fn payload(&self) -> Vec<u8> {
        self.countdown_secs.to_le_bytes().to_vec()
    }
}

/// Mark the stored scratchpad with the given sequence for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchpadUpdateReq {
    seq: u8,
}

impl ScratchpadUpdateReq {
    pub fn new(seq: u8) -> Self {
        Self { seq }
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }
}

impl MsapReq for ScratchpadUpdateReq {
    fn op(&self) -> u8 {
        OP_SCRATCHPAD_UPDATE
    }
    fn is_valid(&self) -> bool {
        true
    }
    fn payload(&self) -> Vec<u8> {
        vec![self.seq]
    }
}

/// Ping with a random correlation token. Replies echo the token, which lets
/// the collector discard answers to someone else's ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReq {
    reference: [u8; 4],
}

impl PingReq {
    pub fn new() -> Self {
        Self {
            reference: rand::thread_rng().gen(),
        }
    }

    /// Correlation token carried in the request payload.
    pub fn reference(&self) -> [u8; 4] {
        self.reference
    }
}

impl Default for PingReq {
    fn default() -> Self {
        Self::new()
    }
}

impl MsapReq for PingReq {
    fn op(&self) -> u8 {
        OP_PING
    }
    fn is_valid(&self) -> bool {
        true
    }
    fn payload(&self) -> Vec<u8> {
        self.reference.to_vec()
    }
}

macro_rules! ack_response {
    ($(#[$doc:meta])* $name:ident, $req_op:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            result: u8,
        }

        impl $name {
            pub const TYPE: u8 = resp_op($req_op);

            pub fn decode(record: &[u8]) -> Result<Self, DecodeError> {
                let payload = check_record(record, Self::TYPE)?;
                expect_payload_len(payload, 1)?;
                Ok(Self { result: payload[0] })
            }

            /// Result byte as reported by the node; zero is success.
            pub fn result(&self) -> u8 {
                self.result
            }

            pub fn is_ok(&self) -> bool {
                self.result == 0
            }

            /// Encode a reply record, used by simulated nodes and tests.
            pub fn record(result: u8) -> Bytes {
                Bytes::from(vec![Self::TYPE, 1, result])
            }
        }
    };
}

ack_response!(
    /// Node acknowledgement for [`BeginReq`].
    BeginResp,
    OP_BEGIN
);
ack_response!(
    /// Node acknowledgement for [`EndReq`].
    EndResp,
    OP_END
);
ack_response!(
    /// Node acknowledgement for [`CancelReq`].
    CancelResp,
    OP_CANCEL
);
ack_response!(
    /// Node acknowledgement for [`UpdateReq`].
    UpdateResp,
    OP_UPDATE
);
ack_response!(
    /// Node acknowledgement for [`ScratchpadUpdateReq`].
    ScratchpadUpdateResp,
    OP_SCRATCHPAD_UPDATE
);

/// Ping reply carrying back the correlation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingResp {
    reference: [u8; 4],
}

impl PingResp {
    pub const TYPE: u8 = resp_op(OP_PING);

    pub fn decode(record: &[u8]) -> Result<Self, DecodeError> {
        let payload = check_record(record, Self::TYPE)?;
        expect_payload_len(payload, 4)?;
        let mut reference = [0u8; 4];
        reference.copy_from_slice(payload);
        Ok(Self { reference })
    }

    pub fn reference(&self) -> [u8; 4] {
        self.reference
    }

    pub fn record(reference: [u8; 4]) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 4);
        buf.put_u8(Self::TYPE);
        buf.put_u8(4);
        buf.put_slice(&reference);
        buf.freeze()
    }
}

/// Byte length of the scratchpad status reply payload.
const STATUS_PAYLOAD_LEN: usize = 33;

/// Scratchpad status report from one node: the stored (staged) image, the
/// processed (running) image, and the firmware/application areas and
/// versions derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResp {
    pub stored_seq: u8,
    pub stored_crc: u16,
    pub stored_len: u32,
    pub stored_status: u8,
    pub stored_type: u8,
    pub processed_seq: u8,
    pub processed_crc: u16,
    pub processed_len: u32,
    pub firmware_area_id: u32,
    pub firmware_version: [u8; 4],
    pub app_processed_seq: u8,
    pub app_area_id: u32,
    pub app_version: [u8; 4],
}

impl StatusResp {
    pub const TYPE: u8 = resp_op(OP_SCRATCHPAD_STATUS);

    pub fn decode(record: &[u8]) -> Result<Self, DecodeError> {
        let payload = check_record(record, Self::TYPE)?;
        expect_payload_len(payload, STATUS_PAYLOAD_LEN)?;
        let mut r = Reader { buf: payload };
        Ok(Self {
            stored_seq: r.u8(),
            stored_crc: r.u16(),
            stored_len: r.u32(),
            stored_status: r.u8(),
            stored_type: r.u8(),
            processed_seq: r.u8(),
            processed_crc: r.u16(),
            processed_len: r.u32(),
            firmware_area_id: r.u32(),
            firmware_version: r.array(),
            app_processed_seq: r.u8(),
            app_area_id: r.u32(),
            app_version: r.array(),
        })
    }

    pub fn record(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + STATUS_PAYLOAD_LEN);
        buf.put_u8(Self::TYPE);
        buf.put_u8(STATUS_PAYLOAD_LEN as u8);
        buf.put_u8(self.stored_seq);
        buf.put_u16_le(self.stored_crc);
        buf.put_u32_le(self.stored_len);
        buf.put_u8(self.stored_status);
        buf.put_u8(self.stored_type);
        buf.put_u8(self.processed_seq);
        buf.put_u16_le(self.processed_crc);
        buf.put_u32_le(self.processed_len);
        buf.put_u32_le(self.firmware_area_id);
        buf.put_slice(&self.firmware_version);
        buf.put_u8(self.app_processed_seq);
        buf.put_u32_le(self.app_area_id);
        buf.put_slice(&self.app_version);
        buf.freeze()
    }
}

/// Little-endian field reader over an already size-checked payload.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> u8 {
        let v = self.buf[0];
        self.buf = &self.buf[1..];
        v
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.buf[0], self.buf[1]]);
        self.buf = &self.buf[2..];
        v
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        self.buf = &self.buf[4..];
        v
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[..N]);
        self.buf = &self.buf[N..];
        out
    }
}
