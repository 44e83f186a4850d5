//! Packing and unpacking of combo messages.
//!
//! A combo message concatenates several maintenance records into one wire
//! payload so that a whole cancel/begin/mark/end/update sequence reaches a
//! node as a single transmission. Nodes answer in kind: one payload holding
//! the reply records in the order the requests were packed.
//!
//! Parsing is all-or-nothing. A reply either splits exactly into known,
//! individually valid records, or the whole reply is worthless — there is no
//! partial credit for a node that answered half the sequence correctly.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::{
    BeginResp, CancelResp, EndResp, MsapReq, ScratchpadUpdateResp, UpdateResp, HEADER_LEN,
};

/// Hard ceiling for one packed payload, in bytes. A combo at or above this
/// size is a construction error; it must never be sent truncated.
pub const MAX_COMBO_BYTES: usize = 102;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComboError {
    #[error("sub-operation 0x{op:02x} reports invalid parameters")]
    InvalidOperation { op: u8 },

    #[error("packed payload would be {len} bytes, ceiling is {MAX_COMBO_BYTES}")]
    Oversize { len: usize },
}

/// Pack the given sub-operations, in order, into one payload.
///
/// Every operation is validity-checked up front; nothing is encoded unless
/// all of them pass. The size ceiling is checked against the finished buffer.
pub fn build_combo(ops: &[&dyn MsapReq]) -> Result<Bytes, ComboError> {
    for op in ops {
        if !op.is_valid() {
            return Err(ComboError::InvalidOperation { op: op.op() });
        }
    }
    let mut buf = BytesMut::new();
    for op in ops {
        buf.extend_from_slice(&op.encode());
    }
    if buf.len() >= MAX_COMBO_BYTES {
        return Err(ComboError::Oversize { len: buf.len() });
    }
    Ok(buf.freeze())
}

/// Checks one whole record (header included) against its expected decoded
/// form, reporting only pass/fail.
pub type RecordValidator = fn(&[u8]) -> bool;

/// Registry-driven parser for combo replies.
///
/// Callers register a validator per expected reply opcode; [`parse`] then
/// reports whether an inbound payload is a fully valid ordered sequence of
/// registered records. The callers only need that single boolean — a reply
/// either counts toward the tally or it doesn't.
///
/// [`parse`]: ComboReply::parse
#[derive(Debug, Default)]
pub struct ComboReply {
    validators: HashMap<u8, RecordValidator>,
}

impl ComboReply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator(mut self, op: u8, validator: RecordValidator) -> Self {
        self.validators.insert(op, validator);
        self
    }

    /// Registry for the reply to the packed update sequence:
    /// cancel, begin, scratchpad-update, end, update.
    pub fn update_combo() -> Self {
        Self::new()
            .with_validator(CancelResp::TYPE, |rec| {
                CancelResp::decode(rec).map(|r| r.is_ok()).unwrap_or(false)
            })
            .with_validator(BeginResp::TYPE, |rec| {
                BeginResp::decode(rec).map(|r| r.is_ok()).unwrap_or(false)
            })
            .with_validator(ScratchpadUpdateResp::TYPE, |rec| {
                ScratchpadUpdateResp::decode(rec)
                    .map(|r| r.is_ok())
                    .unwrap_or(false)
            })
            .with_validator(EndResp::TYPE, |rec| {
                EndResp::decode(rec).map(|r| r.is_ok()).unwrap_or(false)
            })
            .with_validator(UpdateResp::TYPE, |rec| {
                UpdateResp::decode(rec).map(|r| r.is_ok()).unwrap_or(false)
            })
    }

    /// All-or-nothing check of one inbound payload.
    ///
    /// True only when the payload splits exactly into whole records (no
    /// trailing partial record, no overshooting length field), every record
    /// type has a registered validator, and every validator passes. The
    /// first failure invalidates the whole payload.
    pub fn parse(&self, payload: &[u8]) -> bool {
        let mut pos = 0;
        while pos < payload.len() {
            if payload.len() - pos < HEADER_LEN {
                return false;
            }
            let declared = payload[pos + 1] as usize;
            let end = pos + HEADER_LEN + declared;
            if end > payload.len() {
                return false;
            }
            let record = &payload[pos..end];
            match self.validators.get(&record[0]) {
                Some(validator) if validator(record) => {}
                _ => return false,
            }
            pos = end;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msap::{
        BeginReq, CancelReq, EndReq, PingReq, ScratchpadUpdateReq, StatusReq, UpdateReq,
    };

    fn update_ops() -> (CancelReq, BeginReq, ScratchpadUpdateReq, EndReq, UpdateReq) {
        (
            CancelReq,
            BeginReq,
            ScratchpadUpdateReq::new(7),
            EndReq,
            UpdateReq::new(30),
        )
    }

    fn ok_reply() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&CancelResp::record(0));
        payload.extend_from_slice(&BeginResp::record(0));
        payload.extend_from_slice(&ScratchpadUpdateResp::record(0));
        payload.extend_from_slice(&EndResp::record(0));
        payload.extend_from_slice(&UpdateResp::record(0));
        payload
    }

    #[test]
    fn build_packs_in_order() {
        let (cancel, begin, mark, end, update) = update_ops();
        let combo = build_combo(&[&cancel, &begin, &mark, &end, &update]).unwrap();
        // five records: three bare, one 1-byte, one 2-byte payload
        assert_eq!(combo.len(), 5 * HEADER_LEN + 1 + 2);
        assert_eq!(combo[0], CancelReq.op());
        assert_eq!(combo[2], BeginReq.op());
    }

    #[test]
    fn build_rejects_invalid_operation() {
        let bad = UpdateReq::new(0);
        let err = build_combo(&[&CancelReq, &bad]).unwrap_err();
        assert_eq!(err, ComboError::InvalidOperation { op: bad.op() });
    }

    #[test]
    fn build_rejects_oversize_without_truncation() {
        // 40 ping requests: 40 * (2 + 4) = 240 bytes, well over the ceiling
        let pings: Vec<PingReq> = (0..40).map(|_| PingReq::new()).collect();
        let refs: Vec<&dyn MsapReq> = pings.iter().map(|p| p as &dyn MsapReq).collect();
        let err = build_combo(&refs).unwrap_err();
        assert!(matches!(err, ComboError::Oversize { len: 240 }));
    }

    #[test]
    fn parse_accepts_full_ordered_reply() {
        assert!(ComboReply::update_combo().parse(&ok_reply()));
    }

    #[test]
    fn parse_rejects_unknown_record_type() {
        let mut payload = ok_reply();
        // a status request opcode never appears in an update combo reply
        payload[0] = StatusReq.op();
        assert!(!ComboReply::update_combo().parse(&payload));
    }

    #[test]
    fn parse_rejects_failed_record() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&CancelResp::record(0));
        payload.extend_from_slice(&BeginResp::record(5)); // node said no
        payload.extend_from_slice(&ScratchpadUpdateResp::record(0));
        assert!(!ComboReply::update_combo().parse(&payload));
    }

    #[test]
    fn corrupt_length_invalidates_whole_reply() {
        let mut payload = ok_reply();
        // third record starts at byte 6; bump its declared length by one
        payload[7] += 1;
        assert!(!ComboReply::update_combo().parse(&payload));

        let mut payload = ok_reply();
        payload[7] -= 1;
        assert!(!ComboReply::update_combo().parse(&payload));
    }

    #[test]
    fn trailing_partial_record_fails() {
        let mut payload = ok_reply();
        payload.push(CancelResp::TYPE);
        assert!(!ComboReply::update_combo().parse(&payload));
    }

    #[test]
    fn empty_payload_is_trivially_complete() {
        assert!(ComboReply::update_combo().parse(&[]));
    }
}
