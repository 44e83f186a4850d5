//! Combo message framing properties: round-trip, oversize rejection and
//! all-or-nothing parsing.

use meshops::msap::combo::{build_combo, ComboError, ComboReply, MAX_COMBO_BYTES};
use meshops::msap::{
    BeginReq, BeginResp, CancelReq, CancelResp, EndReq, EndResp, MsapReq, ScratchpadUpdateReq,
    ScratchpadUpdateResp, UpdateReq, UpdateResp,
};

fn full_update_request() -> Vec<u8> {
    let cancel = CancelReq;
    let begin = BeginReq;
    let mark = ScratchpadUpdateReq::new(42);
    let end = EndReq;
    let update = UpdateReq::new(30);
    build_combo(&[&cancel, &begin, &mark, &end, &update])
        .expect("five small operations fit well under the ceiling")
        .to_vec()
}

fn full_update_reply() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&CancelResp::record(0));
    payload.extend_from_slice(&BeginResp::record(0));
    payload.extend_from_slice(&ScratchpadUpdateResp::record(0));
    payload.extend_from_slice(&EndResp::record(0));
    payload.extend_from_slice(&UpdateResp::record(0));
    payload
}

#[test]
fn encode_concatenates_in_given_order() {
    let payload = full_update_request();
    let expected_ops = [
        CancelReq.op(),
        BeginReq.op(),
        ScratchpadUpdateReq::new(42).op(),
        EndReq.op(),
        UpdateReq::new(30).op(),
    ];
    let mut pos = 0;
    let mut seen = Vec::new();
    while pos < payload.len() {
        seen.push(payload[pos]);
        pos += 2 + payload[pos + 1] as usize;
    }
    assert_eq!(seen, expected_ops);
    assert_eq!(pos, payload.len(), "records tile the buffer exactly");
}

#[test]
fn valid_reply_round_trips_to_overall_validity() {
    assert!(ComboReply::update_combo().parse(&full_update_reply()));
}

#[test]
fn oversize_combo_produces_no_bytes() {
    // each scratchpad-update record is 3 bytes; 34 of them exceed 102 - 1
    let ops: Vec<ScratchpadUpdateReq> = (0..34).map(ScratchpadUpdateReq::new).collect();
    let refs: Vec<&dyn MsapReq> = ops.iter().map(|o| o as &dyn MsapReq).collect();
    match build_combo(&refs) {
        Err(ComboError::Oversize { len }) => assert!(len >= MAX_COMBO_BYTES),
        other => panic!("expected oversize rejection, got {:?}", other),
    }
}

#[test]
fn exactly_at_ceiling_is_rejected() {
    // 34 records * 3 bytes = 102 = the ceiling; "at" means reject, not truncate
    let ops: Vec<ScratchpadUpdateReq> = (0..34).map(ScratchpadUpdateReq::new).collect();
    let refs: Vec<&dyn MsapReq> = ops.iter().map(|o| o as &dyn MsapReq).collect();
    assert_eq!(
        build_combo(&refs),
        Err(ComboError::Oversize {
            len: MAX_COMBO_BYTES
        })
    );

    // one record fewer fits
    let ops: Vec<ScratchpadUpdateReq> = (0..33).map(ScratchpadUpdateReq::new).collect();
    let refs: Vec<&dyn MsapReq> = ops.iter().map(|o| o as &dyn MsapReq).collect();
    assert!(build_combo(&refs).is_ok());
}

#[test]
fn invalid_suboperation_fails_construction() {
    let cancel = CancelReq;
    let bad_update = UpdateReq::new(0);
    assert_eq!(
        build_combo(&[&cancel, &bad_update]),
        Err(ComboError::InvalidOperation {
            op: bad_update.op()
        })
    );
}

#[test]
fn corrupting_third_record_length_invalidates_whole_reply() {
    let parser = ComboReply::update_combo();

    // records are 3 bytes each; the 3rd record's length byte sits at offset 7
    let mut grown = full_update_reply();
    grown[7] += 1;
    assert!(!parser.parse(&grown), "grown length must fail the whole parse");

    let mut shrunk = full_update_reply();
    shrunk[7] -= 1;
    assert!(
        !parser.parse(&shrunk),
        "shrunk length must fail the whole parse"
    );
}

#[test]
fn length_overshooting_buffer_end_fails() {
    let mut payload = full_update_reply();
    let last_len_index = payload.len() - 2;
    payload[last_len_index] = 200;
    assert!(!ComboReply::update_combo().parse(&payload));
}

#[test]
fn record_order_is_irrelevant_but_content_is_not() {
    // the registry keys on opcode, so a reordered reply still parses...
    let mut payload = Vec::new();
    payload.extend_from_slice(&UpdateResp::record(0));
    payload.extend_from_slice(&CancelResp::record(0));
    assert!(ComboReply::update_combo().parse(&payload));

    // ...but any failed record still kills the whole reply
    let mut payload = Vec::new();
    payload.extend_from_slice(&UpdateResp::record(0));
    payload.extend_from_slice(&CancelResp::record(1));
    assert!(!ComboReply::update_combo().parse(&payload));
}
