//! Operator argument validation for console commands.
//!
//! Everything here runs before any network activity: a rejected argument
//! means no request is ever built, let alone published.

use thiserror::Error;

/// Argument validation errors with operator-facing messages
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgError {
    #[error("'{0}' is not a number")]
    NotNumeric(String),

    #[error("sequence number {0} is outside 0..=255")]
    SequenceOutOfRange(i64),

    #[error("countdown {0} seconds is outside 1..=32767")]
    CountdownOutOfRange(i64),

    #[error("payload is not a valid hex string")]
    BadHexPayload,

    #[error("missing required argument '{0}'")]
    Missing(&'static str),
}

/// Parse a scratchpad sequence number. Valid sequence numbers occupy a single
/// byte on the wire, so anything outside `0..=255` is rejected here.
pub fn parse_sequence(arg: &str) -> Result<u8, ArgError> {
    let value: i64 = arg
        .trim()
        .parse()
        .map_err(|_| ArgError::NotNumeric(arg.trim().to_string()))?;
    if (0..=255).contains(&value) {
        Ok(value as u8)
    } else {
        Err(ArgError::SequenceOutOfRange(value))
    }
}

/// Parse an update countdown in seconds (two bytes on the wire, zero reserved).
pub fn parse_countdown(arg: &str) -> Result<u16, ArgError> {
    let value: i64 = arg
        .trim()
        .parse()
        .map_err(|_| ArgError::NotNumeric(arg.trim().to_string()))?;
    if (1..=32767).contains(&value) {
        Ok(value as u16)
    } else {
        Err(ArgError::CountdownOutOfRange(value))
    }
}

/// Parse a raw payload given as a hex string, e.g. `0011aaff`.
pub fn parse_hex_payload(arg: &str) -> Result<Vec<u8>, ArgError> {
    hex::decode(arg.trim()).map_err(|_| ArgError::BadHexPayload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_bounds() {
        assert_eq!(parse_sequence("0"), Ok(0));
        assert_eq!(parse_sequence("255"), Ok(255));
        assert_eq!(parse_sequence("-1"), Err(ArgError::SequenceOutOfRange(-1)));
        assert_eq!(parse_sequence("256"), Err(ArgError::SequenceOutOfRange(256)));
        assert_eq!(
            parse_sequence("abc"),
            Err(ArgError::NotNumeric("abc".into()))
        );
    }

    #[test]
    fn sequence_accepts_surrounding_whitespace() {
        assert_eq!(parse_sequence(" 17 "), Ok(17));
    }

    #[test]
    fn countdown_bounds() {
        assert_eq!(parse_countdown("30"), Ok(30));
        assert_eq!(parse_countdown("0"), Err(ArgError::CountdownOutOfRange(0)));
        assert_eq!(
            parse_countdown("40000"),
            Err(ArgError::CountdownOutOfRange(40000))
        );
    }

    #[test]
    fn hex_payload() {
        assert_eq!(parse_hex_payload("0011"), Ok(vec![0x00, 0x11]));
        assert_eq!(parse_hex_payload("00g1"), Err(ArgError::BadHexPayload));
        assert_eq!(parse_hex_payload("011"), Err(ArgError::BadHexPayload));
    }
}
