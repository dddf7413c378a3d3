//! Encoding and decoding of single FIX messages.
//!
//! The envelope layout is fixed: `8=FIX.4.2` then `9=<BodyLength>`, with
//! `35=<MsgType>` opening the body and `10=<checksum>` closing the message.
//! BodyLength counts every byte after the SOH terminating tag 9 up to and
//! including the SOH before `10=`. The checksum is the mod-256 sum of all
//! preceding bytes, zero-padded to three digits, computed over the exact
//! bytes as emitted.

use crate::message::{tags, FixMessage, MsgType, BEGIN_STRING, SOH};
use thiserror::Error;

/// Decode failures, in the order they are detected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(&'static str),

    #[error("checksum mismatch: expected {expected:03}, found {found:03}")]
    ChecksumMismatch { expected: u32, found: u32 },

    #[error("missing required envelope field: {0}")]
    MissingEnvelopeField(u32),
}

/// Standard header values for an outgoing message.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    pub msg_type: MsgType,
    pub sender: &'a str,
    pub target: &'a str,
    pub seq: u64,
    pub sending_time: &'a str,
}

/// Mod-256 byte sum, the tag 10 value.
pub fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().map(|b| u32::from(*b)).sum::<u32>() % 256
}

fn push_field(out: &mut Vec<u8>, tag: u32, value: &str) {
    out.extend_from_slice(tag.to_string().as_bytes());
    out.push(b'=');
    out.extend_from_slice(value.as_bytes());
    out.push(SOH);
}

/// Build a complete wire message from an envelope and body fields.
///
/// Body fields are emitted in the order given; callers control tag order.
pub fn encode(envelope: &Envelope<'_>, body: &[(u32, String)]) -> Vec<u8> {
    let mut content = Vec::with_capacity(64 + body.len() * 16);
    push_field(&mut content, tags::MSG_TYPE, envelope.msg_type.as_str());
    push_field(&mut content, tags::SENDER_COMP_ID, envelope.sender);
    push_field(&mut content, tags::TARGET_COMP_ID, envelope.target);
    push_field(&mut content, tags::MSG_SEQ_NUM, &envelope.seq.to_string());
    push_field(&mut content, tags::SENDING_TIME, envelope.sending_time);
    for (tag, value) in body {
        push_field(&mut content, *tag, value);
    }

    let mut message = Vec::with_capacity(content.len() + 32);
    push_field(&mut message, tags::BEGIN_STRING, BEGIN_STRING);
    push_field(&mut message, tags::BODY_LENGTH, &content.len().to_string());
    message.extend_from_slice(&content);

    let ck = checksum(&message);
    push_field(&mut message, tags::CHECKSUM, &format!("{ck:03}"));
    message
}

/// Find the start of the trailing `10=` field (must follow an SOH).
fn find_checksum_field(bytes: &[u8]) -> Option<usize> {
    let needle = [SOH, b'1', b'0', b'='];
    bytes
        .windows(needle.len())
        .rposition(|w| w == needle)
        .map(|pos| pos + 1)
}

/// Parse and validate one complete message.
///
/// The input must be exactly one message; trailing bytes after the
/// checksum SOH are rejected. Splitting a stream into messages is
/// [`crate::framing::FrameBuffer`]'s job.
pub fn decode(bytes: &[u8]) -> Result<FixMessage, DecodeError> {
    if !bytes.starts_with(b"8=") {
        return Err(DecodeError::Malformed("message must start with tag 8"));
    }
    if !bytes.contains(&SOH) {
        return Err(DecodeError::Malformed("missing SOH delimiters"));
    }

    let cs_start =
        find_checksum_field(bytes).ok_or(DecodeError::MissingEnvelopeField(tags::CHECKSUM))?;
    let trailer = &bytes[cs_start..];
    // Trailer must be exactly "10=NNN<SOH>".
    if trailer.len() != 7
        || !trailer[3..6].iter().all(u8::is_ascii_digit)
        || trailer[6] != SOH
    {
        if trailer.len() > 7 {
            return Err(DecodeError::Malformed("trailing bytes after checksum"));
        }
        return Err(DecodeError::Malformed("malformed checksum field"));
    }

    let found: u32 = std::str::from_utf8(&trailer[3..6])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(DecodeError::Malformed("malformed checksum field"))?;
    let expected = checksum(&bytes[..cs_start]);
    if found != expected {
        return Err(DecodeError::ChecksumMismatch { expected, found });
    }

    let mut message = FixMessage::new();
    for field in bytes.split(|b| *b == SOH) {
        if field.is_empty() {
            continue;
        }
        let eq = field
            .iter()
            .position(|b| *b == b'=')
            .ok_or(DecodeError::Malformed("field without '='"))?;
        let tag: u32 = std::str::from_utf8(&field[..eq])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(DecodeError::Malformed("non-numeric tag"))?;
        let value = std::str::from_utf8(&field[eq + 1..])
            .map_err(|_| DecodeError::Malformed("non-UTF8 field value"))?;
        message.push(tag, value);
    }

    const REQUIRED: [u32; 8] = [
        tags::BEGIN_STRING,
        tags::BODY_LENGTH,
        tags::MSG_TYPE,
        tags::SENDER_COMP_ID,
        tags::TARGET_COMP_ID,
        tags::MSG_SEQ_NUM,
        tags::SENDING_TIME,
        tags::CHECKSUM,
    ];
    for tag in REQUIRED {
        if !message.contains(tag) {
            return Err(DecodeError::MissingEnvelopeField(tag));
        }
    }

    if message.get(tags::BEGIN_STRING) != Some(BEGIN_STRING) {
        return Err(DecodeError::Malformed("unsupported BeginString"));
    }

    // BodyLength must cover the bytes between the tag-9 SOH and the SOH
    // before the checksum field.
    let declared: usize = message
        .get(tags::BODY_LENGTH)
        .and_then(|v| v.parse().ok())
        .ok_or(DecodeError::Malformed("non-numeric BodyLength"))?;
    let soh_positions: Vec<usize> = bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == SOH)
        .map(|(i, _)| i)
        .take(2)
        .collect();
    let body_start = match soh_positions.as_slice() {
        [_, second] => second + 1,
        _ => return Err(DecodeError::Malformed("missing SOH delimiters")),
    };
    if cs_start < body_start || cs_start - body_start != declared {
        return Err(DecodeError::Malformed("BodyLength mismatch"));
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_logon() -> Vec<u8> {
        encode(
            &Envelope {
                msg_type: MsgType::Logon,
                sender: "CLIENT",
                target: "EXCHANGE",
                seq: 1,
                sending_time: "20240216-22:44:16",
            },
            &[(tags::HEART_BT_INT, "30".to_string())],
        )
    }

    #[test]
    fn encode_layout() {
        let bytes = sample_logon();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("8=FIX.4.2\x019="));
        assert!(text.contains("\x0135=A\x01"));
        assert!(text.ends_with('\x01'));

        // Tag 35 immediately follows tag 9.
        let after_nine = text.split('\x01').nth(1).unwrap();
        assert!(after_nine.starts_with("9="));
        assert!(text.split('\x01').nth(2).unwrap().starts_with("35="));
    }

    #[test]
    fn body_length_counts_bytes_after_tag_nine() {
        let bytes = sample_logon();
        let msg = decode(&bytes).unwrap();
        let declared: usize = msg.get(tags::BODY_LENGTH).unwrap().parse().unwrap();

        let text = String::from_utf8(bytes).unwrap();
        let nine = text.find("\x019=").unwrap() + 1;
        let body_start = nine + text[nine..].find('\x01').unwrap() + 1;
        let cs = text.rfind("10=").unwrap();
        assert_eq!(declared, cs - body_start);
    }

    #[test]
    fn checksum_is_byte_sum_mod_256() {
        let bytes = sample_logon();
        let cs = bytes.windows(4).rposition(|w| w == [SOH, b'1', b'0', b'=']).unwrap() + 1;
        let manual: u32 = bytes[..cs].iter().map(|b| u32::from(*b)).sum::<u32>() % 256;
        let declared: u32 = std::str::from_utf8(&bytes[cs + 3..cs + 6])
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(manual, declared);
    }

    #[test]
    fn roundtrip_preserves_fields() {
        let bytes = sample_logon();
        let msg = decode(&bytes).unwrap();
        assert_eq!(msg.msg_type(), Some(MsgType::Logon));
        assert_eq!(msg.sender(), Some("CLIENT"));
        assert_eq!(msg.target(), Some("EXCHANGE"));
        assert_eq!(msg.seq_num(), Some(1));
        assert_eq!(msg.get(tags::HEART_BT_INT), Some("30"));
    }

    #[test]
    fn flipped_byte_is_detected() {
        let bytes = sample_logon();
        // Flip one payload byte at a time; every corruption must surface as
        // a checksum or structural error.
        for i in 0..bytes.len() - 7 {
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0x01;
            assert!(decode(&corrupted).is_err(), "flip at {i} went undetected");
        }
    }

    #[test]
    fn wrong_checksum_digit_rejected() {
        let mut bytes = sample_logon();
        let len = bytes.len();
        // Second-to-last byte is the low checksum digit.
        bytes[len - 2] = if bytes[len - 2] == b'9' { b'0' } else { bytes[len - 2] + 1 };
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = sample_logon();
        bytes.extend_from_slice(b"junk");
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn missing_begin_string_rejected() {
        assert_eq!(
            decode(b"9=5\x0135=A\x0110=000\x01"),
            Err(DecodeError::Malformed("message must start with tag 8"))
        );
    }

    #[test]
    fn no_soh_rejected() {
        assert!(decode(b"8=FIX.4.2").is_err());
    }

    #[test]
    fn missing_envelope_field_reported() {
        // Hand-build a message lacking tag 49, with a valid checksum.
        let content = b"35=0\x0156=EXCHANGE\x0134=1\x0152=20240216-22:44:16\x01";
        let mut msg: Vec<u8> = Vec::new();
        msg.extend_from_slice(b"8=FIX.4.2\x01");
        msg.extend_from_slice(format!("9={}\x01", content.len()).as_bytes());
        msg.extend_from_slice(content);
        let ck = checksum(&msg);
        msg.extend_from_slice(format!("10={ck:03}\x01").as_bytes());

        assert_eq!(
            decode(&msg),
            Err(DecodeError::MissingEnvelopeField(tags::SENDER_COMP_ID))
        );
    }

    #[test]
    fn value_may_contain_equals() {
        let bytes = encode(
            &Envelope {
                msg_type: MsgType::ExecutionReport,
                sender: "EXCHANGE",
                target: "CLIENT",
                seq: 2,
                sending_time: "20240216-22:44:16",
            },
            &[(tags::TEXT, "a=b".to_string())],
        );
        let msg = decode(&bytes).unwrap();
        assert_eq!(msg.get(tags::TEXT), Some("a=b"));
    }
}
