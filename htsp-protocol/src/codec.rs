//! Codec for encoding and decoding HTSMSG frames.
//!
//! Frame format:
//! ```text
//! +-----------------+--------------------------------------+
//! | Length (u32 BE) | Field records (implicit top-level map) |
//! +-----------------+--------------------------------------+
//! ```
//!
//! Field record:
//! ```text
//! +------+----------+---------------+--------+---------+
//! | Type | Name len | Data len      | Name   | Data    |
//! | u8   | u8       | u32 BE        | n bytes| d bytes |
//! +------+----------+---------------+--------+---------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::types::*;

/// Encode a message into a complete frame, length prefix included.
pub fn encode_frame(msg: &HtsMsg) -> Result<Bytes, ProtocolError> {
    let body = encode_message(msg)?;
    let body_len = u32::try_from(body.len())
        .map_err(|_| ProtocolError::FrameTooLarge(u32::MAX, MAX_FRAME_SIZE))?;
    if body_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body_len, MAX_FRAME_SIZE));
    }

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.put_u32(body_len);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Encode a message body (the field records of the top-level map).
pub fn encode_message(msg: &HtsMsg) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_fields(&mut buf, msg.fields().iter().map(|f| (f.name.as_str(), &f.value)))?;
    Ok(buf.freeze())
}

fn encode_fields<'a, I>(buf: &mut BytesMut, fields: I) -> Result<(), ProtocolError>
where
    I: Iterator<Item = (&'a str, &'a HtsValue)>,
{
    for (name, value) in fields {
        encode_field(buf, name, value)?;
    }
    Ok(())
}

fn encode_field(buf: &mut BytesMut, name: &str, value: &HtsValue) -> Result<(), ProtocolError> {
    let name_bytes = name.as_bytes();
    let name_len = u8::try_from(name_bytes.len()).map_err(|_| ProtocolError::InvalidField {
        field: "name",
        reason: format!("field name '{}' longer than 255 bytes", name),
    })?;

    let mut payload = BytesMut::new();
    match value {
        HtsValue::Map(map) => {
            encode_fields(
                &mut payload,
                map.fields().iter().map(|f| (f.name.as_str(), &f.value)),
            )?;
        }
        HtsValue::List(items) => {
            encode_fields(&mut payload, items.iter().map(|v| ("", v)))?;
        }
        HtsValue::S64(v) => encode_s64(&mut payload, *v),
        HtsValue::Str(s) => payload.put_slice(s.as_bytes()),
        HtsValue::Bin(b) => payload.put_slice(b),
    }

    let data_len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::FrameTooLarge(u32::MAX, MAX_FRAME_SIZE))?;

    buf.put_u8(value.field_type().into());
    buf.put_u8(name_len);
    buf.put_u32(data_len);
    buf.put_slice(name_bytes);
    buf.put_slice(&payload);
    Ok(())
}

/// Minimal little-endian form; zero has an empty payload.
fn encode_s64(buf: &mut BytesMut, value: i64) {
    let mut u = value as u64;
    while u != 0 {
        buf.put_u8(u as u8);
        u >>= 8;
    }
}

/// Read the body length from a frame prefix.
/// Returns None if there's not enough data yet.
pub fn decode_frame_len(buf: &[u8]) -> Result<Option<u32>, ProtocolError> {
    let Some(prefix) = buf.get(..FRAME_HEADER_SIZE) else {
        return Ok(None);
    };
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }
    Ok(Some(len))
}

/// Decode a frame body (without the length prefix) into a message.
pub fn decode_message(body: Bytes) -> Result<HtsMsg, ProtocolError> {
    let len = body.len();
    decode_fields(&body, 0, len, 0).map(HtsMsg::from)
}

/// Decode the field records in `buf[start..end]`.
///
/// Every header and payload is checked against the parent's bounds before it
/// is touched, so a truncated or lying frame yields an error instead of a
/// read past the buffer.
fn decode_fields(
    buf: &Bytes,
    start: usize,
    end: usize,
    depth: usize,
) -> Result<Vec<HtsField>, ProtocolError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
    }

    let mut fields = Vec::new();
    let mut pos = start;

    while pos < end {
        let remaining = end - pos;
        if remaining < FIELD_HEADER_SIZE {
            return Err(ProtocolError::incomplete(FIELD_HEADER_SIZE, remaining));
        }

        let type_byte = buf[pos];
        let name_len = buf[pos + 1] as usize;
        let data_len =
            u32::from_be_bytes([buf[pos + 2], buf[pos + 3], buf[pos + 4], buf[pos + 5]]) as usize;
        pos += FIELD_HEADER_SIZE;

        let body_len = name_len
            .checked_add(data_len)
            .ok_or(ProtocolError::incomplete(usize::MAX, end - pos))?;
        if end - pos < body_len {
            return Err(ProtocolError::incomplete(body_len, end - pos));
        }

        let name = String::from_utf8_lossy(&buf[pos..pos + name_len]).into_owned();
        let data_start = pos + name_len;
        let data_end = data_start + data_len;
        pos = data_end;

        let field_type =
            FieldType::try_from(type_byte).map_err(ProtocolError::UnknownFieldType)?;

        let value = match field_type {
            FieldType::Map => {
                HtsValue::Map(decode_fields(buf, data_start, data_end, depth + 1)?.into())
            }
            FieldType::List => HtsValue::List(
                decode_fields(buf, data_start, data_end, depth + 1)?
                    .into_iter()
                    .map(|f| f.value)
                    .collect(),
            ),
            FieldType::S64 => HtsValue::S64(decode_s64(&buf[data_start..data_end])?),
            FieldType::Str => HtsValue::Str(
                String::from_utf8_lossy(&buf[data_start..data_end]).into_owned(),
            ),
            FieldType::Bin => HtsValue::Bin(buf.slice(data_start..data_end)),
        };

        fields.push(HtsField { name, value });
    }

    Ok(fields)
}

fn decode_s64(data: &[u8]) -> Result<i64, ProtocolError> {
    if data.len() > 8 {
        return Err(ProtocolError::InvalidIntegerLength(data.len()));
    }
    let u = data.iter().rev().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    Ok(u as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_bytes(field_type: u8, name: &str, data: &[u8]) -> Vec<u8> {
        let mut out = vec![field_type, name.len() as u8];
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_s64_wire_layout() {
        let msg = HtsMsg::new().with_s64("seq", 0x1234);
        let body = encode_message(&msg).unwrap();
        assert_eq!(&body[..], &field_bytes(2, "seq", &[0x34, 0x12])[..]);

        let zero = encode_message(&HtsMsg::new().with_s64("z", 0)).unwrap();
        assert_eq!(&zero[..], &field_bytes(2, "z", &[])[..]);

        let neg = encode_message(&HtsMsg::new().with_s64("n", -1)).unwrap();
        assert_eq!(&neg[..], &field_bytes(2, "n", &[0xFF; 8])[..]);
    }

    #[test]
    fn test_scalar_fields_reencode_identically() {
        let mut wire = Vec::new();
        wire.extend(field_bytes(2, "id", &[0x01, 0x00, 0x01]));
        wire.extend(field_bytes(2, "neg", &[0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]));
        wire.extend(field_bytes(3, "channelName", b"BBC One HD"));
        wire.extend(field_bytes(4, "challenge", &[0, 1, 2, 250, 251]));

        let msg = decode_message(Bytes::from(wire.clone())).unwrap();
        assert_eq!(msg.get_s64("id"), Some(0x010001));
        assert_eq!(msg.get_s64("neg"), Some(-2));
        assert_eq!(msg.get_str("channelName"), Some("BBC One HD"));
        assert_eq!(msg.get_bin("challenge").map(|b| b.to_vec()), Some(vec![0, 1, 2, 250, 251]));

        let reencoded = encode_message(&msg).unwrap();
        assert_eq!(&reencoded[..], &wire[..]);
    }

    #[test]
    fn test_nested_structure_preserved() {
        let service = HtsMsg::new().with_str("type", "Radio").with_s64("caid", 0x0500);
        let msg = HtsMsg::request(Method::ChannelAdd)
            .with_s64("channelId", 5)
            .with_list("tags", vec![HtsValue::S64(1), HtsValue::S64(2)])
            .with_list("services", vec![HtsValue::Map(service)]);

        let frame = encode_frame(&msg).unwrap();
        let len = decode_frame_len(&frame).unwrap().unwrap() as usize;
        assert_eq!(len, frame.len() - FRAME_HEADER_SIZE);

        let decoded = decode_message(frame.slice(FRAME_HEADER_SIZE..)).unwrap();
        assert_eq!(decoded, msg);
        let services = decoded.get_list("services").unwrap();
        assert_eq!(services[0].as_map().unwrap().get_str("type"), Some("Radio"));
    }

    #[test]
    fn test_empty_body_is_empty_map() {
        let msg = decode_message(Bytes::new()).unwrap();
        assert!(msg.is_empty());
    }

    #[test]
    fn test_truncated_header() {
        let result = decode_message(Bytes::from_static(&[2, 3, 0, 0]));
        assert!(matches!(result, Err(ProtocolError::IncompleteField { .. })));
    }

    #[test]
    fn test_data_length_overruns_frame() {
        let mut wire = field_bytes(3, "title", b"News");
        // claim 100 bytes of data
        wire[2..6].copy_from_slice(&100u32.to_be_bytes());
        let result = decode_message(Bytes::from(wire));
        assert!(matches!(result, Err(ProtocolError::IncompleteField { .. })));
    }

    #[test]
    fn test_nested_overrun_is_bounded_by_parent() {
        // inner field claims more than the enclosing map holds
        let mut inner = field_bytes(3, "a", b"xy");
        inner[2..6].copy_from_slice(&3u32.to_be_bytes());
        let mut wire = field_bytes(1, "m", &inner);
        wire.extend(field_bytes(3, "tail", b"zz"));
        let result = decode_message(Bytes::from(wire));
        assert!(matches!(result, Err(ProtocolError::IncompleteField { .. })));
    }

    #[test]
    fn test_oversized_s64_rejected() {
        let wire = field_bytes(2, "x", &[1; 9]);
        let result = decode_message(Bytes::from(wire));
        assert_eq!(result, Err(ProtocolError::InvalidIntegerLength(9)));
    }

    #[test]
    fn test_unknown_field_type_rejected() {
        let wire = field_bytes(9, "x", &[1]);
        let result = decode_message(Bytes::from(wire));
        assert_eq!(result, Err(ProtocolError::UnknownFieldType(9)));
    }

    #[test]
    fn test_nesting_depth_limit() {
        let mut wire = field_bytes(2, "leaf", &[1]);
        for _ in 0..=MAX_NESTING_DEPTH {
            wire = field_bytes(1, "m", &wire);
        }
        let result = decode_message(Bytes::from(wire));
        assert_eq!(result, Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH)));
    }

    #[test]
    fn test_frame_len_checks() {
        assert_eq!(decode_frame_len(&[0, 0]).unwrap(), None);
        assert_eq!(decode_frame_len(&[0, 0, 1, 0]).unwrap(), Some(256));
        let too_big = (MAX_FRAME_SIZE + 1).to_be_bytes();
        assert!(matches!(
            decode_frame_len(&too_big),
            Err(ProtocolError::FrameTooLarge(_, _))
        ));
    }

    #[test]
    fn test_invalid_utf8_string_is_lossy() {
        let wire = field_bytes(3, "title", &[b'a', 0xFF, b'b']);
        let msg = decode_message(Bytes::from(wire)).unwrap();
        assert_eq!(msg.get_str("title"), Some("a\u{FFFD}b"));
    }
}
