//! Tag-length-value wire format: immutable byte-range views, varint
//! primitives, a field iterator, and a small message writer.
//!
//! Packets arrive as chunked binary messages. Each field is encoded as a
//! header varint `(field_number << 3) | wire_type` followed by the payload.
//! Payloads are read as views over the chunk's backing buffer and never
//! copied unless interning forces ownership.

use crate::utils::error::WireError;
use bytes::Bytes;
use smallvec::SmallVec;

pub mod fields;

/// Supported wire types.
const WIRE_TYPE_VARINT: u8 = 0;
const WIRE_TYPE_FIXED64: u8 = 1;
const WIRE_TYPE_LEN_DELIMITED: u8 = 2;
const WIRE_TYPE_FIXED32: u8 = 5;

/// An immutable view over a byte range of a refcounted backing buffer.
///
/// Cloning is cheap (one refcount bump); slicing never copies. Two views
/// over the same backing buffer can be recognized by object identity, which
/// the token buffer exploits to store only an offset delta.
#[derive(Debug, Clone)]
pub struct TraceBlob {
    buf: Bytes,
    offset: usize,
    len: usize,
}

impl TraceBlob {
    /// Wrap an owned byte vector as a blob covering the whole buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let buf = Bytes::from(data);
        let len = buf.len();
        Self {
            buf,
            offset: 0,
            len,
        }
    }

    /// Wrap an existing refcounted buffer.
    pub fn from_bytes(buf: Bytes) -> Self {
        let len = buf.len();
        Self {
            buf,
            offset: 0,
            len,
        }
    }

    /// Reconstruct a view from its parts. Panics if the range is out of
    /// bounds (programming invariant, not input).
    pub fn from_parts(buf: Bytes, offset: usize, len: usize) -> Self {
        assert!(offset + len <= buf.len(), "blob range out of bounds");
        Self { buf, offset, len }
    }

    /// A sub-view relative to this view's start. Zero-copy.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        assert!(start + len <= self.len, "blob slice out of bounds");
        Self {
            buf: self.buf.clone(),
            offset: self.offset + start,
            len,
        }
    }

    /// The bytes covered by this view.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.offset..self.offset + self.len]
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The backing buffer this view borrows from.
    pub fn backing(&self) -> &Bytes {
        &self.buf
    }

    /// Whether two views share the same backing buffer object.
    pub fn same_backing(&self, other: &TraceBlob) -> bool {
        same_bytes_object(&self.buf, &other.buf)
    }
}

/// Object identity for `Bytes` handles: same start pointer and length means
/// both handles refer to the same underlying allocation slice.
pub(crate) fn same_bytes_object(a: &Bytes, b: &Bytes) -> bool {
    a.as_ptr() == b.as_ptr() && a.len() == b.len()
}

/// A decoded field value.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    Bytes(TraceBlob),
}

impl FieldValue {
    /// The varint payload, if this field is a varint.
    pub fn as_varint(&self) -> Option<u64> {
        match self {
            FieldValue::Varint(v) => Some(*v),
            _ => None,
        }
    }

    /// The length-delimited payload, if this field carries one.
    pub fn as_blob(&self) -> Option<&TraceBlob> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// One decoded field: the field number and its value.
#[derive(Debug, Clone)]
pub struct Field {
    pub id: u32,
    pub value: FieldValue,
}

/// Iterator over the fields of one TLV message.
pub struct FieldIter<'a> {
    blob: &'a TraceBlob,
    pos: usize,
}

impl<'a> FieldIter<'a> {
    pub fn new(blob: &'a TraceBlob) -> Self {
        Self { blob, pos: 0 }
    }
}

impl Iterator for FieldIter<'_> {
    type Item = Result<Field, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.blob.bytes();
        if self.pos >= data.len() {
            return None;
        }
        match read_field(self.blob, data, &mut self.pos) {
            Ok(field) => Some(Ok(field)),
            Err(e) => {
                // Stop iterating after the first malformed field; the rest
                // of the message cannot be framed reliably.
                self.pos = data.len();
                Some(Err(e))
            }
        }
    }
}

fn read_field(blob: &TraceBlob, data: &[u8], pos: &mut usize) -> Result<Field, WireError> {
    let header = read_varint(data, pos)?;
    let id = (header >> 3) as u32;
    let wire_type = (header & 0x7) as u8;
    if id == 0 {
        return Err(WireError::ZeroFieldId);
    }
    let value = match wire_type {
        WIRE_TYPE_VARINT => FieldValue::Varint(read_varint(data, pos)?),
        WIRE_TYPE_FIXED64 => {
            let raw = read_exact::<8>(data, pos)?;
            FieldValue::Fixed64(u64::from_le_bytes(raw))
        }
        WIRE_TYPE_FIXED32 => {
            let raw = read_exact::<4>(data, pos)?;
            FieldValue::Fixed32(u32::from_le_bytes(raw))
        }
        WIRE_TYPE_LEN_DELIMITED => {
            let len = read_varint(data, pos)? as usize;
            if *pos + len > data.len() {
                return Err(WireError::Truncated {
                    needed: len,
                    available: data.len() - *pos,
                });
            }
            let view = blob.slice(*pos, len);
            *pos += len;
            FieldValue::Bytes(view)
        }
        other => return Err(WireError::UnsupportedWireType(other)),
    };
    Ok(Field { id, value })
}

fn read_exact<const N: usize>(data: &[u8], pos: &mut usize) -> Result<[u8; N], WireError> {
    if *pos + N > data.len() {
        return Err(WireError::Truncated {
            needed: N,
            available: data.len() - *pos,
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&data[*pos..*pos + N]);
    *pos += N;
    Ok(out)
}

/// Decode a LEB128 varint, advancing `pos`.
pub fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64, WireError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    let start = *pos;
    loop {
        let byte = *data.get(*pos).ok_or(WireError::TruncatedVarint(start))?;
        *pos += 1;
        if shift == 63 && byte > 1 {
            return Err(WireError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(WireError::VarintOverflow);
        }
    }
}

/// Encode a LEB128 varint.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Zigzag encoding for signed varints.
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Find the first occurrence of a field in a message.
///
/// Malformed trailing bytes are ignored; a field found before the
/// malformation is still returned.
pub fn find_field(blob: &TraceBlob, field_id: u32) -> Option<FieldValue> {
    for field in FieldIter::new(blob) {
        match field {
            Ok(f) if f.id == field_id => return Some(f.value),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

/// Collect every occurrence of a field in a message.
pub fn collect_fields(blob: &TraceBlob, field_id: u32) -> SmallVec<[FieldValue; 4]> {
    let mut out = SmallVec::new();
    for field in FieldIter::new(blob).flatten() {
        if field.id == field_id {
            out.push(field.value);
        }
    }
    out
}

/// Incremental writer for TLV messages. Used by tests and by tokenizers
/// that split a batched packet into re-wrapped synthetic packets.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn append_header(&mut self, field_id: u32, wire_type: u8) {
        debug_assert!(field_id != 0, "field id zero is reserved");
        write_varint(&mut self.buf, (u64::from(field_id) << 3) | u64::from(wire_type));
    }

    pub fn append_varint(&mut self, field_id: u32, value: u64) -> &mut Self {
        self.append_header(field_id, WIRE_TYPE_VARINT);
        write_varint(&mut self.buf, value);
        self
    }

    pub fn append_zigzag(&mut self, field_id: u32, value: i64) -> &mut Self {
        self.append_varint(field_id, zigzag_encode(value))
    }

    pub fn append_bytes(&mut self, field_id: u32, data: &[u8]) -> &mut Self {
        self.append_header(field_id, WIRE_TYPE_LEN_DELIMITED);
        write_varint(&mut self.buf, data.len() as u64);
        self.buf.extend_from_slice(data);
        self
    }

    pub fn append_string(&mut self, field_id: u32, value: &str) -> &mut Self {
        self.append_bytes(field_id, value.as_bytes())
    }

    pub fn append_message(&mut self, field_id: u32, message: &MessageWriter) -> &mut Self {
        self.append_bytes(field_id, &message.buf)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn into_blob(self) -> TraceBlob {
        TraceBlob::from_vec(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut pos = 0;
            assert_eq!(read_varint(&buf, &mut pos).unwrap(), value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_varint_truncated() {
        let buf = vec![0x80u8, 0x80];
        let mut pos = 0;
        assert_eq!(
            read_varint(&buf, &mut pos),
            Err(WireError::TruncatedVarint(0))
        );
    }

    #[test]
    fn test_zigzag_roundtrip() {
        for value in [0i64, 1, -1, 50, -50, i64::MAX, i64::MIN] {
            assert_eq!(zigzag_decode(zigzag_encode(value)), value);
        }
    }

    #[test]
    fn test_field_iter_mixed_fields() {
        let mut msg = MessageWriter::new();
        msg.append_varint(1, 42);
        msg.append_bytes(2, b"hello");
        msg.append_varint(3, 7);
        let blob = msg.into_blob();

        let fields: Vec<Field> = FieldIter::new(&blob).map(|f| f.unwrap()).collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].id, 1);
        assert_eq!(fields[0].value.as_varint(), Some(42));
        assert_eq!(fields[1].id, 2);
        assert_eq!(fields[1].value.as_blob().unwrap().bytes(), b"hello");
        assert_eq!(fields[2].value.as_varint(), Some(7));
    }

    #[test]
    fn test_field_iter_stops_on_malformed() {
        let mut msg = MessageWriter::new();
        msg.append_varint(1, 42);
        let mut raw = msg.finish();
        // A length-delimited header promising more bytes than remain.
        raw.extend_from_slice(&[(2 << 3) | 2, 200]);
        let blob = TraceBlob::from_vec(raw);

        let mut iter = FieldIter::new(&blob);
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_blob_slicing_shares_backing() {
        let blob = TraceBlob::from_vec(vec![1, 2, 3, 4, 5]);
        let sub = blob.slice(1, 3);
        assert_eq!(sub.bytes(), &[2, 3, 4]);
        assert_eq!(sub.offset(), 1);
        assert!(sub.same_backing(&blob));
    }

    #[test]
    fn test_find_field() {
        let mut msg = MessageWriter::new();
        msg.append_varint(5, 99);
        let blob = msg.into_blob();
        assert_eq!(find_field(&blob, 5).and_then(|v| v.as_varint()), Some(99));
        assert!(find_field(&blob, 6).is_none());
    }
}
