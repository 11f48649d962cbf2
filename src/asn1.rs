//! Minimal ASN.1 DER reader/writer: just enough to build and inspect the
//! PKCS#7 structures the signer needs.

use crate::error::Error;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;
pub const TAG_CONTEXT_0: u8 = 0xA0;

/// A parsed (or about-to-be-encoded) DER value.
#[derive(Debug, Clone)]
pub struct Value {
    pub tag: u8,
    pub children: Vec<Value>,
    pub data: Vec<u8>,
}

impl Value {
    pub fn is_constructed(&self) -> bool {
        self.tag & 0x20 != 0
    }

    /// Encode this value (and its children, if constructed) as DER bytes.
    pub fn encode(&self) -> Vec<u8> {
        let body = if self.is_constructed() {
            let mut b = Vec::new();
            for child in &self.children {
                b.extend(child.encode());
            }
            b
        } else {
            self.data.clone()
        };
        let mut out = vec![self.tag];
        push_length(&mut out, body.len());
        out.extend(body);
        out
    }

    /// Parse a single DER value (and, if constructed, recursively its
    /// children) starting at `buf[0]`. Returns the value and the number of
    /// bytes consumed.
    pub fn parse(buf: &[u8]) -> Result<(Value, usize), Error> {
        if buf.is_empty() {
            return Err(Error::Asn1("empty input".into()));
        }
        let tag = buf[0];
        let (len, len_bytes) = read_length(&buf[1..])?;
        let body_start = 1 + len_bytes;
        let body_end = body_start + len;
        if body_end > buf.len() {
            return Err(Error::Asn1("truncated DER value".into()));
        }
        let body = &buf[body_start..body_end];

        let value = if tag & 0x20 != 0 {
            let mut children = Vec::new();
            let mut pos = 0;
            while pos < body.len() {
                let (child, consumed) = Value::parse(&body[pos..])?;
                children.push(child);
                pos += consumed;
            }
            Value {
                tag,
                children,
                data: Vec::new(),
            }
        } else {
            Value {
                tag,
                children: Vec::new(),
                data: body.to_vec(),
            }
        };

        Ok((value, body_end))
    }
}

fn push_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.push(0x81);
        out.push(len as u8);
    } else if len <= 0xFFFF {
        out.push(0x82);
        out.push((len >> 8) as u8);
        out.push((len & 0xFF) as u8);
    } else {
        out.push(0x83);
        out.push((len >> 16) as u8);
        out.push(((len >> 8) & 0xFF) as u8);
        out.push((len & 0xFF) as u8);
    }
}

fn read_length(buf: &[u8]) -> Result<(usize, usize), Error> {
    if buf.is_empty() {
        return Err(Error::Asn1("missing length byte".into()));
    }
    let first = buf[0];
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    let num_bytes = (first & 0x7F) as usize;
    if num_bytes == 0 || buf.len() < 1 + num_bytes {
        return Err(Error::Asn1("truncated long-form length".into()));
    }
    let mut len = 0usize;
    for &b in &buf[1..1 + num_bytes] {
        len = (len << 8) | b as usize;
    }
    Ok((len, 1 + num_bytes))
}

/// Build a SEQUENCE (or other constructed-tag value) from children.
pub fn mk_seq_tag(tag: u8, children: Vec<Value>) -> Value {
    Value {
        tag,
        children,
        data: Vec::new(),
    }
}

pub fn mk_seq(children: Vec<Value>) -> Value {
    mk_seq_tag(TAG_SEQUENCE, children)
}

pub fn mk_set(children: Vec<Value>) -> Value {
    mk_seq_tag(TAG_SET, children)
}

pub fn mk_int(value: u64) -> Value {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 && bytes[0] == 0 {
        bytes.remove(0);
    }
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    Value {
        tag: TAG_INTEGER,
        children: Vec::new(),
        data: bytes,
    }
}

pub fn mk_int_bytes(bytes: Vec<u8>) -> Value {
    let mut bytes = bytes;
    if bytes.is_empty() {
        bytes.push(0);
    }
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    Value {
        tag: TAG_INTEGER,
        children: Vec::new(),
        data: bytes,
    }
}

pub fn mk_bin(tag: u8, data: Vec<u8>) -> Value {
    Value {
        tag,
        children: Vec::new(),
        data,
    }
}

pub fn mk_oid(bytes: &[u8]) -> Value {
    mk_bin(TAG_OID, bytes.to_vec())
}

pub fn mk_nil() -> Value {
    Value {
        tag: TAG_NULL,
        children: Vec::new(),
        data: Vec::new(),
    }
}

pub fn mk_bitstring(bytes: Vec<u8>) -> Value {
    let mut data = Vec::with_capacity(bytes.len() + 1);
    data.push(0); // no unused bits
    data.extend(bytes);
    Value {
        tag: TAG_BIT_STRING,
        children: Vec::new(),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_simple_sequence() {
        let value = mk_seq(vec![mk_int(42), mk_oid(&[0x2A, 0x86, 0x48])]);
        let encoded = value.encode();
        let (parsed, consumed) = Value::parse(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(parsed.tag, TAG_SEQUENCE);
        assert_eq!(parsed.children.len(), 2);
        assert_eq!(parsed.children[0].data, vec![42]);
    }

    #[test]
    fn long_form_length_round_trips() {
        let big = vec![0xABu8; 300];
        let value = mk_bin(TAG_OCTET_STRING, big.clone());
        let encoded = value.encode();
        assert_eq!(encoded[1], 0x82);
        let (parsed, _) = Value::parse(&encoded).unwrap();
        assert_eq!(parsed.data, big);
    }

    #[test]
    fn integer_gets_leading_zero_when_high_bit_set() {
        let value = mk_int_bytes(vec![0xFF, 0x00]);
        assert_eq!(value.data[0], 0);
    }
}
