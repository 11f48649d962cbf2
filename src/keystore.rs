//! Java KeyStore (JKS) reader: parses the entry table and recovers a
//! private key blob from its "protected key" encryption using the
//! iterated-SHA1 keystream construction JKS is built on.

use crate::asn1::Value;
use crate::error::{Error, Result};
use sha1::{Digest, Sha1};
use std::io::Read;

const MAGIC: u32 = 0xFEED_FEED;
const PRIVATE_KEY_TAG: u32 = 1;

pub struct KeystoreEntry {
    pub alias: String,
    pub encrypted_key: Vec<u8>,
    pub cert_chain: Vec<Vec<u8>>,
}

pub struct Keystore {
    pub entries: Vec<KeystoreEntry>,
}

impl Keystore {
    pub fn load<R: Read>(mut r: R) -> Result<Self> {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf)?;
        Self::parse(&buf)
    }

    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(buf);
        let magic = cur.u32()?;
        if magic != MAGIC {
            return Err(Error::InvalidFormat("not a JKS keystore (bad magic)".into()));
        }
        let _version = cur.u32()?;
        let count = cur.u32()?;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = cur.u32()?;
            let alias = cur.utf(2)?;
            let _timestamp = cur.u64()?;

            if tag == PRIVATE_KEY_TAG {
                let key_len = cur.u32()? as usize;
                let encrypted_key = cur.bytes(key_len)?;
                let chain_count = cur.u32()?;
                let mut cert_chain = Vec::with_capacity(chain_count as usize);
                for _ in 0..chain_count {
                    let _cert_type = cur.utf(2)?;
                    let cert_len = cur.u32()? as usize;
                    cert_chain.push(cur.bytes(cert_len)?);
                }
                entries.push(KeystoreEntry {
                    alias,
                    encrypted_key,
                    cert_chain,
                });
            } else {
                // Trusted-certificate entry: skip, not needed for signing.
                let _cert_type = cur.utf(2)?;
                let cert_len = cur.u32()? as usize;
                let _ = cur.bytes(cert_len)?;
            }
        }
        Ok(Self { entries })
    }

    pub fn find(&self, alias: &str) -> Option<&KeystoreEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }

    /// If there is exactly one private-key entry, or `alias` is given and
    /// found, return it.
    pub fn select<'a>(&'a self, alias: Option<&str>) -> Result<&'a KeystoreEntry> {
        match alias {
            Some(a) => self
                .find(a)
                .ok_or_else(|| Error::CertMetaExtractionFailed(format!("no such alias: {a}"))),
            None => self.entries.first().ok_or_else(|| {
                Error::CertMetaExtractionFailed("keystore has no private key entries".into())
            }),
        }
    }
}

/// Decrypt a JKS "protected key" blob with the keystore password.
///
/// Layout: 20-byte salt, encrypted key bytes, 20-byte SHA-1 integrity
/// check. The keystream is built by iterated SHA-1 seeded with the salt:
/// `stream_0 = SHA1(password_utf16be ++ salt)`,
/// `stream_{i+1} = SHA1(password_utf16be ++ stream_i)`, concatenated and
/// truncated to the key length, then XORed with the encrypted bytes.
pub fn recover_key(encrypted: &[u8], password: &str) -> Result<Vec<u8>> {
    if encrypted.len() < 40 {
        return Err(Error::KeyDecryptionFailed);
    }
    let salt = &encrypted[0..20];
    let middle = &encrypted[20..encrypted.len() - 20];
    let check = &encrypted[encrypted.len() - 20..];

    let password_utf16be = utf16be(password);

    let mut plain = Vec::with_capacity(middle.len());
    let mut digest = salt.to_vec();
    while plain.len() < middle.len() {
        let mut hasher = Sha1::new();
        hasher.update(&password_utf16be);
        hasher.update(&digest);
        digest = hasher.finalize().to_vec();
        let take = (middle.len() - plain.len()).min(digest.len());
        for i in 0..take {
            plain.push(middle[plain.len()] ^ digest[i]);
        }
    }

    let mut check_hasher = Sha1::new();
    check_hasher.update(&password_utf16be);
    check_hasher.update(&plain);
    let computed_check = check_hasher.finalize();
    if computed_check.as_slice() != check {
        return Err(Error::KeyDecryptionFailed);
    }

    Ok(plain)
}

fn utf16be(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

/// Descend a DER tree and return the bytes of the first OCTET STRING found
/// (depth-first). Used both to unwrap the stored key blob's `SEQUENCE {
/// AlgorithmIdentifier, OCTET STRING encryptedData }` before
/// [`recover_key`], and to unwrap the recovered key's own DER wrapper down
/// to the raw PKCS#1 bytes.
pub fn unwrap_octet_string(der: &[u8]) -> Result<Vec<u8>> {
    let (value, _) = Value::parse(der).map_err(|_| Error::KeyDecryptionFailed)?;
    find_octet_string(&value).ok_or(Error::KeyDecryptionFailed)
}

/// Decode the PKCS#8-ish DER wrapper around the recovered key (a SEQUENCE
/// containing an algorithm id and an OCTET STRING holding the raw PKCS#1
/// RSA private key) and return the inner OCTET STRING bytes.
pub fn extract_pkcs1_key(der: &[u8]) -> Result<Vec<u8>> {
    unwrap_octet_string(der)
}

fn find_octet_string(value: &Value) -> Option<Vec<u8>> {
    if value.tag == crate::asn1::TAG_OCTET_STRING {
        return Some(value.data.clone());
    }
    for child in &value.children {
        if let Some(found) = find_octet_string(child) {
            return Some(found);
        }
    }
    None
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u32(&mut self) -> Result<u32> {
        self.require(4)?;
        let v = u32::from_be_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn u64(&mut self) -> Result<u64> {
        self.require(8)?;
        let v = u64::from_be_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    fn bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.require(len)?;
        let v = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(v)
    }

    /// Java's "modified UTF-8" is close enough to plain UTF-8 for the
    /// ASCII aliases this format actually carries; `len_width` is the
    /// size of the length prefix (JKS uses a 16-bit big-endian length).
    fn utf(&mut self, len_width: usize) -> Result<String> {
        let len = match len_width {
            2 => self.u16()? as usize,
            _ => return Err(Error::InvalidFormat("unsupported string length width".into())),
        };
        let bytes = self.bytes(len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn u16(&mut self) -> Result<u16> {
        self.require(2)?;
        let v = u16::from_be_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        Ok(v)
    }

    fn require(&self, n: usize) -> Result<()> {
        if self.pos + n > self.buf.len() {
            Err(Error::InvalidFormat("truncated keystore".into()))
        } else {
            Ok(())
        }
    }
}
