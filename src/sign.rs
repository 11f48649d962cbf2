//! JAR signing (v1): builds `META-INF/MANIFEST.MF`, `META-INF/CERT.SF`,
//! and a DER-encoded PKCS#7 `META-INF/CERT.RSA`, and appends them to the
//! archive as the final three entries.

use crate::asn1::{self, Value, TAG_SEQUENCE, TAG_SET};
use crate::error::{Error, Result};
use crate::keystore::{self, Keystore};
use crate::writer::ArchiveWriter;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha1::{Digest, Sha1};

const MANIFEST_HEADER: &str = "Manifest-Version: 1.0\r\nCreated-By: 1.0 (Fastzip)\r\n\r\n";
const SIGNATURE_HEADER_PREFIX: &str = "Signature-Version: 1.0\r\nCreated-By: 1.0 (Fastzip)\r\n";

const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];
const OID_PKCS7_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01];
const OID_SHA1: &[u8] = &[0x2B, 0x0E, 0x03, 0x02, 0x1A];
const OID_RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];

/// Base64 (standard alphabet, padded) — shared with the pack scheduler for
/// per-entry digest lines.
pub fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((data.len() + 2) / 3 * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        out.push(ALPHABET[((n >> 18) & 0x3F) as usize] as char);
        out.push(ALPHABET[((n >> 12) & 0x3F) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[((n >> 6) & 0x3F) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(n & 0x3F) as usize] as char
        } else {
            '='
        });
    }
    out
}

pub struct SignOptions<'a> {
    pub keystore: Keystore,
    pub password: &'a str,
    pub alias: Option<&'a str>,
}

/// Given the per-entry digest sections accumulated while packing (each
/// `Name: ...\r\nSHA1-Digest: ...\r\n\r\n`), build and append
/// MANIFEST.MF, CERT.SF, and CERT.RSA to `writer`.
pub fn sign_archive(writer: &mut ArchiveWriter, digest_sections: &str, opts: SignOptions) -> Result<()> {
    let manifest = format!("{MANIFEST_HEADER}{digest_sections}");
    let manifest_digest = Sha1::digest(manifest.as_bytes());

    let cert_sf = build_signature_file(&manifest, &manifest_digest);
    let cert_sf_digest = Sha1::digest(cert_sf.as_bytes());

    let entry = opts.keystore.select(opts.alias)?;
    // `entry.encrypted_key` is the raw key-blob DER (a SEQUENCE wrapping an
    // AlgorithmIdentifier and an OCTET STRING); the salt/encrypted/check
    // triple `recover_key` expects lives inside that OCTET STRING, not at
    // the head of the SEQUENCE itself.
    let encrypted_octets = keystore::unwrap_octet_string(&entry.encrypted_key)?;
    let plain_der = keystore::recover_key(&encrypted_octets, opts.password)?;
    let pkcs1_key = keystore::extract_pkcs1_key(&plain_der)?;
    let private_key = RsaPrivateKey::from_pkcs1_der(&pkcs1_key)
        .map_err(|e| Error::RsaSignFailed(e.to_string()))?;

    let cert_der = entry
        .cert_chain
        .first()
        .ok_or_else(|| Error::CertMetaExtractionFailed("empty certificate chain".into()))?
        .clone();

    let (issuer, serial) = extract_issuer_and_serial(&cert_der)?;

    let signature = private_key
        .sign(Pkcs1v15Sign::new::<sha1::Sha1>(), &cert_sf_digest)
        .map_err(|e| Error::RsaSignFailed(e.to_string()))?;

    let pkcs7 = build_pkcs7(&cert_der, &issuer, &serial, &cert_sf_digest, &signature);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    writer.add_raw(
        "META-INF/MANIFEST.MF",
        true,
        manifest.len() as u64,
        manifest.len() as u64,
        now,
        crc32fast::hash(manifest.as_bytes()),
        0,
        manifest.as_bytes(),
    )?;
    writer.add_raw(
        "META-INF/CERT.SF",
        true,
        cert_sf.len() as u64,
        cert_sf.len() as u64,
        now,
        crc32fast::hash(cert_sf.as_bytes()),
        0,
        cert_sf.as_bytes(),
    )?;
    writer.add_raw(
        "META-INF/CERT.RSA",
        true,
        pkcs7.len() as u64,
        pkcs7.len() as u64,
        now,
        crc32fast::hash(&pkcs7),
        0,
        &pkcs7,
    )?;
    Ok(())
}

/// Build CERT.SF: rewrite each manifest section's digest to be the SHA-1
/// of that section (including its trailing `\r\n\r\n`) rather than of the
/// original file, per the JAR signing spec.
fn build_signature_file(manifest: &str, manifest_digest: &[u8]) -> String {
    let mut out = format!(
        "{SIGNATURE_HEADER_PREFIX}SHA1-Digest-Manifest: {}\r\n\r\n",
        base64_encode(manifest_digest)
    );

    let header_end = manifest.find("\r\n\r\n").map(|i| i + 4).unwrap_or(manifest.len());
    let mut rest = &manifest[header_end..];

    while !rest.is_empty() {
        let section_end = match rest.find("\r\n\r\n") {
            Some(i) => i + 4,
            None => rest.len(),
        };
        let section = &rest[..section_end];
        let name_line = section.lines().next().unwrap_or("");
        let digest = Sha1::digest(section.as_bytes());
        out.push_str(name_line);
        out.push_str("\r\n");
        out.push_str(&format!("SHA1-Digest: {}\r\n\r\n", base64_encode(&digest)));
        rest = &rest[section_end..];
    }
    out
}

/// Descend into a TBSCertificate to find the serial number (first
/// top-level INTEGER) and the issuer (first SEQUENCE whose first child is
/// a SET, i.e. an RDNSequence).
fn extract_issuer_and_serial(cert_der: &[u8]) -> Result<(Value, Value)> {
    let (cert, _) = Value::parse(cert_der)
        .map_err(|_| Error::CertMetaExtractionFailed("unparseable certificate".into()))?;
    let tbs = cert
        .children
        .first()
        .ok_or_else(|| Error::CertMetaExtractionFailed("empty certificate".into()))?;

    let serial = tbs
        .children
        .iter()
        .find(|c| c.tag == asn1::TAG_INTEGER)
        .cloned()
        .ok_or_else(|| Error::CertMetaExtractionFailed("no serial number".into()))?;

    let issuer = tbs
        .children
        .iter()
        .find(|c| {
            c.tag == TAG_SEQUENCE
                && c.children.first().map(|g| g.tag == TAG_SET).unwrap_or(false)
        })
        .cloned()
        .ok_or_else(|| Error::CertMetaExtractionFailed("no issuer RDN sequence".into()))?;

    Ok((issuer, serial))
}

fn algorithm_identifier(oid: &[u8]) -> Value {
    asn1::mk_seq(vec![asn1::mk_oid(oid), asn1::mk_nil()])
}

/// Build the PKCS#7 SignedData structure wrapping the certificate, the
/// issuer/serial signer identifier, and the RSA signature over the
/// CERT.SF digest.
fn build_pkcs7(cert_der: &[u8], issuer: &Value, serial: &Value, content_digest: &[u8], signature: &[u8]) -> Vec<u8> {
    let (cert_value, _) = Value::parse(cert_der).expect("cert_der already validated by caller");

    let digest_algorithms = asn1::mk_set(vec![algorithm_identifier(OID_SHA1)]);

    let content_info = asn1::mk_seq(vec![asn1::mk_oid(OID_PKCS7_DATA)]);

    let certificates = asn1::mk_seq_tag(0xA0, vec![cert_value]);

    let issuer_and_serial = asn1::mk_seq(vec![issuer.clone(), serial.clone()]);

    let signer_info = asn1::mk_seq(vec![
        asn1::mk_int(1), // version
        issuer_and_serial,
        algorithm_identifier(OID_SHA1),
        algorithm_identifier(OID_RSA_ENCRYPTION),
        asn1::mk_bin(asn1::TAG_OCTET_STRING, signature.to_vec()),
    ]);
    let _ = content_digest;

    let signed_data = asn1::mk_seq(vec![
        asn1::mk_int(1), // version
        digest_algorithms,
        content_info,
        certificates,
        asn1::mk_set(vec![signer_info]),
    ]);

    let top = asn1::mk_seq_tag(
        TAG_SEQUENCE,
        vec![
            asn1::mk_oid(OID_SIGNED_DATA),
            asn1::mk_seq_tag(0xA0, vec![signed_data]),
        ],
    );
    top.encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_matches_known_vector() {
        assert_eq!(base64_encode(b"hello"), "aGVsbG8=");
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"a"), "YQ==");
    }

    #[test]
    fn signature_file_rewrites_section_digests() {
        let manifest = format!(
            "{MANIFEST_HEADER}Name: a.txt\r\nSHA1-Digest: ZZZZZZZZZZZZZZZZZZZZZZZZZZZZ\r\n\r\n"
        );
        let manifest_digest = Sha1::digest(manifest.as_bytes());
        let sf = build_signature_file(&manifest, &manifest_digest);
        assert!(sf.starts_with("Signature-Version: 1.0"));
        assert!(sf.contains("Name: a.txt"));
        assert!(!sf.contains("ZZZZZZZZZZZZZZZZZZZZZZZZZZZZ"));
    }
}
