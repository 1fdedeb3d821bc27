// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signature Cryptography
//!
//! Concrete signing and verification for the registered signature
//! algorithm URIs: HMAC over SHA-1/256/384/512, RSA PKCS#1 v1.5 over
//! SHA-1/256/384/512, and ECDSA P-256 over SHA-256. DSA URIs are
//! registered for key-length semantics but signing and verifying with them
//! is rejected.
//!
//! ECDSA signature values use the fixed-size `r || s` concatenation the
//! XML signature recommendation mandates, not ASN.1 DER.
//!
//! Key material carries DER encodings: PKCS#8 for private keys, SPKI for
//! public keys. The helpers at the bottom of this module convert between
//! crate-level key types, certificates and `KeyMaterial`.

use hmac::{Hmac, Mac};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey as EcdsaSigningKey, VerifyingKey};
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use xmlsec_stream_domain::entities::{EcCurve, KeyMaterial};
use xmlsec_stream_domain::services::algorithm_registry::{
    AlgorithmRegistry, ALG_DSA_SHA1, ALG_ECDSA_SHA256, ALG_HMAC_SHA1, ALG_HMAC_SHA256,
    ALG_HMAC_SHA384, ALG_HMAC_SHA512, ALG_RSA_SHA1, ALG_RSA_SHA256, ALG_RSA_SHA384, ALG_RSA_SHA512,
};
use xmlsec_stream_domain::XmlSecurityError;

/// The default signature algorithm derived from the signing key: RSA keys
/// sign rsa-sha1, EC keys ecdsa-sha256, symmetric keys hmac-sha1.
pub fn default_signature_uri_for_key(key: &KeyMaterial) -> Result<&'static str, XmlSecurityError> {
    match key {
        KeyMaterial::Symmetric(_) => Ok(ALG_HMAC_SHA1),
        KeyMaterial::RsaPrivate { .. } | KeyMaterial::RsaPublic { .. } => Ok(ALG_RSA_SHA1),
        KeyMaterial::EcPrivate { .. } | KeyMaterial::EcPublic { .. } => Ok(ALG_ECDSA_SHA256),
        KeyMaterial::DsaPublic { .. } => Ok(ALG_DSA_SHA1),
    }
}

/// Signs canonicalized SignedInfo bytes.
pub fn sign(
    algorithm_uri: &str,
    key: &KeyMaterial,
    data: &[u8],
) -> Result<Vec<u8>, XmlSecurityError> {
    match algorithm_uri {
        ALG_HMAC_SHA1 | ALG_HMAC_SHA256 | ALG_HMAC_SHA384 | ALG_HMAC_SHA512 => {
            hmac_sign(algorithm_uri, key, data)
        }
        ALG_RSA_SHA1 | ALG_RSA_SHA256 | ALG_RSA_SHA384 | ALG_RSA_SHA512 => {
            let private = rsa_private_from_material(key)?;
            let (padding, digest) = rsa_padding_and_digest(algorithm_uri, data)?;
            private
                .sign(padding, &digest)
                .map_err(|e| XmlSecurityError::SignatureMismatch(format!("RSA signing failed: {}", e)))
        }
        ALG_ECDSA_SHA256 => {
            let signing_key = ecdsa_private_from_material(key)?;
            let signature: EcdsaSignature = signing_key.sign(data);
            Ok(signature.to_bytes().to_vec())
        }
        other => Err(unsupported_signature(other)),
    }
}

/// Verifies a signature value against canonicalized SignedInfo bytes.
/// A failed check surfaces as `signature-mismatch`.
pub fn verify(
    algorithm_uri: &str,
    key: &KeyMaterial,
    data: &[u8],
    signature: &[u8],
) -> Result<(), XmlSecurityError> {
    match algorithm_uri {
        ALG_HMAC_SHA1 | ALG_HMAC_SHA256 | ALG_HMAC_SHA384 | ALG_HMAC_SHA512 => {
            hmac_verify(algorithm_uri, key, data, signature)
        }
        ALG_RSA_SHA1 | ALG_RSA_SHA256 | ALG_RSA_SHA384 | ALG_RSA_SHA512 => {
            let public = rsa_public_from_material(key)?;
            let (padding, digest) = rsa_padding_and_digest(algorithm_uri, data)?;
            public.verify(padding, &digest, signature).map_err(|_| {
                XmlSecurityError::SignatureMismatch("RSA signature verification failed".to_string())
            })
        }
        ALG_ECDSA_SHA256 => {
            let verifying_key = ecdsa_public_from_material(key)?;
            let signature = EcdsaSignature::from_slice(signature).map_err(|_| {
                XmlSecurityError::SignatureMismatch("malformed ECDSA signature value".to_string())
            })?;
            verifying_key.verify(data, &signature).map_err(|_| {
                XmlSecurityError::SignatureMismatch("ECDSA signature verification failed".to_string())
            })
        }
        other => Err(unsupported_signature(other)),
    }
}

fn unsupported_signature(uri: &str) -> XmlSecurityError {
    // Distinguish registered-but-unimplemented (DSA) from unknown URIs.
    match AlgorithmRegistry::global().and_then(|r| r.lookup(uri)) {
        Ok(_) => XmlSecurityError::unsupported_algorithm(format!(
            "no signature backend for '{}'",
            uri
        )),
        Err(err) => err,
    }
}

fn hmac_sign(
    algorithm_uri: &str,
    key: &KeyMaterial,
    data: &[u8],
) -> Result<Vec<u8>, XmlSecurityError> {
    let secret = symmetric_bytes(key)?;
    macro_rules! mac {
        ($digest:ty) => {{
            let mut mac = <Hmac<$digest>>::new_from_slice(secret)
                .map_err(|e| XmlSecurityError::internal_error(format!("HMAC init: {}", e)))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }};
    }
    match algorithm_uri {
        ALG_HMAC_SHA1 => mac!(Sha1),
        ALG_HMAC_SHA256 => mac!(Sha256),
        ALG_HMAC_SHA384 => mac!(Sha384),
        ALG_HMAC_SHA512 => mac!(Sha512),
        other => Err(unsupported_signature(other)),
    }
}

fn hmac_verify(
    algorithm_uri: &str,
    key: &KeyMaterial,
    data: &[u8],
    signature: &[u8],
) -> Result<(), XmlSecurityError> {
    let secret = symmetric_bytes(key)?;
    macro_rules! mac_verify {
        ($digest:ty) => {{
            let mut mac = <Hmac<$digest>>::new_from_slice(secret)
                .map_err(|e| XmlSecurityError::internal_error(format!("HMAC init: {}", e)))?;
            mac.update(data);
            // verify_slice is constant time.
            mac.verify_slice(signature).map_err(|_| {
                XmlSecurityError::SignatureMismatch("HMAC verification failed".to_string())
            })
        }};
    }
    match algorithm_uri {
        ALG_HMAC_SHA1 => mac_verify!(Sha1),
        ALG_HMAC_SHA256 => mac_verify!(Sha256),
        ALG_HMAC_SHA384 => mac_verify!(Sha384),
        ALG_HMAC_SHA512 => mac_verify!(Sha512),
        other => Err(unsupported_signature(other)),
    }
}

fn rsa_padding_and_digest(
    algorithm_uri: &str,
    data: &[u8],
) -> Result<(Pkcs1v15Sign, Vec<u8>), XmlSecurityError> {
    match algorithm_uri {
        ALG_RSA_SHA1 => Ok((Pkcs1v15Sign::new::<Sha1>(), Sha1::digest(data).to_vec())),
        ALG_RSA_SHA256 => Ok((Pkcs1v15Sign::new::<Sha256>(), Sha256::digest(data).to_vec())),
        ALG_RSA_SHA384 => Ok((Pkcs1v15Sign::new::<Sha384>(), Sha384::digest(data).to_vec())),
        ALG_RSA_SHA512 => Ok((Pkcs1v15Sign::new::<Sha512>(), Sha512::digest(data).to_vec())),
        other => Err(unsupported_signature(other)),
    }
}

fn symmetric_bytes(key: &KeyMaterial) -> Result<&[u8], XmlSecurityError> {
    key.symmetric_bytes().ok_or_else(|| {
        XmlSecurityError::key_resolution_failed("HMAC requires symmetric key material")
    })
}

// ---------------------------------------------------------------------------
// Key material conversions
// ---------------------------------------------------------------------------

/// Parses RSA private key material (PKCS#8 DER).
pub fn rsa_private_from_material(key: &KeyMaterial) -> Result<RsaPrivateKey, XmlSecurityError> {
    match key {
        KeyMaterial::RsaPrivate { der, .. } => RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| XmlSecurityError::key_resolution_failed(format!("bad RSA private key: {}", e))),
        _ => Err(XmlSecurityError::key_resolution_failed(
            "RSA private key material required",
        )),
    }
}

/// Parses RSA public key material (SPKI DER).
pub fn rsa_public_from_material(key: &KeyMaterial) -> Result<RsaPublicKey, XmlSecurityError> {
    match key {
        KeyMaterial::RsaPublic { der, .. } => RsaPublicKey::from_public_key_der(der)
            .map_err(|e| XmlSecurityError::key_resolution_failed(format!("bad RSA public key: {}", e))),
        KeyMaterial::RsaPrivate { der, .. } => RsaPrivateKey::from_pkcs8_der(der)
            .map(|k| k.to_public_key())
            .map_err(|e| XmlSecurityError::key_resolution_failed(format!("bad RSA private key: {}", e))),
        _ => Err(XmlSecurityError::key_resolution_failed(
            "RSA public key material required",
        )),
    }
}

fn ecdsa_private_from_material(key: &KeyMaterial) -> Result<EcdsaSigningKey, XmlSecurityError> {
    match key {
        KeyMaterial::EcPrivate { der, curve: EcCurve::P256 } => {
            EcdsaSigningKey::from_pkcs8_der(der).map_err(|e| {
                XmlSecurityError::key_resolution_failed(format!("bad EC private key: {}", e))
            })
        }
        _ => Err(XmlSecurityError::key_resolution_failed(
            "P-256 private key material required",
        )),
    }
}

fn ecdsa_public_from_material(key: &KeyMaterial) -> Result<VerifyingKey, XmlSecurityError> {
    match key {
        KeyMaterial::EcPublic { der, curve: EcCurve::P256 } => VerifyingKey::from_public_key_der(der)
            .map_err(|e| {
                XmlSecurityError::key_resolution_failed(format!("bad EC public key: {}", e))
            }),
        KeyMaterial::EcPrivate { der, curve: EcCurve::P256 } => EcdsaSigningKey::from_pkcs8_der(der)
            .map(|k| *k.verifying_key())
            .map_err(|e| {
                XmlSecurityError::key_resolution_failed(format!("bad EC private key: {}", e))
            }),
        _ => Err(XmlSecurityError::key_resolution_failed(
            "P-256 public key material required",
        )),
    }
}

/// Wraps an `rsa` private key into domain key material.
pub fn rsa_private_key_material(key: &RsaPrivateKey) -> Result<KeyMaterial, XmlSecurityError> {
    let der = key
        .to_pkcs8_der()
        .map_err(|e| XmlSecurityError::internal_error(format!("PKCS#8 encoding: {}", e)))?;
    Ok(KeyMaterial::RsaPrivate {
        der: der.as_bytes().to_vec(),
        modulus_bits: (key.size() * 8) as u32,
    })
}

/// Wraps an `rsa` public key into domain key material.
pub fn rsa_public_key_material(key: &RsaPublicKey) -> Result<KeyMaterial, XmlSecurityError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| XmlSecurityError::internal_error(format!("SPKI encoding: {}", e)))?;
    Ok(KeyMaterial::RsaPublic {
        der: der.as_bytes().to_vec(),
        modulus_bits: (key.size() * 8) as u32,
    })
}

/// Extracts public key material from a DER certificate.
pub fn public_key_from_certificate(cert_der: &[u8]) -> Result<KeyMaterial, XmlSecurityError> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| XmlSecurityError::key_resolution_failed(format!("bad certificate: {}", e)))?;
    let spki = cert.public_key();
    if let Ok(rsa_key) = RsaPublicKey::from_public_key_der(spki.raw) {
        return rsa_public_key_material(&rsa_key);
    }
    if let Ok(_ec) = VerifyingKey::from_public_key_der(spki.raw) {
        return Ok(KeyMaterial::EcPublic {
            der: spki.raw.to_vec(),
            curve: EcCurve::P256,
        });
    }
    Err(XmlSecurityError::key_resolution_failed(
        "certificate carries an unsupported public key type",
    ))
}

/// Issuer distinguished name and decimal serial of a DER certificate, for
/// the X509 issuer-serial key identifier.
pub fn issuer_serial(cert_der: &[u8]) -> Result<(String, String), XmlSecurityError> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| XmlSecurityError::key_resolution_failed(format!("bad certificate: {}", e)))?;
    Ok((
        cert.issuer().to_string(),
        cert.serial.to_str_radix(10),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// HMAC-SHA256 sign/verify round trip, plus tamper detection.
    #[test]
    fn test_hmac_roundtrip() {
        let key = KeyMaterial::symmetric(vec![0x0B; 32]);
        let mac = sign(ALG_HMAC_SHA256, &key, b"signed info").unwrap();
        assert_eq!(mac.len(), 32);
        verify(ALG_HMAC_SHA256, &key, b"signed info", &mac).unwrap();

        let err = verify(ALG_HMAC_SHA256, &key, b"tampered", &mac).unwrap_err();
        assert!(matches!(err, XmlSecurityError::SignatureMismatch(_)));
    }

    /// RSA PKCS#1 v1.5 sign/verify round trip with a small test key.
    #[test]
    fn test_rsa_roundtrip() {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let private_material = rsa_private_key_material(&private).unwrap();
        let public_material = rsa_public_key_material(&private.to_public_key()).unwrap();
        assert_eq!(private_material.key_length_bits(), 2048);

        let signature = sign(ALG_RSA_SHA256, &private_material, b"signed info").unwrap();
        verify(ALG_RSA_SHA256, &public_material, b"signed info", &signature).unwrap();
        assert!(verify(ALG_RSA_SHA256, &public_material, b"other", &signature).is_err());
    }

    /// ECDSA P-256 produces the fixed-size r||s form.
    #[test]
    fn test_ecdsa_roundtrip() {
        let signing = EcdsaSigningKey::random(&mut rand::thread_rng());
        let der = signing.to_pkcs8_der().unwrap().as_bytes().to_vec();
        let material = KeyMaterial::EcPrivate {
            der,
            curve: EcCurve::P256,
        };
        let signature = sign(ALG_ECDSA_SHA256, &material, b"signed info").unwrap();
        assert_eq!(signature.len(), 64);
        verify(ALG_ECDSA_SHA256, &material, b"signed info", &signature).unwrap();
    }

    /// DSA is registered but has no backend.
    #[test]
    fn test_dsa_rejected() {
        let key = KeyMaterial::DsaPublic {
            der: vec![0x30],
            prime_bits: 1024,
        };
        let err = sign(ALG_DSA_SHA1, &key, b"data").unwrap_err();
        assert!(matches!(err, XmlSecurityError::UnsupportedAlgorithm(_)));
    }

    /// Default algorithm derivation from key material.
    #[test]
    fn test_default_algorithm_by_key() {
        assert_eq!(
            default_signature_uri_for_key(&KeyMaterial::symmetric(vec![0; 16])).unwrap(),
            ALG_HMAC_SHA1
        );
        assert_eq!(
            default_signature_uri_for_key(&KeyMaterial::RsaPrivate {
                der: vec![],
                modulus_bits: 2048
            })
            .unwrap(),
            ALG_RSA_SHA1
        );
    }
}
