// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Key Transport and Key Wrap
//!
//! Wrapping and unwrapping of session keys: RSA-OAEP (both the 1.0
//! `rsa-oaep-mgf1p` and the 1.1 `rsa-oaep` URIs), RSA PKCS#1 v1.5, and the
//! RFC 3394 AES Key Wrap used by the symmetric `kw-aes*` URIs.
//!
//! OAEP parameters arrive with the recommendation defaults already
//! resolved (SHA-1 digest, MGF1 with SHA-1); the optional OAEPparams
//! P-source bytes become the OAEP label.
//!
//! Failure here is deliberately indistinguishable to callers in the
//! EncryptedKey path: the handler above replaces any unwrap error with a
//! synthesized key (see the encrypted-key handler), so nothing in this
//! module needs to be timing-hardened beyond what the primitives provide.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use rsa::{Oaep, Pkcs1v15Encrypt};
use sha1::Sha1;
use sha2::Sha256;

use xmlsec_stream_domain::entities::KeyMaterial;
use xmlsec_stream_domain::services::algorithm_registry::{
    AlgorithmRegistry, ALG_KW_AES128, ALG_KW_AES192, ALG_KW_AES256, ALG_MGF1_SHA1,
    ALG_MGF1_SHA256, ALG_RSA_1_5, ALG_RSA_OAEP, ALG_RSA_OAEP_MGF1P, ALG_SHA1, ALG_SHA256,
};
use xmlsec_stream_domain::value_objects::OaepParams;
use xmlsec_stream_domain::XmlSecurityError;

use crate::infrastructure::adapters::signature_crypto::{
    rsa_private_from_material, rsa_public_from_material,
};

const KW_IV: [u8; 8] = [0xA6; 8];

/// Wraps a session key under the transport/wrap algorithm.
pub fn wrap_key(
    algorithm_uri: &str,
    oaep: &OaepParams,
    wrapping_key: &KeyMaterial,
    session_key: &[u8],
) -> Result<Vec<u8>, XmlSecurityError> {
    match algorithm_uri {
        ALG_RSA_OAEP_MGF1P | ALG_RSA_OAEP => {
            let public = rsa_public_from_material(wrapping_key)?;
            let padding = oaep_padding(oaep)?;
            public
                .encrypt(&mut rand::rngs::OsRng, padding, session_key)
                .map_err(|e| XmlSecurityError::key_resolution_failed(format!("OAEP wrap failed: {}", e)))
        }
        ALG_RSA_1_5 => {
            let public = rsa_public_from_material(wrapping_key)?;
            public
                .encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, session_key)
                .map_err(|e| {
                    XmlSecurityError::key_resolution_failed(format!("PKCS#1 wrap failed: {}", e))
                })
        }
        ALG_KW_AES128 | ALG_KW_AES192 | ALG_KW_AES256 => {
            let kek = symmetric_kek(algorithm_uri, wrapping_key)?;
            aes_key_wrap(kek, session_key)
        }
        other => Err(unknown_transport(other)),
    }
}

/// Unwraps a transported session key. Every failure mode is an error here;
/// the timing mitigation lives in the EncryptedKey handler.
pub fn unwrap_key(
    algorithm_uri: &str,
    oaep: &OaepParams,
    wrapping_key: &KeyMaterial,
    wrapped: &[u8],
) -> Result<Vec<u8>, XmlSecurityError> {
    match algorithm_uri {
        ALG_RSA_OAEP_MGF1P | ALG_RSA_OAEP => {
            let private = rsa_private_from_material(wrapping_key)?;
            let padding = oaep_padding(oaep)?;
            private.decrypt(padding, wrapped).map_err(|e| {
                XmlSecurityError::key_resolution_failed(format!("OAEP unwrap failed: {}", e))
            })
        }
        ALG_RSA_1_5 => {
            let private = rsa_private_from_material(wrapping_key)?;
            private.decrypt(Pkcs1v15Encrypt, wrapped).map_err(|e| {
                XmlSecurityError::key_resolution_failed(format!("PKCS#1 unwrap failed: {}", e))
            })
        }
        ALG_KW_AES128 | ALG_KW_AES192 | ALG_KW_AES256 => {
            let kek = symmetric_kek(algorithm_uri, wrapping_key)?;
            aes_key_unwrap(kek, wrapped)
        }
        other => Err(unknown_transport(other)),
    }
}

fn unknown_transport(uri: &str) -> XmlSecurityError {
    match AlgorithmRegistry::global().and_then(|r| r.lookup(uri)) {
        Ok(_) => XmlSecurityError::unsupported_algorithm(format!(
            "no key-transport backend for '{}'",
            uri
        )),
        Err(err) => err,
    }
}

fn symmetric_kek<'a>(
    algorithm_uri: &str,
    key: &'a KeyMaterial,
) -> Result<&'a [u8], XmlSecurityError> {
    let kek = key.symmetric_bytes().ok_or_else(|| {
        XmlSecurityError::key_resolution_failed("symmetric key-wrap requires a symmetric KEK")
    })?;
    let expected_bits = AlgorithmRegistry::global()?.key_length_bits(algorithm_uri)? as usize;
    if kek.len() * 8 != expected_bits {
        return Err(XmlSecurityError::key_resolution_failed(format!(
            "KEK is {} bits, '{}' requires {}",
            kek.len() * 8,
            algorithm_uri,
            expected_bits
        )));
    }
    Ok(kek)
}

fn oaep_padding(oaep: &OaepParams) -> Result<Oaep, XmlSecurityError> {
    let mut padding = match (oaep.digest_uri.as_str(), oaep.mgf_uri.as_str()) {
        (ALG_SHA1, ALG_MGF1_SHA1) => Oaep::new::<Sha1>(),
        (ALG_SHA1, ALG_MGF1_SHA256) => Oaep::new_with_mgf_hash::<Sha1, Sha256>(),
        (ALG_SHA256, ALG_MGF1_SHA1) => Oaep::new_with_mgf_hash::<Sha256, Sha1>(),
        (ALG_SHA256, ALG_MGF1_SHA256) => Oaep::new::<Sha256>(),
        (digest, mgf) => {
            return Err(XmlSecurityError::unsupported_algorithm(format!(
                "OAEP digest '{}' with MGF '{}'",
                digest, mgf
            )));
        }
    };
    if !oaep.p_source.is_empty() {
        let label = String::from_utf8(oaep.p_source.clone()).map_err(|_| {
            XmlSecurityError::unsupported_algorithm("non-UTF8 OAEPparams P-source")
        })?;
        padding.label = Some(label);
    }
    Ok(padding)
}

// ---------------------------------------------------------------------------
// RFC 3394 AES Key Wrap
// ---------------------------------------------------------------------------

enum KwCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl KwCipher {
    fn new(kek: &[u8]) -> Result<Self, XmlSecurityError> {
        match kek.len() {
            16 => Ok(KwCipher::Aes128(Aes128::new(GenericArray::from_slice(kek)))),
            24 => Ok(KwCipher::Aes192(Aes192::new(GenericArray::from_slice(kek)))),
            32 => Ok(KwCipher::Aes256(Aes256::new(GenericArray::from_slice(kek)))),
            n => Err(XmlSecurityError::key_resolution_failed(format!(
                "invalid AES KEK length {} bytes",
                n
            ))),
        }
    }

    fn encrypt_block(&self, block: &mut [u8; 16]) {
        let ga = GenericArray::from_mut_slice(block);
        match self {
            KwCipher::Aes128(c) => c.encrypt_block(ga),
            KwCipher::Aes192(c) => c.encrypt_block(ga),
            KwCipher::Aes256(c) => c.encrypt_block(ga),
        }
    }

    fn decrypt_block(&self, block: &mut [u8; 16]) {
        let ga = GenericArray::from_mut_slice(block);
        match self {
            KwCipher::Aes128(c) => c.decrypt_block(ga),
            KwCipher::Aes192(c) => c.decrypt_block(ga),
            KwCipher::Aes256(c) => c.decrypt_block(ga),
        }
    }
}

fn aes_key_wrap(kek: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, XmlSecurityError> {
    if plaintext.len() < 16 || plaintext.len() % 8 != 0 {
        return Err(XmlSecurityError::key_resolution_failed(
            "AES key wrap input must be a multiple of 8 bytes, at least 16",
        ));
    }
    let cipher = KwCipher::new(kek)?;
    let n = plaintext.len() / 8;
    let mut a = KW_IV;
    let mut r: Vec<[u8; 8]> = plaintext
        .chunks_exact(8)
        .map(|c| <[u8; 8]>::try_from(c).expect("chunked"))
        .collect();

    for j in 0..6u64 {
        for (i, ri) in r.iter_mut().enumerate() {
            let mut block = [0u8; 16];
            block[..8].copy_from_slice(&a);
            block[8..].copy_from_slice(ri);
            cipher.encrypt_block(&mut block);
            let t = (n as u64) * j + (i as u64 + 1);
            a.copy_from_slice(&block[..8]);
            for (byte, tb) in a.iter_mut().rev().zip(t.to_be_bytes().iter().rev()) {
                *byte ^= tb;
            }
            ri.copy_from_slice(&block[8..]);
        }
    }

    let mut out = Vec::with_capacity(8 + plaintext.len());
    out.extend_from_slice(&a);
    for ri in &r {
        out.extend_from_slice(ri);
    }
    Ok(out)
}

fn aes_key_unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, XmlSecurityError> {
    if wrapped.len() < 24 || wrapped.len() % 8 != 0 {
        return Err(XmlSecurityError::key_resolution_failed(
            "AES key unwrap input must be a multiple of 8 bytes, at least 24",
        ));
    }
    let cipher = KwCipher::new(kek)?;
    let n = wrapped.len() / 8 - 1;
    let mut a = <[u8; 8]>::try_from(&wrapped[..8]).expect("sized");
    let mut r: Vec<[u8; 8]> = wrapped[8..]
        .chunks_exact(8)
        .map(|c| <[u8; 8]>::try_from(c).expect("chunked"))
        .collect();

    for j in (0..6u64).rev() {
        for i in (0..n).rev() {
            let t = (n as u64) * j + (i as u64 + 1);
            let mut a_x = a;
            for (byte, tb) in a_x.iter_mut().rev().zip(t.to_be_bytes().iter().rev()) {
                *byte ^= tb;
            }
            let mut block = [0u8; 16];
            block[..8].copy_from_slice(&a_x);
            block[8..].copy_from_slice(&r[i]);
            cipher.decrypt_block(&mut block);
            a.copy_from_slice(&block[..8]);
            r[i].copy_from_slice(&block[8..]);
        }
    }

    if a != KW_IV {
        return Err(XmlSecurityError::key_resolution_failed(
            "AES key unwrap integrity check failed",
        ));
    }
    Ok(r.concat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    use crate::infrastructure::adapters::signature_crypto::{
        rsa_private_key_material, rsa_public_key_material,
    };

    /// RFC 3394 test vector: 128-bit key data with a 128-bit KEK.
    #[test]
    fn test_aes_key_wrap_vector() {
        let kek = hex::decode("000102030405060708090A0B0C0D0E0F").unwrap();
        let key_data = hex::decode("00112233445566778899AABBCCDDEEFF").unwrap();
        let wrapped = aes_key_wrap(&kek, &key_data).unwrap();
        assert_eq!(
            hex::encode_upper(&wrapped),
            "1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5"
        );
        assert_eq!(aes_key_unwrap(&kek, &wrapped).unwrap(), key_data);
    }

    /// Corrupt wrapped data fails the integrity check.
    #[test]
    fn test_aes_key_unwrap_integrity() {
        let kek = vec![0x01; 16];
        let mut wrapped = aes_key_wrap(&kek, &[0x22; 16]).unwrap();
        wrapped[3] ^= 0xFF;
        assert!(aes_key_unwrap(&kek, &wrapped).is_err());
    }

    /// OAEP wrap/unwrap round trip with the recommendation defaults.
    #[test]
    fn test_oaep_roundtrip_with_defaults() {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let public_material = rsa_public_key_material(&private.to_public_key()).unwrap();
        let private_material = rsa_private_key_material(&private).unwrap();

        let session_key = vec![0x42u8; 32];
        let oaep = OaepParams::default();
        let wrapped = wrap_key(ALG_RSA_OAEP_MGF1P, &oaep, &public_material, &session_key).unwrap();
        let unwrapped = unwrap_key(ALG_RSA_OAEP_MGF1P, &oaep, &private_material, &wrapped).unwrap();
        assert_eq!(unwrapped, session_key);
    }

    /// Random ciphertext cannot unwrap; the error is contained here and
    /// replaced upstream.
    #[test]
    fn test_oaep_unwrap_garbage_fails() {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let private_material = rsa_private_key_material(&private).unwrap();
        let garbage = vec![0x5Au8; 256];
        let err = unwrap_key(ALG_RSA_OAEP_MGF1P, &OaepParams::default(), &private_material, &garbage)
            .unwrap_err();
        assert!(matches!(err, XmlSecurityError::KeyResolutionFailed(_)));
    }

    /// Symmetric KEK length must match the kw URI.
    #[test]
    fn test_kw_kek_length_checked() {
        let kek = KeyMaterial::symmetric(vec![0u8; 16]);
        let err = wrap_key(ALG_KW_AES256, &OaepParams::default(), &kek, &[0u8; 16]).unwrap_err();
        assert!(matches!(err, XmlSecurityError::KeyResolutionFailed(_)));
    }
}
