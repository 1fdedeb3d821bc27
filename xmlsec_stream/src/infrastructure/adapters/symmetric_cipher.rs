// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Content Ciphers
//!
//! Symmetric encryption and decryption of element content in the XML
//! Encryption wire format: the IV is prepended to the ciphertext inside
//! `CipherValue`. CBC ciphertexts carry block padding (last octet is the
//! pad length); GCM ciphertexts carry the 16-byte authentication tag at
//! the end.
//!
//! Integrity failures (GCM tag, CBC padding) surface uniformly as a
//! cipher-integrity error, never as a key-unwrap error: by the time data
//! reaches this module, the timing mitigation upstream has already
//! produced *some* key, and a wrong key must fail here exactly like
//! tampered data.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::Aead;
use aes_gcm::{AesGcm, KeyInit, Nonce};
use ring::rand::{SecureRandom, SystemRandom};

use xmlsec_stream_domain::services::algorithm_registry::{
    AlgorithmRegistry, ALG_AES128_CBC, ALG_AES128_GCM, ALG_AES192_CBC, ALG_AES192_GCM,
    ALG_AES256_CBC, ALG_AES256_GCM,
};
use xmlsec_stream_domain::XmlSecurityError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes192CbcEnc = cbc::Encryptor<Aes192>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes192CbcDec = cbc::Decryptor<Aes192>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

type Aes128Gcm = AesGcm<Aes128, U12>;
type Aes192Gcm = AesGcm<Aes192, U12>;
type Aes256Gcm = AesGcm<Aes256, U12>;

const CBC_IV_LEN: usize = 16;
const GCM_IV_LEN: usize = 12;

fn integrity_error() -> XmlSecurityError {
    XmlSecurityError::DigestMismatch("cipher integrity check failed".to_string())
}

fn key_length_error(uri: &str, got: usize) -> XmlSecurityError {
    XmlSecurityError::key_resolution_failed(format!(
        "session key is {} bits, '{}' requires a different length",
        got * 8,
        uri
    ))
}

/// Generates a session key with the exact length the algorithm URI
/// mandates.
pub fn generate_session_key(
    algorithm_uri: &str,
    rng: &SystemRandom,
) -> Result<Vec<u8>, XmlSecurityError> {
    let bits = AlgorithmRegistry::global()?.key_length_bits(algorithm_uri)?;
    random_bytes(rng, (bits / 8) as usize)
}

/// Random bytes helper over the shared system RNG.
pub fn random_bytes(rng: &SystemRandom, len: usize) -> Result<Vec<u8>, XmlSecurityError> {
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes)
        .map_err(|_| XmlSecurityError::internal_error("system RNG failure"))?;
    Ok(bytes)
}

/// Encrypts plaintext under a content-cipher URI; output is IV-prefixed.
pub fn encrypt(
    algorithm_uri: &str,
    key: &[u8],
    plaintext: &[u8],
    rng: &SystemRandom,
) -> Result<Vec<u8>, XmlSecurityError> {
    match algorithm_uri {
        ALG_AES128_CBC | ALG_AES192_CBC | ALG_AES256_CBC => {
            let iv = random_bytes(rng, CBC_IV_LEN)?;
            let ciphertext = cbc_encrypt(algorithm_uri, key, &iv, plaintext)?;
            let mut out = iv;
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
        ALG_AES128_GCM | ALG_AES192_GCM | ALG_AES256_GCM => {
            let iv = random_bytes(rng, GCM_IV_LEN)?;
            let ciphertext = gcm_encrypt(algorithm_uri, key, &iv, plaintext)?;
            let mut out = iv;
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
        other => Err(unknown_cipher(other)),
    }
}

/// Decrypts IV-prefixed ciphertext under a content-cipher URI.
pub fn decrypt(
    algorithm_uri: &str,
    key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, XmlSecurityError> {
    match algorithm_uri {
        ALG_AES128_CBC | ALG_AES192_CBC | ALG_AES256_CBC => {
            if data.len() < CBC_IV_LEN * 2 {
                return Err(integrity_error());
            }
            let (iv, ciphertext) = data.split_at(CBC_IV_LEN);
            cbc_decrypt(algorithm_uri, key, iv, ciphertext)
        }
        ALG_AES128_GCM | ALG_AES192_GCM | ALG_AES256_GCM => {
            if data.len() < GCM_IV_LEN + 16 {
                return Err(integrity_error());
            }
            let (iv, ciphertext) = data.split_at(GCM_IV_LEN);
            gcm_decrypt(algorithm_uri, key, iv, ciphertext)
        }
        other => Err(unknown_cipher(other)),
    }
}

fn unknown_cipher(uri: &str) -> XmlSecurityError {
    match AlgorithmRegistry::global().and_then(|r| r.lookup(uri)) {
        Ok(_) => XmlSecurityError::unsupported_algorithm(format!(
            "no content-cipher backend for '{}'",
            uri
        )),
        Err(err) => err,
    }
}

fn cbc_encrypt(
    uri: &str,
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, XmlSecurityError> {
    macro_rules! run {
        ($enc:ty, $len:expr) => {{
            if key.len() != $len {
                return Err(key_length_error(uri, key.len()));
            }
            let cipher = <$enc>::new_from_slices(key, iv)
                .map_err(|_| XmlSecurityError::internal_error("bad CBC key/iv length"))?;
            Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
        }};
    }
    match uri {
        ALG_AES128_CBC => run!(Aes128CbcEnc, 16),
        ALG_AES192_CBC => run!(Aes192CbcEnc, 24),
        ALG_AES256_CBC => run!(Aes256CbcEnc, 32),
        other => Err(unknown_cipher(other)),
    }
}

fn cbc_decrypt(
    uri: &str,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, XmlSecurityError> {
    macro_rules! run {
        ($dec:ty, $len:expr) => {{
            if key.len() != $len {
                return Err(key_length_error(uri, key.len()));
            }
            let cipher = <$dec>::new_from_slices(key, iv)
                .map_err(|_| XmlSecurityError::internal_error("bad CBC key/iv length"))?;
            cipher
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| integrity_error())
        }};
    }
    match uri {
        ALG_AES128_CBC => run!(Aes128CbcDec, 16),
        ALG_AES192_CBC => run!(Aes192CbcDec, 24),
        ALG_AES256_CBC => run!(Aes256CbcDec, 32),
        other => Err(unknown_cipher(other)),
    }
}

fn gcm_encrypt(
    uri: &str,
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, XmlSecurityError> {
    macro_rules! run {
        ($gcm:ty, $len:expr) => {{
            if key.len() != $len {
                return Err(key_length_error(uri, key.len()));
            }
            let cipher = <$gcm>::new_from_slice(key)
                .map_err(|_| XmlSecurityError::internal_error("bad GCM key length"))?;
            cipher
                .encrypt(Nonce::from_slice(iv), plaintext)
                .map_err(|_| XmlSecurityError::internal_error("GCM encryption failed"))
        }};
    }
    match uri {
        ALG_AES128_GCM => run!(Aes128Gcm, 16),
        ALG_AES192_GCM => run!(Aes192Gcm, 24),
        ALG_AES256_GCM => run!(Aes256Gcm, 32),
        other => Err(unknown_cipher(other)),
    }
}

fn gcm_decrypt(
    uri: &str,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, XmlSecurityError> {
    macro_rules! run {
        ($gcm:ty, $len:expr) => {{
            if key.len() != $len {
                return Err(key_length_error(uri, key.len()));
            }
            let cipher = <$gcm>::new_from_slice(key)
                .map_err(|_| XmlSecurityError::internal_error("bad GCM key length"))?;
            cipher
                .decrypt(Nonce::from_slice(iv), ciphertext)
                .map_err(|_| integrity_error())
        }};
    }
    match uri {
        ALG_AES128_GCM => run!(Aes128Gcm, 16),
        ALG_AES192_GCM => run!(Aes192Gcm, 24),
        ALG_AES256_GCM => run!(Aes256Gcm, 32),
        other => Err(unknown_cipher(other)),
    }
}
