// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Digest Sink
//!
//! A write-only byte sink that forwards to a streaming hash and remembers
//! the final digest. Canonicalization stages write small fragments (often
//! single characters while escaping), so the sink keeps a user-space buffer
//! and feeds the hasher in blocks.
//!
//! The digest is exposed exactly once, by closing the sink; writing after
//! close fails.

use std::io::{self, Write};

use digest::DynDigest;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use xmlsec_stream_domain::services::algorithm_registry::{
    AlgorithmRegistry, ALG_SHA1, ALG_SHA256, ALG_SHA384, ALG_SHA512,
};
use xmlsec_stream_domain::XmlSecurityError;

const BUFFER_CAPACITY: usize = 4096;

/// Streaming digest sink over a boxed hasher.
pub struct DigestSink {
    hasher: Option<Box<dyn DynDigest>>,
    buffer: Vec<u8>,
    algorithm_uri: String,
}

impl DigestSink {
    /// Creates a sink for a digest algorithm URI.
    ///
    /// The URI must be registered as a digest algorithm; unknown URIs fail
    /// with an algorithm-not-registered error.
    pub fn for_uri(algorithm_uri: &str) -> Result<Self, XmlSecurityError> {
        // Registry consultation keeps unknown URIs failing uniformly even
        // though the dispatch below is static.
        AlgorithmRegistry::global()?.lookup(algorithm_uri)?;
        let hasher: Box<dyn DynDigest> = match algorithm_uri {
            ALG_SHA1 => Box::new(Sha1::default()),
            ALG_SHA256 => Box::new(Sha256::default()),
            ALG_SHA384 => Box::new(Sha384::default()),
            ALG_SHA512 => Box::new(Sha512::default()),
            other => {
                return Err(XmlSecurityError::unsupported_algorithm(format!(
                    "'{}' is not a digest algorithm",
                    other
                )));
            }
        };
        Ok(Self {
            hasher: Some(hasher),
            buffer: Vec::with_capacity(BUFFER_CAPACITY),
            algorithm_uri: algorithm_uri.to_string(),
        })
    }

    pub fn algorithm_uri(&self) -> &str {
        &self.algorithm_uri
    }

    fn drain_buffer(&mut self) -> Result<(), XmlSecurityError> {
        let hasher = self.hasher.as_mut().ok_or_else(|| {
            XmlSecurityError::io_error("digest sink already closed")
        })?;
        if !self.buffer.is_empty() {
            hasher.update(&self.buffer);
            self.buffer.clear();
        }
        Ok(())
    }

    /// Appends bytes to the running digest.
    pub fn update(&mut self, bytes: &[u8]) -> Result<(), XmlSecurityError> {
        if self.hasher.is_none() {
            return Err(XmlSecurityError::io_error("digest sink already closed"));
        }
        if self.buffer.len() + bytes.len() >= BUFFER_CAPACITY {
            self.drain_buffer()?;
            // Large fragments bypass the buffer.
            if bytes.len() >= BUFFER_CAPACITY {
                if let Some(hasher) = self.hasher.as_mut() {
                    hasher.update(bytes);
                }
                return Ok(());
            }
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Closes the sink and yields the digest, exactly once. Further writes
    /// and a second close both fail.
    pub fn close(&mut self) -> Result<Vec<u8>, XmlSecurityError> {
        self.drain_buffer()?;
        let hasher = self
            .hasher
            .take()
            .ok_or_else(|| XmlSecurityError::io_error("digest sink already closed"))?;
        Ok(hasher.finalize().to_vec())
    }
}

impl Write for DigestSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha256_hex(data: &[u8]) -> String {
        use sha2::Digest;
        hex::encode(Sha256::digest(data))
    }

    /// Incremental writes must equal a one-shot hash.
    #[test]
    fn test_incremental_equals_oneshot() {
        let mut sink = DigestSink::for_uri(ALG_SHA256).unwrap();
        sink.update(b"abc").unwrap();
        sink.update(b"def").unwrap();
        let digest = sink.close().unwrap();
        assert_eq!(hex::encode(digest), sha256_hex(b"abcdef"));
    }

    /// Large fragments bypass the buffer without corrupting the stream.
    #[test]
    fn test_large_fragment_bypass() {
        let big = vec![0x5Au8; BUFFER_CAPACITY * 2 + 17];
        let mut sink = DigestSink::for_uri(ALG_SHA256).unwrap();
        sink.update(b"prefix").unwrap();
        sink.update(&big).unwrap();
        sink.update(b"suffix").unwrap();
        let digest = sink.close().unwrap();

        let mut all = b"prefix".to_vec();
        all.extend_from_slice(&big);
        all.extend_from_slice(b"suffix");
        assert_eq!(hex::encode(digest), sha256_hex(&all));
    }

    /// Writing after close fails, and the digest is surrendered once.
    #[test]
    fn test_write_after_close_fails() {
        let mut sink = DigestSink::for_uri(ALG_SHA256).unwrap();
        sink.update(b"abc").unwrap();
        sink.close().unwrap();
        assert!(sink.update(b"more").is_err());
        assert!(sink.close().is_err());
    }

    /// Unknown URIs are rejected.
    #[test]
    fn test_unknown_digest_uri() {
        assert!(DigestSink::for_uri("urn:unknown").is_err());
        // Registered, but not a digest algorithm.
        assert!(DigestSink::for_uri(
            "http://www.w3.org/2001/04/xmlenc#aes256-cbc"
        )
        .is_err());
    }

    /// SHA-1 remains available for xmldsig defaults.
    #[test]
    fn test_sha1_digest() {
        let mut sink = DigestSink::for_uri(ALG_SHA1).unwrap();
        sink.update(b"abc").unwrap();
        let digest = sink.close().unwrap();
        assert_eq!(
            hex::encode(digest),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }
}
