// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Security Events
//!
//! Immutable records of security-relevant occurrences during document
//! processing: a token coming into view, an algorithm being exercised with
//! concrete key material, and the final verification outcome of a
//! signature.
//!
//! Every event carries a correlation id equal to the id of the element that
//! triggered it, so listeners can tie together the events produced while
//! one XML structure was processed. Events are serializable for audit
//! sinks.

use crate::value_objects::ReferenceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::XmlSecurityError;

/// What a token or algorithm was used for.
///
/// The order of declaration is meaningful where usages are tracked on a
/// token: usages form an ordered set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenUsage {
    Signature,
    Verification,
    Encryption,
    Decryption,
    Digest,
    AsymmetricKeyWrap,
    SymmetricKeyWrap,
}

/// The tagged payload of a security event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SecurityEventKind {
    /// A security token was registered or first resolved.
    TokenObserved {
        token_id: Option<String>,
        usage: TokenUsage,
    },
    /// Concrete key material was exercised with an algorithm.
    AlgorithmUsed {
        algorithm_uri: String,
        usage: TokenUsage,
        key_length_bits: u32,
    },
    /// Terminal verdict for one signature, emitted only after every
    /// reference has been resolved.
    VerificationOutcome {
        verified: bool,
        reference_statuses: Vec<ReferenceStatus>,
    },
}

/// A security event with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_id: Uuid,
    pub correlation_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub kind: SecurityEventKind,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, correlation_id: Option<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            correlation_id,
            occurred_at: Utc::now(),
            kind,
        }
    }

    pub fn token_observed(token_id: Option<String>, usage: TokenUsage, correlation_id: Option<String>) -> Self {
        Self::new(SecurityEventKind::TokenObserved { token_id, usage }, correlation_id)
    }

    pub fn algorithm_used(
        algorithm_uri: impl Into<String>,
        usage: TokenUsage,
        key_length_bits: u32,
        correlation_id: Option<String>,
    ) -> Self {
        Self::new(
            SecurityEventKind::AlgorithmUsed {
                algorithm_uri: algorithm_uri.into(),
                usage,
                key_length_bits,
            },
            correlation_id,
        )
    }

    pub fn verification_outcome(
        verified: bool,
        reference_statuses: Vec<ReferenceStatus>,
        correlation_id: Option<String>,
    ) -> Self {
        Self::new(
            SecurityEventKind::VerificationOutcome {
                verified,
                reference_statuses,
            },
            correlation_id,
        )
    }

    /// Serializes the event for audit sinks.
    pub fn to_json(&self) -> Result<String, XmlSecurityError> {
        Ok(serde_json::to_string(self)?)
    }
}
