// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Streaming XML Security Engine
//!
//! A streaming engine for the W3C XML Signature and XML Encryption family of
//! standards. Given an XML document as a sequence of parse events (inbound)
//! or an application-written event stream (outbound), it verifies or
//! produces detached and enveloped signatures and element-level encryption
//! without ever materializing the document.
//!
//! Consumers integrate it by wrapping an event reader or writer: all
//! cryptographic work happens as a side effect of pulling or pushing
//! events.
//!
//! ## Layers
//!
//! - **Application** (`application`): the processor chains that thread
//!   inbound and outbound event flow through stacked handlers, the
//!   per-reference live digesters, the EncryptedKey resolution graph, and
//!   the public reader/writer APIs.
//! - **Infrastructure** (`infrastructure`): canonicalization and transform
//!   stages, digest sinks, concrete cryptography, and resource resolvers.
//! - **Configuration** (`config`): the property sets enumerating inbound
//!   and outbound behavior.
//!
//! The pure model (events, tokens, records, limits, errors) lives in the
//! `xmlsec-stream-domain` crate.
//!
//! ## Usage
//!
//! Inbound verification wraps a pull event source:
//!
//! ```text
//! let mut reader = begin_inbound(properties, source)?;
//! while let Some(event) = reader.next_event()? {
//!     // hand events to the application
//! }
//! let result = reader.document_result();
//! ```
//!
//! Outbound signing wraps a push event sink:
//!
//! ```text
//! let mut writer = begin_outbound(properties, sink)?;
//! for event in events {
//!     writer.write_event(event)?;
//! }
//! writer.close()?;
//! ```

pub mod application;
pub mod config;
pub mod infrastructure;

pub use application::services::inbound::{begin_inbound, DocumentVerificationResult, InboundReader};
pub use application::services::inbound_chain::{EventSource, VecEventSource};
pub use application::services::outbound::{begin_outbound, OutboundWriter};
pub use application::services::outbound_chain::{EventSink, VecEventSink};
pub use config::{
    EncryptActionConfig, FragmentParser, InboundSecurityProperties, KeyIdentifierType,
    KeyResolverCallback, OutboundAction, OutboundSecurityProperties, PartModifier, SecurePart,
    SignActionConfig, XmlSecAction,
};

// Re-export the domain crate under a stable name for integrators.
pub use xmlsec_stream_domain as domain;
