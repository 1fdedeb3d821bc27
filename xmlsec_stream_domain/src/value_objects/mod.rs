// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Value Objects
//!
//! Immutable, self-validating values of the XML security domain: qualified
//! names, parse events, parsed signature and encryption records, and the
//! secure-processing limits.

pub mod encrypted;
pub mod qname;
pub mod reference;
pub mod security_limits;
pub mod xml_event;
pub mod xml_names;

pub use encrypted::{
    EncryptedDataSpec, EncryptedKeySpec, KeyInfoSpec, OaepParams, DEFAULT_OAEP_DIGEST,
    DEFAULT_OAEP_MGF,
};
pub use qname::QName;
pub use reference::{ReferenceOutcome, ReferenceSpec, ReferenceStatus, SignedInfoSpec, TransformSpec};
pub use security_limits::SecurityLimits;
pub use xml_event::{
    Attribute, ElementPath, NamespaceDecl, StartElementEvent, XmlEvent, NS_XML,
};
