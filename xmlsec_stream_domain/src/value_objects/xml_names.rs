// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Namespace URIs and element names of the XML Signature and XML Encryption
//! recommendations, as used across the engine.

use crate::value_objects::QName;

/// XML Signature 1.0 namespace.
pub const NS_DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
/// XML Signature 1.1 namespace.
pub const NS_DSIG11: &str = "http://www.w3.org/2009/xmldsig11#";
/// XML Encryption 1.0 namespace.
pub const NS_XENC: &str = "http://www.w3.org/2001/04/xmlenc#";
/// XML Encryption 1.1 namespace.
pub const NS_XENC11: &str = "http://www.w3.org/2009/xmlenc11#";
/// Exclusive canonicalization namespace (InclusiveNamespaces lives here).
pub const NS_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// The Manifest reference type URI, disabled by default for security.
pub const TYPE_MANIFEST: &str = "http://www.w3.org/2000/09/xmldsig#Manifest";
/// The Object reference type URI.
pub const TYPE_OBJECT: &str = "http://www.w3.org/2000/09/xmldsig#Object";

/// EncryptedData Type attribute value for whole-element encryption.
pub const TYPE_ENCRYPTED_ELEMENT: &str = "http://www.w3.org/2001/04/xmlenc#Element";
/// EncryptedData Type attribute value for element-content encryption.
pub const TYPE_ENCRYPTED_CONTENT: &str = "http://www.w3.org/2001/04/xmlenc#Content";

/// Conventional prefixes used when the engine emits security elements.
pub const PREFIX_DSIG: &str = "ds";
pub const PREFIX_XENC: &str = "xenc";

/// Builds a name in the XML Signature namespace with the conventional prefix.
pub fn dsig(local_name: &str) -> QName {
    QName::with_prefix(NS_DSIG, PREFIX_DSIG, local_name)
}

/// Builds a name in the XML Encryption namespace with the conventional prefix.
pub fn xenc(local_name: &str) -> QName {
    QName::with_prefix(NS_XENC, PREFIX_XENC, local_name)
}

/// Builds a name in the XML Encryption 1.1 namespace.
pub fn xenc11(local_name: &str) -> QName {
    QName::with_prefix(NS_XENC11, "xenc11", local_name)
}
