// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Entities
//!
//! Identity-bearing objects of the XML security domain: the token graph and
//! the per-document context.

pub mod document_context;
pub mod security_token;

pub use document_context::{ContentFlag, DocumentContext, ProcessorId};
pub use security_token::{
    EcCurve, KeyMaterial, SecurityToken, TokenArena, TokenId, TokenKeyResolver, TokenKind,
};
