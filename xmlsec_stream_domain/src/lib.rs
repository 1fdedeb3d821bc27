// /////////////////////////////////////////////////////////////////////////////
// Streaming XML Security
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # XML Security Domain
//!
//! The XML security domain represents the core business logic and rules of
//! the streaming signature and encryption engine. It implements
//! Domain-Driven Design (DDD) patterns and is completely independent of
//! external concerns like XML parsers, cryptographic providers, or I/O.
//!
//! ## Domain-Driven Design Concepts
//!
//! ### Entities
//! Objects with a distinct identity that can change state while maintaining
//! that identity.
//!
//! **Examples in this domain:**
//! - `SecurityToken`: key material, wrapping relationships, usage tracking
//! - `TokenArena`: per-document owner of the token graph
//! - `DocumentContext`: runtime state of one streamed document
//!
//! ### Value Objects
//! Immutable objects defined entirely by their attributes.
//!
//! **Examples in this domain:**
//! - `QName`: a namespace-qualified XML name
//! - `XmlEvent`: one parse event of the streamed document
//! - `ReferenceSpec`: a parsed `<Reference>` with its transform chain
//! - `EncryptedKeySpec`: a parsed `<EncryptedKey>` structure
//! - `SecurityLimits`: secure-processing bounds
//!
//! ### Domain Services
//! Stateless contracts operating on domain objects.
//!
//! **Examples in this domain:**
//! - `AlgorithmRegistry`: URI to algorithm-descriptor mapping
//! - `TokenProvider`: lazy, memoizing token factories
//! - `ResourceResolver`: same-document and external reference matching
//! - `EventTransform` / `ByteTransform`: canonicalization chain stages
//!
//! ### Domain Events
//! Immutable records of significant occurrences, fanned out synchronously by
//! the `SecurityEventBus`.
//!
//! ## Business Rules and Invariants
//!
//! - A `Reference` with a null URI is rejected; Manifest-typed references
//!   are rejected unless explicitly allowed.
//! - Token wrapping forms a directed acyclic graph; re-entering a token that
//!   is currently resolving its own key fails with a recursive-reference
//!   error and leaves the guard cleared.
//! - Secure-processing limits are enforced before any cryptographic work.
//! - Reported reference indices equal declaration order.

pub mod entities;
pub mod error;
pub mod events;
pub mod services;
pub mod value_objects;

// Re-export commonly used types for convenient access
// These exports provide a clean API surface for consumers of the domain layer
pub use entities::{
    ContentFlag, DocumentContext, ProcessorId, SecurityToken, TokenArena, TokenId, TokenKind,
};
pub use error::XmlSecurityError;
pub use events::{SecurityEvent, SecurityEventBus, SecurityEventListener, TokenUsage};
pub use value_objects::{
    Attribute, ElementPath, NamespaceDecl, QName, SecurityLimits, StartElementEvent, XmlEvent,
};
