//! Core trait abstractions for the canonicalization library.
//!
//! These traits define the interfaces that applications implement
//! to provide model judgments and embeddings.

pub mod embedder;
pub mod oracle;
