//! smoothdecrypt - strip PlayReady protection from Smooth Streaming assets.
//!
//! This crate provides:
//! - PlayReady content key derivation from a key seed and key id.
//! - Classification of Smooth Streaming asset files.
//! - Removal of the `<Protection>` element from client manifests.
//! - A pipeline that decrypts media through Bento4's `mp4decrypt` and
//!   copies the rest of the asset.
//!
//! Feature flags:
//! - `cli`: enable the CLI binary helpers.
//! - `log`: emit progress through the `log` crate (default).
//! - `chrono`: use chrono for date handling in CLI.

#[macro_use]
mod macros;

/// Asset file classification and directory scanning.
pub mod asset;
/// Run configuration.
pub mod config;
/// External decrypt tool invocation.
pub mod decrypter;
/// Common error types and Result alias.
pub mod error;
/// PlayReady content key derivation.
pub mod key;
/// Client manifest protection removal.
pub mod manifest;
/// Per-file processing of an asset directory.
pub mod pipeline;
/// Shared helper utilities.
pub mod utils;

pub use error::{Error, ErrorKind, Result};
pub use key::{derive_content_key, ContentKey, KeySeed};
pub use pipeline::{Pipeline, Report};
