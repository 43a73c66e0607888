//! # TreeVault Core Library
//!
//! This crate provides the core functionality for the `treevault` backup
//! engine.
//!
//! Given a source directory, it produces a backup artifact (a mirror tree
//! or a single package file) that can be restored to reconstruct the
//! original tree including file contents, metadata, and symbolic-link
//! topology. Backups run on demand, on a fixed interval, or driven by
//! filesystem-change events.
//!
//! ## Key Modules
//!
//! - [`walker`] and [`entry`]: deterministic tree enumeration into metadata snapshots.
//! - [`filter`]: the AND-composed filter chain applied to every entry.
//! - [`huffman`]: the compression transform with its embedded frequency table.
//! - [`crypto`]: PBKDF2 + AES-256-CBC password encryption of backup artifacts.
//! - [`package`]: the single-file container format with a trailer-referenced
//!   metadata table.
//! - [`tasks`]: the backup and restore pipelines.
//! - [`timer`] and [`realtime`]: the periodic and change-driven schedulers.

pub mod config;
pub mod entry;
pub mod filter;
pub mod huffman;
pub mod logger;
pub mod monitor;
pub mod package;
pub mod realtime;
pub mod registry;
pub mod status;
pub mod tasks;
pub mod timer;
pub mod walker;

pub mod crypto;
pub mod error;
pub use error::BackupError;

// Cross-platform filesystem wrapper
pub mod fsx;

pub mod cli;
