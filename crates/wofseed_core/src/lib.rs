//! Rebuild Who's On First place hierarchies and seed them as nested folders.
//!
//! The core is [`record`] (raw JSON to canonical records), [`hierarchy`]
//! (parent/child graph, roots, cycle-safe walk) and [`sanitize`] (folder
//! names). Everything else is I/O around it: [`source`] reads local
//! directories or admin repositories, [`seed`] turns walk events into
//! folders and placeholder documents, and [`checkpoint`] carries progress
//! between runs.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod pipeline;
pub mod record;
pub mod runtime;
pub mod sanitize;
pub mod seed;
pub mod source;
