//! # Cosmo Convert
//!
//! Batch image conversion to WebP and AVIF, with a local gallery and an
//! optional cloud gallery on a Supabase-compatible backend.
//!
//! # Architecture: One Item, One State Machine
//!
//! Every selected image becomes an [`convert::ImageItem`] owned by a
//! [`convert::Converter`]. Each item moves through its own states and the
//! batch never stops on a single failure:
//!
//! ```text
//! add_file ──▶ Pending ──▶ Converting ──▶ Done(artifact)  ──▶ download / save / upload
//!                               └──────▶ Error(failure)
//! ```
//!
//! Conversion itself is three pure-ish steps behind the [`imaging`] module:
//! identify the source, plan the output size ([`imaging::plan_resize`]),
//! encode through an [`imaging::ImageBackend`]. The planner is plain
//! arithmetic, so resize rules are unit-tested without decoding a pixel.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Resize planning, the encode backend trait, and the pure-Rust backend |
//! | [`convert`] | Conversion orchestrator: items, batches, saved/uploaded bookkeeping |
//! | [`preview`] | Owned in-memory preview handles released on drop |
//! | [`gallery`] | Directory-backed local gallery with a JSON index |
//! | [`cloud`] | Storage + table REST client, realtime insert feed, upload rollback |
//! | [`config`] | `cosmo.toml` loading over stock defaults, validation |
//! | [`naming`] | Display names and output file/object names |
//! | [`output`] | CLI output formatting for progress events and listings |
//!
//! # Design Decisions
//!
//! ## Settings Are Read Per Item
//!
//! The converter reads its settings through a shared handle when each item
//! starts. Changing settings during a batch affects only the items not yet
//! started; an item never mixes two settings snapshots.
//!
//! ## Revisions Guard Uploads
//!
//! Re-converting an item bumps its revision and clears its saved/uploaded
//! state. An upload that finishes after a re-conversion describes an
//! artifact that no longer exists, so it is not recorded on the item.
//!
//! ## Object Keys Are Stored, Not Derived
//!
//! Cloud rows keep the storage key next to the public URL. Deleting a row
//! removes exactly the object it was created with.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding and encoding go through the `image` crate (and `rav1d` for AVIF
//! input), so the binary has no system dependencies.

pub mod cloud;
pub mod config;
pub mod convert;
pub mod gallery;
pub mod imaging;
pub mod naming;
pub mod output;
pub mod preview;
