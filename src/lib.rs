// SPDX-License-Identifier: Apache-2.0

//! A persistent, queryable store for Concise Reference Integrity Manifests
//! (CoRIMs) and their CoMID tags, as used in Remote ATtestation procedureS
//! (RATS) to hold the endorsements, reference values and trust anchors a
//! verifier consults.
//!
//! CBOR-encoded CoRIM tokens (signed or unsigned) are decomposed into a
//! normalized relational schema; individual triples are served back by
//! attesting-environment matching and by label. SQLite, PostgreSQL and
//! MySQL/MariaDB are supported as backing databases.
//!
//! # Examples
//!
//! ```no_run
//! use corim_store::store::{Config, Store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), corim_store::Error> {
//!     let mut cfg = Config::new("sqlite", "file:store.db?cache=shared");
//!     cfg.insecure = true; // permit unverified signed CoRIMs
//!
//!     let store = Store::open(cfg).await?;
//!     store.init().await?;
//!
//!     let token = std::fs::read("cca-ta.cbor").expect("sample token");
//!     store.add_bytes(&token, "cca", true).await?;
//!
//!     let manifest = store.get_manifest("cca-ta", "cca").await?;
//!     println!("stored {} module tag(s)", manifest.module_tags.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Limitations
//!
//! - Signed CoRIMs are ingested without signature verification, and only
//!   when insecure ingest is enabled.
//! - Only CoMID tags (506) are accepted inside a CoRIM's tag list.
//! - Conditional endorsement series are not supported.

pub mod cli;
pub mod db;
pub mod error;
pub mod migrations;
pub mod model;
pub mod raw;
pub mod registry;
pub mod store;
pub mod token;

pub use self::error::Error;
pub use self::raw::RawValue;
pub use self::registry::{extension_type_name, extension_type_tag, register_extension_type};
pub use self::store::{Config, Store};
