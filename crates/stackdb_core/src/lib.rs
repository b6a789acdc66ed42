//! # stackdb Core
//!
//! Context lifecycle and dataset reconciliation over a persistent,
//! schema-backed object store.
//!
//! This crate provides:
//! - [`Stack`]: one configured store, opened once per process and shared by
//!   every stack built for the same file
//! - [`Context`]: main, background and sandbox execution contexts, each
//!   confined to one thread
//! - async [`count`] and [`find`] delivering results on the context's thread
//! - [`dui`]: Delete-Update-Insert reconciliation of incoming dictionaries
//!   against stored records by primary key
//! - [`MetadataStore`]: durable key/value metadata kept in the store file
//!
//! ## Example
//!
//! ```rust,no_run
//! use stackdb_core::{Predicate, Stack, StoreConfiguration};
//!
//! let stack = Stack::new(StoreConfiguration::new(["model.json"], "app.sdb"));
//! let ctx = stack.background_context()?;
//! stack.count(Some(&ctx), "Person", Predicate::All, |n| println!("{n:?}"))?;
//! # Ok::<(), stackdb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod coordinator;
pub mod default_stack;
mod dui;
mod entity;
mod error;
mod metadata;
mod predicate;
mod query;
mod record;
mod schema;
mod session;
mod stack;
mod store;
mod types;

pub use config::{default_base_dir, MigrationOptions, StoreCallback, StoreConfiguration, StoreOptions, DATA_DIR_NAME};
pub use context::{Context, PendingResult};
pub use coordinator::{lock_path, Coordinator};
pub use dui::{dui, mirror_handler, plan, DuiChange, DuiOperation, DuiPlan, DuiStep, DuiSummary};
pub use entity::Entity;
pub use error::{CoreError, CoreResult, ValidationError, ValidationErrors, ValidationProblem};
pub use metadata::MetadataStore;
pub use predicate::{FetchRequest, Predicate, ResultType, SortDescriptor};
pub use query::{count, find, FindResult};
pub use record::{Record, RecordStatus};
pub use schema::{AttributeDescription, AttributeType, EntityDescription, Schema, SchemaError};
pub use session::Session;
pub use stack::Stack;
pub use store::{MigrationReport, FORMAT_VERSION, FRAME_HEADER_SIZE, FRAME_MAGIC};
pub use types::{ContextId, ContextKind, ObjectId};

pub use stackdb_codec::{RecordDictionary, Value, ValueKind};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
