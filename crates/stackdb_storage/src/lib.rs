//! # stackdb storage
//!
//! Byte-level backends for the stackdb store file.
//!
//! A backend is an **opaque append-only byte store**. The store file format
//! (frames, headers, commits) is owned by `stackdb_core`; backends only read,
//! append, truncate and flush bytes.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests, with write/read failure injection
//! - [`FileBackend`] - For persistent stores using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use stackdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_all().unwrap(), b"frame");
//! assert_eq!(offset, 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{replace_file_atomically, FileBackend};
pub use memory::InMemoryBackend;
