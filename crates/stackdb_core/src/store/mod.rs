//! Store file format and in-memory committed state.
//!
//! The store file is an append-only log. Its first frame records the schema
//! the data was written with; every save appends one commit frame. Opening
//! replays the log into a [`state::StoreState`], migrating it if the schema
//! changed, and compaction rewrites it as a header plus one snapshot commit.

pub(crate) mod format;
pub(crate) mod frame;
pub(crate) mod log;
pub(crate) mod migration;
pub(crate) mod state;

pub use format::FORMAT_VERSION;
pub use frame::{FRAME_HEADER_SIZE, FRAME_MAGIC};
pub use migration::MigrationReport;
