//! The store file: an append-only log of frames over a storage backend.

use crate::error::{CoreError, CoreResult};
use crate::store::format::{Commit, Frame, StoreHeader, FORMAT_VERSION};
use crate::store::frame;
use stackdb_codec::{from_cbor, to_cbor};
use stackdb_storage::{replace_file_atomically, FileBackend, StorageBackend};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where the log lives, which decides how rewrites are made atomic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Location {
    /// A file, rewritten by write-temp-then-rename.
    File(PathBuf),
    /// A caller-provided backend, rewritten in place.
    Backend,
}

/// Frames read back from a log.
#[derive(Debug, Default)]
pub(crate) struct Replayed {
    pub header: Option<StoreHeader>,
    pub commits: Vec<Commit>,
    /// Bytes dropped from a torn tail.
    pub truncated: u64,
}

pub(crate) struct StoreLog {
    backend: Box<dyn StorageBackend>,
    location: Location,
    sync_on_commit: bool,
}

impl StoreLog {
    /// Opens the log file at `path`, creating it and its directory if needed.
    ///
    /// Returns the log and whether the file was created by this call.
    pub fn open_file(path: &Path, sync_on_commit: bool) -> CoreResult<(Self, bool)> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        let created = backend.was_created();
        Ok((
            Self {
                backend: Box::new(backend),
                location: Location::File(path.to_path_buf()),
                sync_on_commit,
            },
            created,
        ))
    }

    /// Wraps an arbitrary backend.
    pub fn with_backend(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            location: Location::Backend,
            sync_on_commit,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Reads every frame, dropping a torn tail from the backend.
    pub fn replay(&mut self) -> CoreResult<Replayed> {
        let bytes = self.backend.read_all()?;
        let scan = frame::scan(&bytes)?;
        let mut replayed = Replayed::default();

        for (i, (offset, payload)) in scan.frames.iter().enumerate() {
            match (i, from_cbor::<Frame>(payload)?) {
                (0, Frame::Header(header)) => {
                    if header.format_version > FORMAT_VERSION {
                        return Err(CoreError::invalid_format(format!(
                            "store format {} is newer than supported {FORMAT_VERSION}",
                            header.format_version
                        )));
                    }
                    replayed.header = Some(header);
                }
                (0, Frame::Commit(_)) => {
                    return Err(CoreError::invalid_format("store file does not start with a header"));
                }
                (_, Frame::Header(_)) => {
                    return Err(CoreError::invalid_format(format!("unexpected header frame at offset {offset}")));
                }
                (_, Frame::Commit(commit)) => replayed.commits.push(commit),
            }
        }

        if scan.is_torn(bytes.len()) {
            replayed.truncated = bytes.len() as u64 - scan.valid_len;
            tracing::warn!(
                valid_len = scan.valid_len,
                dropped = replayed.truncated,
                "dropping incomplete frame at end of store file"
            );
            self.backend.truncate(scan.valid_len)?;
            self.backend.sync()?;
        }
        Ok(replayed)
    }

    /// Appends one frame, returning its offset.
    pub fn append(&mut self, frame: &Frame) -> CoreResult<u64> {
        let bytes = frame::encode(&to_cbor(frame)?)?;
        let offset = self.backend.append(&bytes)?;
        self.backend.flush()?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        Ok(offset)
    }

    /// Replaces the whole log with `frames`.
    ///
    /// For files the new contents are written next to the old ones and
    /// renamed into place, so a failure leaves the previous file intact.
    pub fn rewrite(&mut self, frames: &[Frame]) -> CoreResult<()> {
        let mut bytes = Vec::new();
        for f in frames {
            bytes.extend(frame::encode(&to_cbor(f)?)?);
        }
        match &self.location {
            Location::File(path) => {
                replace_file_atomically(path, &bytes)?;
                self.backend = Box::new(FileBackend::open(path)?);
            }
            Location::Backend => {
                self.backend.truncate(0)?;
                self.backend.append(&bytes)?;
                self.backend.sync()?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for StoreLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLog")
            .field("location", &self.location)
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use stackdb_storage::InMemoryBackend;

    fn header() -> StoreHeader {
        StoreHeader::for_schema(
            &Schema::from_json_str(r#"{"entities":[{"name":"E","attributes":[]}]}"#).unwrap(),
        )
    }

    fn commit(sequence: u64) -> Frame {
        Frame::Commit(Commit {
            sequence,
            ..Commit::default()
        })
    }

    #[test]
    fn replay_returns_header_and_commits() {
        let backend = InMemoryBackend::new();
        let mut log = StoreLog::with_backend(Box::new(backend.clone()), true);
        log.append(&Frame::Header(header())).unwrap();
        log.append(&commit(1)).unwrap();
        log.append(&commit(2)).unwrap();

        let mut reopened = StoreLog::with_backend(Box::new(backend), true);
        let replayed = reopened.replay().unwrap();
        assert_eq!(replayed.header, Some(header()));
        assert_eq!(replayed.commits.iter().map(|c| c.sequence).collect::<Vec<_>>(), [1, 2]);
        assert_eq!(replayed.truncated, 0);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let backend = InMemoryBackend::new();
        let mut log = StoreLog::with_backend(Box::new(backend.clone()), true);
        log.append(&Frame::Header(header())).unwrap();
        let good_len = log.size().unwrap();
        log.append(&commit(1)).unwrap();
        let full = backend.data();
        let torn = InMemoryBackend::with_data(full[..full.len() - 3].to_vec());

        let mut reopened = StoreLog::with_backend(Box::new(torn.clone()), true);
        let replayed = reopened.replay().unwrap();

        assert!(replayed.commits.is_empty());
        assert!(replayed.truncated > 0);
        assert_eq!(torn.data().len() as u64, good_len);
    }

    #[test]
    fn commit_before_header_is_rejected() {
        let backend = InMemoryBackend::new();
        let mut log = StoreLog::with_backend(Box::new(backend), true);
        log.append(&commit(1)).unwrap();
        assert!(matches!(log.replay(), Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn rewrite_file_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.store");
        let (mut log, created) = StoreLog::open_file(&path, true).unwrap();
        assert!(created);
        log.append(&Frame::Header(header())).unwrap();
        log.append(&commit(1)).unwrap();
        log.append(&commit(2)).unwrap();

        log.rewrite(&[Frame::Header(header()), commit(9)]).unwrap();
        log.append(&commit(10)).unwrap();

        let (mut reopened, created) = StoreLog::open_file(&path, true).unwrap();
        assert!(!created);
        let replayed = reopened.replay().unwrap();
        assert_eq!(replayed.commits.iter().map(|c| c.sequence).collect::<Vec<_>>(), [9, 10]);
    }
}
