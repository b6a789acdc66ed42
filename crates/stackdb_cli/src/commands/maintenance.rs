//! Compact and reset commands.

use super::{CliResult, OpenOptions};

/// Rewrites the store as a single snapshot and prints the size change.
pub fn compact(open: &OpenOptions) -> CliResult<()> {
    let coordinator = open.open()?;
    let before = coordinator.file_size()?;
    coordinator.compact()?;
    let after = coordinator.file_size()?;

    println!("Compacted {}", open.path.display());
    println!("  Size before: {before} bytes");
    println!("  Size after:  {after} bytes");
    Ok(())
}

/// Erases every record and all metadata.
pub fn reset(open: &OpenOptions) -> CliResult<()> {
    let coordinator = open.open()?;
    let records = coordinator.record_count();
    coordinator.reset()?;
    println!("Reset {} ({records} records removed)", open.path.display());
    Ok(())
}
