// Disk spill for evicted pages: plain files under `spill_dir`, named
// `<table>_<version>_<index>.page`, containing exactly the bytes `codec`
// produces. No WAL, no checksumming beyond what the codec already rejects on
// decode — out of scope for an in-process engine.

use std::fs;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::error::Result;
use crate::row::Row;
use crate::storage::page::PageId;

pub fn spill_path(dir: &Path, id: &PageId) -> PathBuf {
    dir.join(id.spill_file_name())
}

pub fn write_rows(dir: &Path, id: &PageId, rows: &[Row]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = spill_path(dir, id);
    let bytes = codec::encode_rows(rows);
    fs::write(&path, bytes)?;
    Ok(path)
}

pub fn read_rows(path: &Path) -> Result<Vec<Row>> {
    let bytes = fs::read(path)?;
    codec::decode_rows(&bytes)
}

pub fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let id = PageId::new("orders", 1, 0);
        let mut row = Row::new();
        row.insert("id", Value::Int64(7));
        let path = write_rows(dir.path(), &id, &[row.clone()]).unwrap();
        let back = read_rows(&path).unwrap();
        assert_eq!(back, vec![row]);
    }

    #[test]
    fn remove_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let id = PageId::new("orders", 1, 0);
        assert!(remove(&spill_path(dir.path(), &id)).is_ok());
    }
}
