use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use pflow_store::{RawStack, SampleStore};

use crate::{CodecError, Result, HEADER_SIZE};

const MAGIC: [u8; 4] = *b"PFLW";

/// One decoded entry from a `.pflw` file: the raw call stack, the snapshot
/// id recorded at first insertion, and the final counter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedSample {
    pub stack: RawStack,
    pub snapshot_id: u32,
    pub counter: u64,
}

/// Everything a `.pflw` file carries (spec §4.4 "Sample file").
#[derive(Debug, Clone)]
pub struct ImportedSamples {
    pub process_id: u32,
    pub dropped_samples: u64,
    pub default_snapshot_id: u32,
    pub entries: Vec<ImportedSample>,
}

/// Writes `store`'s current contents to `path` as a `.pflw` file
/// (spec §4.4). The store must already be quiescent (see
/// [`pflow_store::SampleStore::for_each`]'s safety contract).
pub fn export_samples(
    store: &SampleStore,
    process_id: u32,
    default_snapshot_id: u32,
    path: &Path,
) -> Result<()> {
    let mut entries = Vec::with_capacity(store.len());
    store.for_each(|e| entries.push(e));

    crate::write_atomically(path, |file| {
        let mut w = BufWriter::new(file);

        let mut header = [0u8; HEADER_SIZE];
        {
            let mut cursor = Cursor::new(&mut header[..]);
            cursor.write_all(&MAGIC)?;
            cursor.write_u32::<LittleEndian>(crate::FORMAT_VERSION)?;
            cursor.write_u32::<LittleEndian>(process_id)?;
            cursor.write_u64::<LittleEndian>(entries.len() as u64)?;
            cursor.write_u64::<LittleEndian>(store.dropped_samples())?;
            cursor.write_u32::<LittleEndian>(default_snapshot_id)?;
            // Remaining bytes stay zeroed: reserved for forward compatibility.
        }
        w.write_all(&header)?;

        for entry in &entries {
            let addresses = entry.stack.addresses();
            w.write_u16::<LittleEndian>(addresses.len() as u16)?;
            for addr in addresses {
                w.write_u64::<LittleEndian>(*addr)?;
            }
            w.write_u64::<LittleEndian>(entry.counter)?;
            w.write_u32::<LittleEndian>(entry.snapshot_id)?;
        }
        w.flush()
    })?;
    Ok(())
}

/// Reads a `.pflw` file back (spec §4.4). Fails with
/// [`CodecError::BadMagic`], [`CodecError::UnsupportedVersion`], or
/// [`CodecError::Truncated`] as appropriate; never panics on malformed
/// input.
pub fn import_samples(path: &Path) -> Result<ImportedSamples> {
    let file = std::fs::File::open(path)?;
    let mut r = BufReader::new(file);

    let mut header = [0u8; HEADER_SIZE];
    r.read_exact(&mut header)
        .map_err(|_| CodecError::Truncated { expected: HEADER_SIZE, found: 0 })?;

    let mut cursor = Cursor::new(&header[..]);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(CodecError::BadMagic { expected: MAGIC, found: magic });
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != crate::FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let process_id = cursor.read_u32::<LittleEndian>()?;
    let stack_count = cursor.read_u64::<LittleEndian>()?;
    let dropped_samples = cursor.read_u64::<LittleEndian>()?;
    let default_snapshot_id = cursor.read_u32::<LittleEndian>()?;

    let mut entries = Vec::with_capacity(stack_count as usize);
    for _ in 0..stack_count {
        let depth = r
            .read_u16::<LittleEndian>()
            .map_err(|_| CodecError::Truncated { expected: 2, found: 0 })?;
        let mut addresses = Vec::with_capacity(depth as usize);
        for _ in 0..depth {
            addresses.push(
                r.read_u64::<LittleEndian>()
                    .map_err(|_| CodecError::Truncated { expected: 8, found: 0 })?,
            );
        }
        let counter = r
            .read_u64::<LittleEndian>()
            .map_err(|_| CodecError::Truncated { expected: 8, found: 0 })?;
        let snapshot_id = r
            .read_u32::<LittleEndian>()
            .map_err(|_| CodecError::Truncated { expected: 4, found: 0 })?;
        let stack = RawStack::new(&addresses)?;
        entries.push(ImportedSample { stack, snapshot_id, counter });
    }

    if entries.len() as u64 != stack_count {
        return Err(CodecError::InconsistentHeader("stack_count did not match entries read"));
    }

    Ok(ImportedSamples {
        process_id,
        dropped_samples,
        default_snapshot_id,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pflow_store::SampleStore;

    #[test]
    fn round_trip_preserves_entries() {
        let store = SampleStore::new(64);
        let a = RawStack::new(&[0xAA, 0xBB]).unwrap();
        let b = RawStack::new(&[0xCC]).unwrap();
        for _ in 0..7 {
            store.increment(&a, 3);
        }
        for _ in 0..3 {
            store.increment(&b, 3);
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process-1234.pflw");
        export_samples(&store, 1234, 3, &path).unwrap();

        let imported = import_samples(&path).unwrap();
        assert_eq!(imported.process_id, 1234);
        assert_eq!(imported.default_snapshot_id, 3);
        assert_eq!(imported.dropped_samples, 0);
        assert_eq!(imported.entries.len(), 2);
        let by_counter: std::collections::HashMap<_, _> = imported
            .entries
            .iter()
            .map(|e| (e.counter, e))
            .collect();
        assert!(by_counter.contains_key(&7));
        assert!(by_counter.contains_key(&3));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-pflw-file");
        std::fs::write(&path, [0u8; 64]).unwrap();
        let err = import_samples(&path).unwrap_err();
        assert!(matches!(err, CodecError::BadMagic { .. }));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.pflw");
        std::fs::write(&path, [0u8; 10]).unwrap();
        let err = import_samples(&path).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }
}
