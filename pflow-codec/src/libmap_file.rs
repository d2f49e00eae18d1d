use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use pflow_libmap::{LibraryMap, LibraryMapEntry};

use crate::{CodecError, Result, HEADER_SIZE};

const MAGIC: [u8; 4] = *b"PLIB";

/// Writes every snapshot in `snapshots` to `path` as a `.libmap` file
/// (spec §4.4 "Library-map file").
pub fn export_libmap(snapshots: &[LibraryMap], process_id: u32, path: &Path) -> Result<()> {
    crate::write_atomically(path, |file| {
        let mut w = BufWriter::new(file);

        let mut header = [0u8; HEADER_SIZE];
        {
            let mut cursor = Cursor::new(&mut header[..]);
            cursor.write_all(&MAGIC)?;
            cursor.write_u32::<LittleEndian>(crate::FORMAT_VERSION)?;
            cursor.write_u32::<LittleEndian>(process_id)?;
            cursor.write_u32::<LittleEndian>(snapshots.len() as u32)?;
        }
        w.write_all(&header)?;

        for snapshot in snapshots {
            w.write_u32::<LittleEndian>(snapshot.id())?;
            w.write_u32::<LittleEndian>(snapshot.entries().len() as u32)?;
            for entry in snapshot.entries() {
                w.write_u64::<LittleEndian>(entry.base)?;
                w.write_u64::<LittleEndian>(entry.end)?;
                w.write_u64::<LittleEndian>(entry.file_offset)?;
                let path_bytes = entry.path.as_bytes();
                w.write_u32::<LittleEndian>(path_bytes.len() as u32)?;
                w.write_all(path_bytes)?;
            }
        }
        w.flush()
    })?;
    Ok(())
}

/// Reads a `.libmap` file back into a list of [`LibraryMap`] snapshots
/// (spec §4.4).
pub fn import_libmap(path: &Path) -> Result<(u32, Vec<LibraryMap>)> {
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
    let snapshot_count = cursor.read_u32::<LittleEndian>()?;

    let mut snapshots = Vec::with_capacity(snapshot_count as usize);
    for _ in 0..snapshot_count {
        let id = r
            .read_u32::<LittleEndian>()
            .map_err(|_| CodecError::Truncated { expected: 4, found: 0 })?;
        let entry_count = r
            .read_u32::<LittleEndian>()
            .map_err(|_| CodecError::Truncated { expected: 4, found: 0 })?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let base = r.read_u64::<LittleEndian>()?;
            let end = r.read_u64::<LittleEndian>()?;
            let file_offset = r.read_u64::<LittleEndian>()?;
            let path_len = r.read_u32::<LittleEndian>()? as usize;
            let mut path_bytes = vec![0u8; path_len];
            r.read_exact(&mut path_bytes)
                .map_err(|_| CodecError::Truncated { expected: path_len, found: 0 })?;
            let path = String::from_utf8(path_bytes)
                .map_err(|_| CodecError::InconsistentHeader("path is not valid UTF-8"))?;
            entries.push(LibraryMapEntry { base, end, path, file_offset });
        }
        snapshots.push(LibraryMap::new(id, entries)?);
    }

    Ok((process_id, snapshots))
}
