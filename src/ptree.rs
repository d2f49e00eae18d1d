//! Binary tree serializer (spec §4.9, §6 `*.ptree`/`*.ptree.gz`): a fixed
//! 64-byte header followed by a pre-order node stream. Framing mirrors
//! `pflow-codec`'s `.pflw`/`.libmap` writers (fixed magic, little-endian
//! integers, length-prefixed strings, zero-padded reserved header bytes)
//! but lives here rather than in `pflow-codec` since it serializes a
//! finished `pflow_tree::TreeArena` rather than C1/C2's on-process-exit
//! dumps.

use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pflow_tree::{ArenaNode, BuildMode, NodeId, ResolvedFrame, SampleCountMode, TreeArena, ROOT};
use thiserror::Error;

const MAGIC: [u8; 4] = *b"PTRE";
const FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 64;

/// No parent; only [`ROOT`] is ever written with this value (spec §4.9's
/// node stream needs an explicit sentinel since `0` is itself a valid id).
const NO_PARENT: u32 = u32::MAX;
const NO_LINE: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum PtreeError {
    #[error("bad magic number: expected {MAGIC:?}, found {0:?}")]
    BadMagic([u8; 4]),

    #[error("unsupported format version {0} (this build supports {FORMAT_VERSION})")]
    UnsupportedVersion(u32),

    #[error("file is truncated")]
    Truncated,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PtreeError>;

/// Writes `arena` to `path` as a `.ptree` file; gzip-compresses the body
/// when `compress` is set (the `.ptree.gz` variant from spec §6).
pub fn write_ptree(arena: &TreeArena, path: &Path, compress: bool) -> Result<()> {
    let mut body = Vec::new();
    write_nodes(arena, &mut body)?;

    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();

    let mut header = [0u8; HEADER_SIZE];
    {
        let mut cursor = Cursor::new(&mut header[..]);
        cursor.write_all(&MAGIC)?;
        cursor.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        cursor.write_u8(compress as u8)?;
        cursor.write_u32::<LittleEndian>(arena.node_count() as u32)?;
        cursor.write_u32::<LittleEndian>(arena.process_count() as u32)?;
        cursor.write_u64::<LittleEndian>(timestamp)?;
    }

    let file = std::fs::File::create(path)?;
    let mut w = BufWriter::new(file);
    w.write_all(&header)?;
    if compress {
        let mut encoder = GzEncoder::new(w, Compression::default());
        encoder.write_all(&body)?;
        encoder.finish()?;
    } else {
        w.write_all(&body)?;
        w.flush()?;
    }
    Ok(())
}

/// Reads a `.ptree`/`.ptree.gz` file back into a [`TreeArena`]. `build_mode`
/// and `sample_count_mode` must match what the tree was built with: they
/// are not themselves recorded in the header, since child lookup by
/// `FrameKey` needs them at reconstruction time and re-deriving them from
/// the stream alone would require guessing.
pub fn read_ptree(
    path: &Path,
    build_mode: BuildMode,
    sample_count_mode: SampleCountMode,
) -> Result<TreeArena> {
    let file = std::fs::File::open(path)?;
    let mut r = BufReader::new(file);

    let mut header = [0u8; HEADER_SIZE];
    r.read_exact(&mut header).map_err(|_| PtreeError::Truncated)?;
    let mut cursor = Cursor::new(&header[..]);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(PtreeError::BadMagic(magic));
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(PtreeError::UnsupportedVersion(version));
    }
    let compressed = cursor.read_u8()? != 0;
    let node_count = cursor.read_u32::<LittleEndian>()? as usize;
    let process_count = cursor.read_u32::<LittleEndian>()? as usize;
    let _timestamp = cursor.read_u64::<LittleEndian>()?;

    let mut arena = TreeArena::new(build_mode, sample_count_mode);
    if compressed {
        let mut decoder = GzDecoder::new(r);
        read_nodes(&mut decoder, &mut arena, node_count, process_count)?;
    } else {
        read_nodes(&mut r, &mut arena, node_count, process_count)?;
    }
    Ok(arena)
}

fn write_nodes(arena: &TreeArena, out: &mut Vec<u8>) -> Result<()> {
    pflow_tree::pre_order(arena, None, &mut |id, node, _depth| {
        write_one_node(id, node, arena, out).expect("writing to an in-memory Vec cannot fail");
        true
    });
    Ok(())
}

fn write_one_node(id: NodeId, node: &ArenaNode, arena: &TreeArena, out: &mut Vec<u8>) -> Result<()> {
    let parent_id = node.parent.unwrap_or(NO_PARENT);
    out.write_u32::<LittleEndian>(id)?;
    out.write_u32::<LittleEndian>(parent_id)?;
    out.write_u64::<LittleEndian>(node.total_samples)?;
    out.write_u64::<LittleEndian>(node.self_samples)?;
    out.write_u64::<LittleEndian>(node.frame.raw_address)?;
    out.write_u64::<LittleEndian>(node.frame.offset)?;
    out.write_u32::<LittleEndian>(node.frame.line.unwrap_or(NO_LINE))?;

    write_string(out, &node.frame.library)?;
    write_optional_string(out, node.frame.function.as_deref())?;
    write_optional_string(out, node.frame.file.as_deref())?;

    out.write_u32::<LittleEndian>(node.children.len() as u32)?;

    let counts = node.counters.padded_counts(arena.process_count());
    let times = node.counters.padded_times(arena.process_count());
    for (count, time) in counts.iter().zip(times.iter()) {
        out.write_u64::<LittleEndian>(*count)?;
        out.write_f64::<LittleEndian>(*time)?;
    }
    Ok(())
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<()> {
    out.write_u32::<LittleEndian>(s.len() as u32)?;
    out.write_all(s.as_bytes())?;
    Ok(())
}

fn write_optional_string(out: &mut Vec<u8>, s: Option<&str>) -> Result<()> {
    match s {
        Some(s) => {
            out.write_u8(1)?;
            write_string(out, s)
        }
        None => out.write_u8(0).map_err(Into::into),
    }
}

fn read_nodes(
    r: &mut impl Read,
    arena: &mut TreeArena,
    node_count: usize,
    process_count: usize,
) -> Result<()> {
    for expected_id in 0..node_count as u32 {
        let id = r.read_u32::<LittleEndian>()?;
        let parent_raw = r.read_u32::<LittleEndian>()?;
        let total_samples = r.read_u64::<LittleEndian>()?;
        let self_samples = r.read_u64::<LittleEndian>()?;
        let raw_address = r.read_u64::<LittleEndian>()?;
        let offset = r.read_u64::<LittleEndian>()?;
        let line_raw = r.read_u32::<LittleEndian>()?;

        let library = read_string(r)?;
        let function = read_optional_string(r)?;
        let file = read_optional_string(r)?;
        let child_count = r.read_u32::<LittleEndian>()?;

        let mut counters = pflow_tree::PerProcessCounters::default();
        for process_id in 0..process_count {
            let count = r.read_u64::<LittleEndian>()?;
            let time = r.read_f64::<LittleEndian>()?;
            if count != 0 || time != 0.0 {
                counters.add(process_id, count, time);
            }
        }

        if id != expected_id {
            return Err(PtreeError::Truncated);
        }
        let parent = if parent_raw == NO_PARENT { None } else { Some(parent_raw) };
        let frame = ResolvedFrame {
            raw_address,
            library,
            offset,
            function,
            file,
            line: if line_raw == NO_LINE { None } else { Some(line_raw) },
        };
        let _ = child_count; // informational only; children are re-linked via adopt_node.
        arena.adopt_node(id, parent, frame, total_samples, self_samples, counters);
    }
    Ok(())
}

fn read_string(r: &mut impl Read) -> Result<String> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|_| PtreeError::Truncated)?;
    String::from_utf8(buf).map_err(|_| PtreeError::Truncated)
}

fn read_optional_string(r: &mut impl Read) -> Result<Option<String>> {
    let present = r.read_u8()?;
    if present == 0 {
        Ok(None)
    } else {
        Ok(Some(read_string(r)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str) -> ResolvedFrame {
        ResolvedFrame {
            raw_address: 0x1000,
            library: "app".to_string(),
            offset: 0x10,
            function: Some(name.to_string()),
            file: Some("main.c".to_string()),
            line: Some(42),
        }
    }

    #[test]
    fn round_trip_preserves_structure_and_counts() {
        let mut arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        arena.insert(&[frame("main"), frame("work")], 0, 5, 1.5);
        arena.insert(&[frame("main"), frame("other")], 1, 3, 2.0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ptree");
        write_ptree(&arena, &path, false).unwrap();

        let restored =
            read_ptree(&path, BuildMode::ContextFree, SampleCountMode::Inclusive).unwrap();
        assert_eq!(restored.node_count(), arena.node_count());
        assert_eq!(restored.node(ROOT).total_samples, arena.node(ROOT).total_samples);
        assert_eq!(restored.process_count(), arena.process_count());
    }

    #[test]
    fn gzip_round_trip_matches_uncompressed() {
        let mut arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Exclusive);
        arena.insert(&[frame("main")], 0, 9, 1.0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ptree.gz");
        write_ptree(&arena, &path, true).unwrap();

        let restored =
            read_ptree(&path, BuildMode::ContextFree, SampleCountMode::Exclusive).unwrap();
        assert_eq!(restored.node(ROOT).total_samples, 9);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-ptree");
        std::fs::write(&path, [0u8; HEADER_SIZE]).unwrap();
        let err =
            read_ptree(&path, BuildMode::ContextFree, SampleCountMode::Inclusive).unwrap_err();
        assert!(matches!(err, PtreeError::BadMagic(_)));
    }
}
