//! On-disk form of the aligned triple.
//!
//! Each save writes a complete generation directory holding the three
//! artifacts, then atomically repoints `CURRENT` at it (temp file, fsync,
//! rename, fsync dir). A reader therefore sees either the previous or the
//! new generation, never a mix of the two.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::catalog::{Catalog, EmbeddingCache};
use crate::index::FlatIpIndex;
use crate::types::IndexEntry;

pub const CURRENT_FILE: &str = "CURRENT";
pub const INDEX_FILE: &str = "image_index.bin";
pub const METADATA_FILE: &str = "image_metadata.json";
pub const EMBEDDINGS_FILE: &str = "image_embeddings.f32";

const GENERATION_PREFIX: &str = "gen-";
const INDEX_MAGIC: &[u8; 8] = b"IMGIDX01";
const EMBEDDINGS_MAGIC: &[u8; 8] = b"IMGEMB01";
const EMBEDDINGS_HEADER_LEN: usize = EMBEDDINGS_MAGIC.len() + 16;

#[derive(Debug)]
pub enum LoadOutcome {
    /// No index has ever been written to this directory.
    Fresh,
    Loaded(Catalog),
}

/// Loads the active generation. Any structural problem is an error; the
/// caller decides how to degrade.
pub fn load_catalog(dir: &Path, dim: usize) -> anyhow::Result<LoadOutcome> {
    let Some(generation) = read_current(dir)? else {
        return Ok(LoadOutcome::Fresh);
    };
    let gen_dir = dir.join(&generation);

    let index_raw = fs::read(gen_dir.join(INDEX_FILE))
        .with_context(|| format!("read {INDEX_FILE} from {generation}"))?;
    let store = decode_index_blob(&index_raw)?;

    let metadata_raw = fs::read(gen_dir.join(METADATA_FILE))
        .with_context(|| format!("read {METADATA_FILE} from {generation}"))?;
    let entries: Vec<IndexEntry> =
        serde_json::from_slice(&metadata_raw).context("decode index metadata")?;

    let embeddings_raw = fs::read(gen_dir.join(EMBEDDINGS_FILE))
        .with_context(|| format!("read {EMBEDDINGS_FILE} from {generation}"))?;
    let (matrix_dim, rows) = decode_embeddings(&embeddings_raw)?;
    let cache = EmbeddingCache::from_matrix(matrix_dim, rows)?;

    if store.dim() != dim || cache.dim() != dim {
        anyhow::bail!(
            "persisted index dim mismatch: configured={dim} index={} embeddings={}",
            store.dim(),
            cache.dim()
        );
    }
    let catalog = Catalog::from_parts(store, cache, entries)
        .with_context(|| format!("validate generation {generation}"))?;
    Ok(LoadOutcome::Loaded(catalog))
}

/// Writes `catalog` as a new generation. Returns `Ok(false)` without
/// touching the disk when the catalog is empty.
pub fn save_catalog(dir: &Path, catalog: &Catalog) -> anyhow::Result<bool> {
    if catalog.is_empty() {
        return Ok(false);
    }
    catalog.check_aligned().context("refuse to persist torn catalog")?;
    fs::create_dir_all(dir).with_context(|| format!("create index dir {}", dir.display()))?;

    let previous = read_current(dir)?;
    let next = next_generation_name(previous.as_deref());
    let gen_dir = dir.join(&next);
    if gen_dir.exists() {
        fs::remove_dir_all(&gen_dir)
            .with_context(|| format!("clear stale generation {}", gen_dir.display()))?;
    }
    fs::create_dir_all(&gen_dir)?;

    write_file_synced(&gen_dir.join(INDEX_FILE), &encode_index_blob(catalog.store())?)?;
    let metadata = serde_json::to_vec_pretty(catalog.entries()).context("encode index metadata")?;
    write_file_synced(&gen_dir.join(METADATA_FILE), &metadata)?;
    write_file_synced(&gen_dir.join(EMBEDDINGS_FILE), &encode_embeddings(catalog.cache()))?;
    fsync_dir(&gen_dir)?;

    set_current(dir, &next)?;
    prune_generations(dir, &next)?;
    Ok(true)
}

/// Removes every persisted generation so a later load starts fresh.
pub fn discard_catalog(dir: &Path) -> anyhow::Result<()> {
    let current = dir.join(CURRENT_FILE);
    if current.exists() {
        fs::remove_file(&current).context("remove CURRENT")?;
        fsync_dir(dir)?;
    }
    prune_generations(dir, "")
}

pub fn encode_index_blob(store: &FlatIpIndex) -> anyhow::Result<Vec<u8>> {
    let payload = bincode::serialize(store).context("encode flat index")?;
    let mut out = Vec::with_capacity(INDEX_MAGIC.len() + payload.len());
    out.extend_from_slice(INDEX_MAGIC);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode_index_blob(raw: &[u8]) -> anyhow::Result<FlatIpIndex> {
    let payload = raw
        .strip_prefix(INDEX_MAGIC.as_slice())
        .ok_or_else(|| anyhow::anyhow!("index blob has bad magic"))?;
    let store: FlatIpIndex = bincode::deserialize(payload).context("decode flat index")?;
    store.validate().context("index blob")?;
    Ok(store)
}

/// Dense `[count, dim]` float32 matrix: magic, `u64` count, `u64` dim, then
/// little-endian rows.
pub fn encode_embeddings(cache: &EmbeddingCache) -> Vec<u8> {
    let matrix = cache.as_matrix();
    let mut out = Vec::with_capacity(EMBEDDINGS_HEADER_LEN + matrix.len() * 4);
    out.extend_from_slice(EMBEDDINGS_MAGIC);
    out.extend_from_slice(&(cache.len() as u64).to_le_bytes());
    out.extend_from_slice(&(cache.dim() as u64).to_le_bytes());
    for x in matrix {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Returns `(dim, rows)`.
pub fn decode_embeddings(raw: &[u8]) -> anyhow::Result<(usize, Vec<f32>)> {
    if raw.len() < EMBEDDINGS_HEADER_LEN {
        anyhow::bail!("embedding matrix truncated header ({} bytes)", raw.len());
    }
    let (magic, rest) = raw.split_at(EMBEDDINGS_MAGIC.len());
    if magic != EMBEDDINGS_MAGIC {
        anyhow::bail!("embedding matrix has bad magic");
    }
    let (count_raw, rest) = rest.split_at(8);
    let (dim_raw, body) = rest.split_at(8);
    let count = usize::try_from(u64::from_le_bytes(count_raw.try_into()?))
        .context("embedding count does not fit usize")?;
    let dim = usize::try_from(u64::from_le_bytes(dim_raw.try_into()?))
        .context("embedding dim does not fit usize")?;
    if dim == 0 {
        anyhow::bail!("embedding matrix has zero dim");
    }
    let expected = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| anyhow::anyhow!("embedding matrix size overflow"))?;
    if body.len() != expected {
        anyhow::bail!(
            "embedding matrix body is {} bytes, header says {count}x{dim}",
            body.len()
        );
    }
    let rows = body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((dim, rows))
}

fn read_current(dir: &Path) -> anyhow::Result<Option<String>> {
    let path = dir.join(CURRENT_FILE);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).context("read CURRENT"),
    };
    let name = raw.trim();
    if parse_generation(name).is_none() {
        anyhow::bail!("CURRENT names an invalid generation: {name:?}");
    }
    Ok(Some(name.to_string()))
}

fn set_current(dir: &Path, generation: &str) -> anyhow::Result<()> {
    let tmp = dir.join(format!("{CURRENT_FILE}.tmp"));
    write_file_synced(&tmp, format!("{generation}\n").as_bytes())?;
    fs::rename(&tmp, dir.join(CURRENT_FILE)).context("install CURRENT")?;
    fsync_dir(dir)
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

fn next_generation_name(current: Option<&str>) -> String {
    let next = current
        .and_then(parse_generation)
        .map_or(1, |n| n.saturating_add(1));
    format!("{GENERATION_PREFIX}{next:012}")
}

fn prune_generations(dir: &Path, keep: &str) -> anyhow::Result<()> {
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).context("list index dir"),
    };
    let stale: Vec<PathBuf> = listing
        .filter_map(Result::ok)
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            parse_generation(&name).is_some() && name != keep
        })
        .map(|e| e.path())
        .collect();
    for path in stale {
        fs::remove_dir_all(&path)
            .with_context(|| format!("remove old generation {}", path.display()))?;
    }
    Ok(())
}

fn write_file_synced(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("fsync {}", path.display()))?;
    Ok(())
}

fn fsync_dir(dir: &Path) -> anyhow::Result<()> {
    // Directory handles cannot be opened for sync on Windows.
    #[cfg(unix)]
    {
        let dir_fd = fs::File::open(dir).with_context(|| format!("open dir {}", dir.display()))?;
        dir_fd
            .sync_all()
            .with_context(|| format!("fsync dir {}", dir.display()))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
