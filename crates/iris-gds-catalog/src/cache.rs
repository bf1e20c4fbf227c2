//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Content-addressed DataStandards cache files."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Catalog cache files.
//!
//! A cache is the CBOR encoding of [`CacheFile`], named
//! `{name_base}_{ULID}.ibds` (or `{name_base}.ibds`). ULIDs sort in creation
//! order, so the lexicographically greatest suffix is the newest cache.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use ulid::Ulid;

use crate::standards::DataStandards;
use crate::{CatalogError, Result};

/// Current cache envelope version.
pub const CACHE_FORMAT_VERSION: u16 = 1;
/// File extension recognised by [`load_cache`].
pub const CACHE_EXTENSION: &str = "ibds";

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    format_version: u16,
    catalog_version: String,
    digest: String,
    standards: DataStandards,
}

/// Write `standards` into `dir` and return the path written.
pub fn cache(
    standards: &DataStandards,
    dir: &Path,
    name_base: &str,
    include_ulid_suffix: bool,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let file_name = if include_ulid_suffix {
        format!("{name_base}_{}.{CACHE_EXTENSION}", Ulid::new())
    } else {
        format!("{name_base}.{CACHE_EXTENSION}")
    };
    let path = dir.join(file_name);

    let envelope = CacheFile {
        format_version: CACHE_FORMAT_VERSION,
        catalog_version: standards.version.clone(),
        digest: compute_digest(standards)?,
        standards: standards.clone(),
    };
    let bytes = serde_cbor::to_vec(&envelope)?;
    let mut writer = BufWriter::new(File::create(&path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote catalog cache");
    Ok(path)
}

/// Load a cache by exact file name (or path), or by `name_base`, in which
/// case the newest matching file in `dir` is used.
pub fn load_cache(dir: &Path, name: &str) -> Result<DataStandards> {
    let direct = dir.join(name);
    let path = if direct.is_file() {
        direct
    } else {
        newest_cache(dir, name)?
            .ok_or_else(|| CatalogError::Missing(format!("catalog cache `{name}` in {}", dir.display())))?
    };

    let mut bytes = Vec::new();
    File::open(&path)?.read_to_end(&mut bytes)?;
    let envelope: CacheFile = serde_cbor::from_slice(&bytes)?;
    let label = path.display().to_string();

    if envelope.format_version != CACHE_FORMAT_VERSION {
        return Err(CatalogError::schema(
            label,
            format!(
                "cache format version {} is not supported (expected {CACHE_FORMAT_VERSION})",
                envelope.format_version
            ),
        ));
    }
    let expected = compute_digest(&envelope.standards)?;
    if envelope.digest != expected {
        return Err(CatalogError::schema(label, "cache digest does not match its contents"));
    }
    if envelope.catalog_version != envelope.standards.version {
        return Err(CatalogError::schema(
            label,
            format!(
                "cache header version `{}` disagrees with catalog version `{}`",
                envelope.catalog_version, envelope.standards.version
            ),
        ));
    }
    Ok(envelope.standards)
}

/// Newest `{name_base}_{ULID}.ibds` in `dir`, falling back to an unsuffixed
/// `{name_base}.ibds`. A missing directory yields `Ok(None)`.
pub fn newest_cache(dir: &Path, name_base: &str) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let prefix = format!("{name_base}_");
    let mut newest: Option<(Ulid, PathBuf)> = None;
    for entry in entries {
        let path = entry?.path();
        let Some(stem) = cache_stem(&path) else {
            continue;
        };
        let Some(ulid) = stem
            .strip_prefix(&prefix)
            .and_then(|suffix| Ulid::from_string(suffix).ok())
        else {
            continue;
        };
        if newest.as_ref().map_or(true, |(best, _)| ulid > *best) {
            newest = Some((ulid, path));
        }
    }
    if let Some((_, path)) = newest {
        return Ok(Some(path));
    }
    let plain = dir.join(format!("{name_base}.{CACHE_EXTENSION}"));
    Ok(plain.is_file().then_some(plain))
}

fn cache_stem(path: &Path) -> Option<&str> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(CACHE_EXTENSION) {
        return None;
    }
    path.file_stem().and_then(|stem| stem.to_str())
}

fn compute_digest(standards: &DataStandards) -> Result<String> {
    let serialized = serde_cbor::to_vec(standards)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(hex::encode(hasher.finalize()))
}
