//! Config snapshots and rollback (C9).
//!
//! Before every deploy, the currently-live `named.conf`, zone files and RPZ
//! files are archived into a single `tar.gz`, named and indexed by content
//! hash so identical snapshots aren't duplicated on disk.

use std::io::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::write::GzEncoder;
use flate2::Compression;
use hash::content_hash;
use tar::Builder;

/// Walk `config_dir`, `zones_dir` and `rpz_dir`, archiving every regular
/// file found into one gzip-compressed tarball under `snapshot_dir`.
/// Returns the snapshot's path and content hash.
pub fn take_snapshot(
    snapshot_dir: &Utf8Path,
    dirs: &[(&str, &Utf8Path)],
) -> std::io::Result<(Utf8PathBuf, String)> {
    let mut archive_bytes = Vec::new();
    {
        let encoder = GzEncoder::new(&mut archive_bytes, Compression::default());
        let mut builder = Builder::new(encoder);
        for (label, dir) in dirs {
            if dir.exists() {
                builder.append_dir_all(label, dir)?;
            }
        }
        builder.finish()?;
    }

    let hash = content_hash(&archive_bytes);
    std::fs::create_dir_all(snapshot_dir)?;
    let path = snapshot_dir.join(format!("{hash}.tar.gz"));
    if !path.exists() {
        let mut file = std::fs::File::create(&path)?;
        file.write_all(&archive_bytes)?;
    }

    Ok((path, hash))
}

/// Extract a previously taken snapshot back over `config_dir`/`zones_dir`/
/// `rpz_dir`, used by the rollback operation when an operator reverts a
/// bad deploy (spec. §4.9).
pub fn restore_snapshot(snapshot_path: &Utf8Path, dest_root: &Utf8Path) -> std::io::Result<()> {
    let file = std::fs::File::open(snapshot_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dest_root)?;
    Ok(())
}

/// A dependency-free FNV-1a content hash, good enough to dedupe identical
/// snapshot archives (and detect no-op deploys) without pulling in a
/// cryptographic hash crate for a non-adversarial use case.
pub mod hash {
    pub fn content_hash(bytes: &[u8]) -> String {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in bytes {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        format!("{hash:016x}")
    }
}
