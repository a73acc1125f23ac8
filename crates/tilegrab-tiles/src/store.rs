//! On-disk tile tree.
//!
//! Tiles live at `<root>/<zoom>/<x>/<y>.<ext>`, the layout most offline map
//! viewers read directly. A tile is considered cached when its file exists;
//! contents are never inspected. A write that fails removes its partial
//! file, but a process killed mid-write leaves a truncated file that counts
//! as cached until it is removed by hand.

use crate::coord::TileCoord;
use crate::{Result, TileError};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default extension for raster tiles.
pub const DEFAULT_TILE_EXTENSION: &str = "png";

/// A `{z}/{x}/{y}` tile tree rooted at a directory.
///
/// Safe to share between threads: every operation touches only the path of
/// the tile it is given, and directory creation tolerates races.
#[derive(Debug, Clone)]
pub struct TileStore {
    root: PathBuf,
    extension: String,
}

impl TileStore {
    /// Open (creating if needed) a tile tree with the default extension.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::with_extension(root, DEFAULT_TILE_EXTENSION)
    }

    /// Open (creating if needed) a tile tree whose files use `extension`.
    pub fn with_extension<P: AsRef<Path>>(root: P, extension: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| TileError::CreateRoot {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            extension: extension.trim_start_matches('.').to_string(),
        })
    }

    /// Root directory of the tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File extension used for tiles, without the leading dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Full path of a tile's file.
    pub fn path_for(&self, coord: &TileCoord) -> PathBuf {
        self.root.join(coord.relative_path(&self.extension))
    }

    /// Whether the tile's file exists.
    pub fn exists(&self, coord: &TileCoord) -> bool {
        self.path_for(coord).is_file()
    }

    /// Write a tile's bytes, creating the `zoom/x` directories as needed.
    ///
    /// Overwrites any existing file. On failure no file is left behind.
    pub fn write(&self, coord: &TileCoord, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(coord);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fill_or_remove(&path, |file| file.write_all(bytes))?;

        Ok(path)
    }

    /// Count tile files currently present for one zoom level.
    pub fn count_cached(&self, zoom: u8) -> Result<u64> {
        let zoom_dir = self.root.join(zoom.to_string());
        if !zoom_dir.is_dir() {
            return Ok(0);
        }

        let mut count = 0;
        for column in fs::read_dir(&zoom_dir)? {
            let column = column?;
            if !column.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(column.path())? {
                let path = entry?.path();
                if path.is_file() && path.extension().is_some_and(|e| e == self.extension.as_str()) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

/// Create `path` and fill it, deleting the file again if `fill` fails.
fn fill_or_remove<F>(path: &Path, fill: F) -> io::Result<()>
where
    F: FnOnce(&mut fs::File) -> io::Result<()>,
{
    let mut file = fs::File::create(path)?;
    if let Err(e) = fill(&mut file) {
        drop(file);
        if let Err(remove_err) = fs::remove_file(path) {
            warn!("Failed to remove partial tile {}: {}", path.display(), remove_err);
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("a").join("b");
        let store = TileStore::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(store.root(), root.as_path());
        assert_eq!(store.extension(), "png");
    }

    #[test]
    fn test_open_fails_under_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();

        let err = TileStore::open(blocker.join("tiles")).unwrap_err();
        assert!(matches!(err, TileError::CreateRoot { .. }));
    }

    #[test]
    fn test_path_layout() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        let coord = TileCoord::new(5, 10, 12).unwrap();
        assert_eq!(store.path_for(&coord), dir.path().join("5").join("10").join("12.png"));
    }

    #[test]
    fn test_extension_dot_stripped() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::with_extension(dir.path(), ".jpg").unwrap();
        let coord = TileCoord::new(1, 0, 1).unwrap();
        assert!(store.path_for(&coord).ends_with("1/0/1.jpg"));
    }

    #[test]
    fn test_write_then_exists() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        let coord = TileCoord::new(3, 4, 5).unwrap();

        assert!(!store.exists(&coord));
        let path = store.write(&coord, b"tile-bytes").unwrap();
        assert!(store.exists(&coord));
        assert_eq!(fs::read(path).unwrap(), b"tile-bytes");
    }

    #[test]
    fn test_write_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        let coord = TileCoord::new(0, 0, 0).unwrap();

        store.write(&coord, b"first").unwrap();
        store.write(&coord, b"second").unwrap();
        assert_eq!(fs::read(store.path_for(&coord)).unwrap(), b"second");
    }

    #[test]
    fn test_empty_file_counts_as_cached() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        let coord = TileCoord::new(2, 1, 1).unwrap();

        store.write(&coord, b"").unwrap();
        assert!(store.exists(&coord));
    }

    #[test]
    fn test_directory_is_not_a_tile() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        let coord = TileCoord::new(2, 1, 1).unwrap();

        fs::create_dir_all(store.path_for(&coord)).unwrap();
        assert!(!store.exists(&coord));
    }

    #[test]
    fn test_count_cached() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        assert_eq!(store.count_cached(2).unwrap(), 0);

        for (x, y) in [(0, 0), (0, 1), (3, 2)] {
            store.write(&TileCoord::new(2, x, y).unwrap(), b"t").unwrap();
        }
        store.write(&TileCoord::new(1, 0, 0).unwrap(), b"t").unwrap();
        fs::write(dir.path().join("2").join("0").join("notes.txt"), b"x").unwrap();

        assert_eq!(store.count_cached(2).unwrap(), 3);
        assert_eq!(store.count_cached(1).unwrap(), 1);
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        let coord = TileCoord::new(3, 1, 2).unwrap();
        let path = store.path_for(&coord);
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        let err = fill_or_remove(&path, |file| {
            file.write_all(b"half a ti")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "disk full");
        assert!(!path.exists());
        assert!(!store.exists(&coord));
    }
}
