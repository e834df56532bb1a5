//! Smooth Streaming asset classification.
//!
//! Files are classified purely by extension, case-insensitively:
//! `.isma`/`.ismv` are PIFF media that need decrypting, `.ismc` is the client
//! manifest, everything else (server manifest, thumbnails, ...) is copied.
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// How a file in the asset directory is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// Protected PIFF audio (`.isma`) or video (`.ismv`).
    EncryptedMedia,
    /// Client manifest (`.ismc`).
    Manifest,
    /// Anything else.
    Passthrough,
}

impl AssetKind {
    /// Classify an extension given without the leading dot.
    pub fn from_extension(ext: &str) -> Self {
        if ext.eq_ignore_ascii_case("isma") || ext.eq_ignore_ascii_case("ismv") {
            AssetKind::EncryptedMedia
        } else if ext.eq_ignore_ascii_case("ismc") {
            AssetKind::Manifest
        } else {
            AssetKind::Passthrough
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(AssetKind::Passthrough, Self::from_extension)
    }
}

/// A file found in the input directory.
#[derive(Debug, Clone)]
pub struct AssetFile {
    pub path: PathBuf,
    pub kind: AssetKind,
    name: OsString,
}

impl AssetFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .unwrap_or(path.as_os_str())
            .to_os_string();
        Self {
            kind: AssetKind::from_path(&path),
            path,
            name,
        }
    }

    /// Base name of the file.
    pub fn file_name(&self) -> &OsStr {
        &self.name
    }

    /// Where this file lands in `out_dir`.
    pub fn output_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(&self.name)
    }
}

/// Files found directly inside the input directory.
#[derive(Debug, Default)]
pub struct Scan {
    pub assets: Vec<AssetFile>,
    /// Entries whose metadata could not be read, with the error.
    pub unreadable: Vec<(AssetFile, Error)>,
}

/// List the regular files directly inside `dir`.
///
/// Sub-directories are skipped; order is whatever the OS returns. Only a
/// failure to list `dir` itself is an error.
pub fn scan_dir(dir: &Path) -> Result<Scan> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::fs(dir, e))?;

    let mut scan = Scan::default();
    for entry in entries {
        let entry = entry.map_err(|e| Error::fs(dir, e))?;
        let path = entry.path();
        // follows symlinks so a linked file is still an asset
        match std::fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => scan.assets.push(AssetFile::new(path)),
            Ok(_) => {
                debug!("Skipping {} (not a file)", path.display());
            }
            Err(e) => {
                let err = Error::fs(&path, e);
                scan.unreadable.push((AssetFile::new(path), err));
            }
        }
    }
    Ok(scan)
}

/// Number of encrypted media files, used as the track count for the tool.
pub fn count_encrypted(assets: &[AssetFile]) -> usize {
    assets
        .iter()
        .filter(|a| a.kind == AssetKind::EncryptedMedia)
        .count()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{count_encrypted, scan_dir, AssetFile, AssetKind};
    use crate::error::ErrorKind;

    #[test]
    fn classification_by_extension() {
        let cases = [
            ("video.ismv", AssetKind::EncryptedMedia),
            ("audio.isma", AssetKind::EncryptedMedia),
            ("asset.ismc", AssetKind::Manifest),
            ("asset.ism", AssetKind::Passthrough),
            ("thumb.jpg", AssetKind::Passthrough),
            ("README", AssetKind::Passthrough),
            ("archive.ismv.bak", AssetKind::Passthrough),
            (".ismv", AssetKind::Passthrough),
        ];
        for (name, kind) in cases {
            assert_eq!(AssetKind::from_path(Path::new(name)), kind, "{}", name);
        }
    }

    #[test]
    fn classification_ignores_case() {
        assert_eq!(AssetKind::from_extension("ISMA"), AssetKind::EncryptedMedia);
        assert_eq!(AssetKind::from_extension("IsMv"), AssetKind::EncryptedMedia);
        assert_eq!(AssetKind::from_extension("ISMC"), AssetKind::Manifest);
    }

    #[test]
    fn output_path_uses_base_name() {
        let asset = AssetFile::new("/media/in/video_1.ismv");
        assert_eq!(
            asset.output_path(Path::new("/media/out")),
            Path::new("/media/out/video_1.ismv")
        );
    }

    #[test]
    fn scan_skips_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.ismv"), b"a").expect("write");
        std::fs::write(dir.path().join("b.ISMA"), b"b").expect("write");
        std::fs::write(dir.path().join("c.ismc"), b"c").expect("write");
        std::fs::create_dir(dir.path().join("decrypted.ismv")).expect("mkdir");

        let scan = scan_dir(dir.path()).expect("scan");
        assert_eq!(scan.assets.len(), 3);
        assert!(scan.unreadable.is_empty());
        assert_eq!(count_encrypted(&scan.assets), 2);
    }

    #[cfg(unix)]
    #[test]
    fn scan_reports_dangling_symlink() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.ismv"), b"a").expect("write");
        std::os::unix::fs::symlink(dir.path().join("gone.isma"), dir.path().join("b.isma"))
            .expect("symlink");

        let scan = scan_dir(dir.path()).expect("scan");
        assert_eq!(scan.assets.len(), 1);
        assert_eq!(count_encrypted(&scan.assets), 1);
        assert_eq!(scan.unreadable.len(), 1);
        let (asset, err) = &scan.unreadable[0];
        assert_eq!(asset.file_name(), "b.isma");
        assert_eq!(err.kind(), ErrorKind::FilesystemFailure);
    }

    #[test]
    fn scan_missing_dir_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = scan_dir(&dir.path().join("missing")).expect_err("missing dir");
        assert_eq!(err.kind(), ErrorKind::FilesystemFailure);
    }
}
