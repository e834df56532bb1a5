//! Asset pipeline.
//!
//! Walks one level of the input directory and writes a clear copy of the
//! asset into the output directory, one file at a time:
//! - encrypted media is decrypted by the external tool,
//! - the client manifest loses its `<Protection>` element,
//! - everything else is copied as is.
//!
//! A failure on one file is logged and recorded in the [`Report`]; the run
//! continues with the next file. Fatal errors (see [`Error::is_fatal`]) stop
//! the run instead.
use std::path::{Path, PathBuf};

use crate::asset::{count_encrypted, scan_dir, AssetFile, AssetKind};
use crate::config::Config;
use crate::decrypter::Decrypter;
use crate::error::{Error, Result};
use crate::key::ContentKey;
use crate::manifest::strip_protection_file;
use crate::utils::display_name;

/// A configured, validated run.
#[derive(Debug)]
pub struct Pipeline {
    key: ContentKey,
    input_dir: PathBuf,
    output_dir: PathBuf,
    decrypter: Decrypter,
}

impl Pipeline {
    pub fn new(
        key: ContentKey,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        decrypter: Decrypter,
    ) -> Self {
        Self {
            key,
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            decrypter,
        }
    }

    /// Validate `config` and derive the content key.
    ///
    /// Nothing is read from or written to the asset directories here; key
    /// material errors surface before any file is touched.
    pub fn from_config(config: &Config) -> Result<Self> {
        let key = config.content_key()?;
        let input_dir = config.input_dir()?.to_path_buf();
        let output_dir = config.output_dir()?;
        let decrypter = config.decrypter()?;
        Ok(Self::new(key, input_dir, output_dir, decrypter))
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Process every file of the input directory.
    ///
    /// Errors returned here are run-level: the input directory cannot be
    /// listed, the output directory cannot be created, both resolve to the
    /// same place, or a file failed with a fatal error. Other per-file
    /// failures are in the returned [`Report`].
    pub fn run(&self) -> Result<Report> {
        let scan = scan_dir(&self.input_dir)?;

        std::fs::create_dir_all(&self.output_dir).map_err(|e| Error::fs(&self.output_dir, e))?;
        self.check_distinct_dirs()?;

        let track_count = count_encrypted(&scan.assets);
        info!(
            "Found {} files in {} ({} encrypted)",
            scan.assets.len() + scan.unreadable.len(),
            self.input_dir.display(),
            track_count
        );

        let mut report = Report::default();
        for (asset, e) in scan.unreadable {
            error!("[-] {}: {}", display_name(&asset.path), e);
            report.outcomes.push(Outcome {
                asset,
                result: Err(e),
            });
        }
        for asset in scan.assets {
            match self.process(&asset, track_count) {
                Err(e) if e.is_fatal() => {
                    error!("[-] {}: {}, stopping", display_name(&asset.path), e);
                    return Err(e);
                }
                result => {
                    if let Err(e) = &result {
                        error!("[-] {}: {}", display_name(&asset.path), e);
                    }
                    report.outcomes.push(Outcome { asset, result });
                }
            }
        }

        info!(
            "Processed {} files ({} failed)",
            report.len(),
            report.failures().count()
        );
        Ok(report)
    }

    /// Apply the handler for `asset`'s classification.
    ///
    /// Fails with a configuration error, without writing, when the output
    /// entry already resolves to the source file (e.g. a symlink back into the
    /// input directory).
    pub fn process(&self, asset: &AssetFile, track_count: usize) -> Result<()> {
        let name = display_name(&asset.path);
        let output = asset.output_path(&self.output_dir);
        check_not_source(&asset.path, &output)?;

        match asset.kind {
            AssetKind::EncryptedMedia => {
                info!("Decrypting {}", name);
                let stdout = self
                    .decrypter
                    .decrypt(&self.key, track_count, &asset.path, &output)?;
                let stdout = stdout.trim_end();
                if !stdout.is_empty() {
                    info!("{}", stdout);
                }
            }
            AssetKind::Manifest => {
                info!("Modifying {}", name);
                if strip_protection_file(&asset.path, &output)? == 0 {
                    warn!("{} has no Protection element, written unchanged", name);
                }
            }
            AssetKind::Passthrough => {
                debug!("Copying {}", name);
                std::fs::copy(&asset.path, &output).map_err(|e| Error::fs(&output, e))?;
            }
        }
        Ok(())
    }

    fn check_distinct_dirs(&self) -> Result<()> {
        let input = self
            .input_dir
            .canonicalize()
            .map_err(|e| Error::fs(&self.input_dir, e))?;
        let output = self
            .output_dir
            .canonicalize()
            .map_err(|e| Error::fs(&self.output_dir, e))?;
        if input == output {
            return Err(Error::Config(format!(
                "output directory {} is the input directory",
                self.output_dir.display()
            )));
        }
        Ok(())
    }
}

fn check_not_source(source: &Path, output: &Path) -> Result<()> {
    // a missing output cannot alias anything
    if let (Ok(source), Ok(target)) = (source.canonicalize(), output.canonicalize()) {
        if source == target {
            return Err(Error::Config(format!(
                "output {} resolves to its source file",
                output.display()
            )));
        }
    }
    Ok(())
}

/// Result of processing one file.
#[derive(Debug)]
pub struct Outcome {
    pub asset: AssetFile,
    pub result: Result<()>,
}

/// Per-file outcomes of a run, in processing order.
#[derive(Debug, Default)]
pub struct Report {
    pub outcomes: Vec<Outcome>,
}

impl Report {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// True when every file was processed.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::Pipeline;
    use crate::decrypter::Decrypter;
    use crate::error::ErrorKind;
    use crate::key::ContentKey;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<SmoothStreamingMedia MajorVersion="2" MinorVersion="0" Duration="100">
  <StreamIndex Type="audio" Chunks="1" QualityLevels="1" />
  <Protection>
    <ProtectionHeader SystemID="9a04f079-9840-4286-ab92-e65be0885f95">AAAA</ProtectionHeader>
  </Protection>
</SmoothStreamingMedia>
"#;

    fn key() -> ContentKey {
        ContentKey::from([0x11u8; 16])
    }

    fn unused_decrypter(dir: &Path) -> Decrypter {
        Decrypter::new(dir.join("no-such-mp4decrypt"))
    }

    #[test]
    fn copies_and_strips_without_decrypting() {
        let input = tempfile::tempdir().expect("tempdir");
        let output = tempfile::tempdir().expect("tempdir");
        let binary: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        std::fs::write(input.path().join("asset.ism"), &binary).expect("write");
        std::fs::write(input.path().join("asset.ismc"), MANIFEST).expect("write");

        let pipeline = Pipeline::new(
            key(),
            input.path(),
            output.path().join("clear"),
            unused_decrypter(input.path()),
        );
        let report = pipeline.run().expect("run");
        assert!(report.is_success());
        assert_eq!(report.len(), 2);

        let copied = std::fs::read(output.path().join("clear/asset.ism")).expect("copied");
        assert_eq!(copied, binary);

        let manifest =
            std::fs::read_to_string(output.path().join("clear/asset.ismc")).expect("manifest");
        assert!(!manifest.contains("Protection"));
        assert!(manifest.contains(r#"<StreamIndex Type="audio" Chunks="1" QualityLevels="1" />"#));
    }

    #[test]
    fn passthrough_overwrites_existing_output() {
        let input = tempfile::tempdir().expect("tempdir");
        let output = tempfile::tempdir().expect("tempdir");
        std::fs::write(input.path().join("notes.txt"), b"new").expect("write");
        std::fs::write(output.path().join("notes.txt"), b"old contents").expect("write");

        let pipeline = Pipeline::new(key(), input.path(), output.path(), unused_decrypter(input.path()));
        assert!(pipeline.run().expect("run").is_success());
        assert_eq!(std::fs::read(output.path().join("notes.txt")).expect("read"), b"new");
    }

    #[test]
    fn missing_input_dir_fails_before_writing() {
        let root = tempfile::tempdir().expect("tempdir");
        let out_dir = root.path().join("out");
        let pipeline = Pipeline::new(
            key(),
            root.path().join("missing"),
            &out_dir,
            unused_decrypter(root.path()),
        );
        let err = pipeline.run().expect_err("missing input");
        assert_eq!(err.kind(), ErrorKind::FilesystemFailure);
        assert!(!out_dir.exists());
    }

    #[test]
    fn output_dir_equal_to_input_is_rejected() {
        let input = tempfile::tempdir().expect("tempdir");
        std::fs::write(input.path().join("asset.ism"), b"data").expect("write");
        let pipeline = Pipeline::new(key(), input.path(), input.path(), unused_decrypter(input.path()));
        let err = pipeline.run().expect_err("same dir");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(std::fs::read(input.path().join("asset.ism")).expect("read"), b"data");
    }

    #[test]
    fn bad_manifest_does_not_stop_the_run() {
        let input = tempfile::tempdir().expect("tempdir");
        let output = tempfile::tempdir().expect("tempdir");
        std::fs::write(input.path().join("broken.ismc"), "<NotSmooth/>").expect("write");
        std::fs::write(input.path().join("thumb.jpg"), b"jpeg").expect("write");

        let pipeline = Pipeline::new(key(), input.path(), output.path(), unused_decrypter(input.path()));
        let report = pipeline.run().expect("run");
        assert!(!report.is_success());

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].asset.file_name(), "broken.ismc");
        assert!(output.path().join("thumb.jpg").exists());
        assert!(!output.path().join("broken.ismc").exists());
    }

    #[cfg(unix)]
    #[test]
    fn output_linked_to_source_stops_the_run() {
        let input = tempfile::tempdir().expect("tempdir");
        let output = tempfile::tempdir().expect("tempdir");
        std::fs::write(input.path().join("notes.txt"), b"keep me").expect("write");
        std::os::unix::fs::symlink(input.path().join("notes.txt"), output.path().join("notes.txt"))
            .expect("symlink");

        let pipeline = Pipeline::new(key(), input.path(), output.path(), unused_decrypter(input.path()));
        let err = pipeline.run().expect_err("fatal");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.is_fatal());
        assert_eq!(std::fs::read(input.path().join("notes.txt")).expect("read"), b"keep me");
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_entry_is_reported() {
        let input = tempfile::tempdir().expect("tempdir");
        let output = tempfile::tempdir().expect("tempdir");
        std::fs::write(input.path().join("asset.ism"), b"server manifest").expect("write");
        std::os::unix::fs::symlink(input.path().join("gone.ismv"), input.path().join("video.ismv"))
            .expect("symlink");

        let pipeline = Pipeline::new(key(), input.path(), output.path(), unused_decrypter(input.path()));
        let report = pipeline.run().expect("run");
        assert!(!report.is_success());
        assert_eq!(report.len(), 2);

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].asset.file_name(), "video.ismv");
        assert_eq!(
            failures[0].result.as_ref().expect_err("failed").kind(),
            ErrorKind::FilesystemFailure
        );
        assert!(output.path().join("asset.ism").exists());
    }

    #[cfg(unix)]
    #[test]
    fn unlistable_input_dir_fails_before_writing() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().expect("tempdir");
        let in_dir = root.path().join("in");
        let out_dir = root.path().join("out");
        std::fs::create_dir(&in_dir).expect("mkdir");
        std::fs::write(in_dir.join("asset.ism"), b"data").expect("write");
        std::fs::set_permissions(&in_dir, std::fs::Permissions::from_mode(0o000)).expect("chmod");

        // permission bits don't apply to root
        if std::fs::read_dir(&in_dir).is_ok() {
            std::fs::set_permissions(&in_dir, std::fs::Permissions::from_mode(0o755))
                .expect("chmod");
            return;
        }

        let pipeline = Pipeline::new(key(), &in_dir, &out_dir, unused_decrypter(root.path()));
        let result = pipeline.run();
        std::fs::set_permissions(&in_dir, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let err = result.expect_err("permission denied");
        assert_eq!(err.kind(), ErrorKind::FilesystemFailure);
        assert!(!out_dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn decrypts_every_media_file_with_shared_key() {
        let input = tempfile::tempdir().expect("tempdir");
        let output = tempfile::tempdir().expect("tempdir");
        for name in ["video.ismv", "audio_en.isma", "audio_fr.ISMA"] {
            std::fs::write(input.path().join(name), name.as_bytes()).expect("write");
        }

        // stands in for mp4decrypt: records its arguments next to the output
        let script = r#"for a; do prev=$last; last=$a; done
cp "$prev" "$last" && printf '%s\n' "$@" > "$last.args" && echo "ok $last""#;
        let decrypter = Decrypter::new("sh").with_leading_args(["-c", script, "mp4decrypt"]);
        let pipeline = Pipeline::new(key(), input.path(), output.path(), decrypter);

        let report = pipeline.run().expect("run");
        assert!(report.is_success());

        let key_arg = format!("{}:{}", 3, "11".repeat(16));
        for name in ["video.ismv", "audio_en.isma", "audio_fr.ISMA"] {
            let out = output.path().join(name);
            assert_eq!(std::fs::read(&out).expect("output"), name.as_bytes());

            let args = std::fs::read_to_string(out.with_file_name(format!("{}.args", name)))
                .expect("args");
            let args: Vec<&str> = args.lines().collect();
            assert_eq!(args.len(), 1 + 3 * 2 + 2);
            assert_eq!(args[0], "--show-progress");
            assert_eq!(args.iter().filter(|a| **a == "--key").count(), 3);
            assert_eq!(args[6], key_arg);
            assert_eq!(args[7], input.path().join(name).to_str().expect("utf-8 path"));
            assert_eq!(args[8], out.to_str().expect("utf-8 path"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn failed_decrypt_continues_with_other_files() {
        let input = tempfile::tempdir().expect("tempdir");
        let output = tempfile::tempdir().expect("tempdir");
        std::fs::write(input.path().join("video.ismv"), b"v").expect("write");
        std::fs::write(input.path().join("asset.ism"), b"server manifest").expect("write");

        let decrypter = Decrypter::new("sh").with_leading_args(["-c", "exit 1", "mp4decrypt"]);
        let pipeline = Pipeline::new(key(), input.path(), output.path(), decrypter);

        let report = pipeline.run().expect("run");
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].result.as_ref().expect_err("failed").kind(),
            ErrorKind::ExternalToolLaunchFailure
        );
        assert!(output.path().join("asset.ism").exists());
    }
}
