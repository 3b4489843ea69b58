use crate::core::error::ArchiveError;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// `scenes_<YYYYmmdd_HHMMSS>.tar.gz`
pub fn default_archive_name() -> String {
    format!(
        "scenes_{}.{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        ARCHIVE_EXTENSION
    )
}

/// Packs every file into a gzip-compressed tar at `archive_path`, in
/// ascending scene order, each entry named by its file name only.
///
/// Entry metadata is normalized so identical inputs give identical archives.
pub fn build_archive(
    files: &BTreeMap<usize, PathBuf>,
    archive_path: &Path,
) -> Result<PathBuf, ArchiveError> {
    if files.is_empty() {
        return Err(ArchiveError::Empty);
    }
    for path in files.values() {
        if !path.is_file() {
            return Err(ArchiveError::MissingFile(path.clone()));
        }
    }

    if let Some(parent) = archive_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let result = write_archive(files, archive_path);
    if result.is_err() {
        let _ = std::fs::remove_file(archive_path);
    }
    result.map(|_| archive_path.to_path_buf())
}

fn write_archive(files: &BTreeMap<usize, PathBuf>, archive_path: &Path) -> Result<(), ArchiveError> {
    let out = BufWriter::new(File::create(archive_path)?);
    let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));

    for path in files.values() {
        let name = path
            .file_name()
            .ok_or_else(|| ArchiveError::MissingFile(path.clone()))?;
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut header = tar::Header::new_gnu();
        header.set_size(len);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, Path::new(name), file)?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn entries(archive: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let name = e.path().unwrap().to_string_lossy().to_string();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (name, data)
            })
            .collect()
    }

    #[test]
    fn test_entries_are_flat_and_in_scene_order() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let nested = temp_dir.path().join("nested");
        std::fs::create_dir_all(&nested)?;
        let a = nested.join("a.png");
        let c = temp_dir.path().join("c.png");
        std::fs::write(&a, b"AAA")?;
        std::fs::write(&c, b"CC")?;

        // Insert in reverse to show ordering comes from the scene index.
        let mut files = BTreeMap::new();
        files.insert(2, c);
        files.insert(0, a);

        let archive_path = temp_dir.path().join("out").join("scenes.tar.gz");
        let built = build_archive(&files, &archive_path)?;
        assert_eq!(built, archive_path);

        let listed = entries(&archive_path);
        assert_eq!(
            listed,
            vec![
                ("a.png".to_string(), b"AAA".to_vec()),
                ("c.png".to_string(), b"CC".to_vec()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_archive_is_reproducible() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let a = temp_dir.path().join("a.png");
        std::fs::write(&a, b"data")?;
        let files = BTreeMap::from([(0, a)]);

        let first = build_archive(&files, &temp_dir.path().join("1.tar.gz"))?;
        let second = build_archive(&files, &temp_dir.path().join("2.tar.gz"))?;
        assert_eq!(std::fs::read(first)?, std::fs::read(second)?);
        Ok(())
    }

    #[test]
    fn test_empty_and_missing_inputs_fail() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let archive_path = temp_dir.path().join("x.tar.gz");

        assert!(matches!(
            build_archive(&BTreeMap::new(), &archive_path),
            Err(ArchiveError::Empty)
        ));

        let files = BTreeMap::from([(0, temp_dir.path().join("gone.png"))]);
        assert!(matches!(
            build_archive(&files, &archive_path),
            Err(ArchiveError::MissingFile(_))
        ));
        assert!(!archive_path.exists());
        Ok(())
    }

    #[test]
    fn test_default_archive_name_shape() {
        let name = default_archive_name();
        assert!(name.starts_with("scenes_"));
        assert!(name.ends_with(".tar.gz"));
        assert_eq!(name.len(), "scenes_20240101_000000.tar.gz".len());
    }
}
