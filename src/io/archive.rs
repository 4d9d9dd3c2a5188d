use crate::types::{FieldError, FieldResult};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Scene archive packaging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Tar,
    Zip,
}

impl ArchiveKind {
    /// Detect the archive kind from its file name
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }
}

/// Archive file name with its packaging extension removed
pub fn archive_stem(path: &Path) -> FieldResult<String> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| FieldError::Archive(format!("Invalid archive name: {}", path.display())))?;

    let lower = name.to_ascii_lowercase();
    let stem_len = [".tar.gz", ".tgz", ".tar", ".zip"]
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| name.len() - ext.len())
        .unwrap_or(name.len());

    Ok(name[..stem_len].to_string())
}

/// Acquisition year encoded at characters 9..13 of a Landsat archive name
pub fn archive_year(path: &Path) -> Option<i32> {
    let name = path.file_name()?.to_str()?;
    name.get(9..13)?.parse().ok()
}

/// Extract `archive` into `target`.
///
/// Extraction goes through a staging directory next to `target` that is
/// renamed into place on success, so `target` either does not exist or is
/// complete. Returns `false` when `target` already existed.
pub fn extract_archive(archive: &Path, target: &Path) -> FieldResult<bool> {
    if target.is_dir() {
        log::debug!("{} already extracted, skipping", target.display());
        return Ok(false);
    }

    let kind = ArchiveKind::from_path(archive).ok_or_else(|| {
        FieldError::Archive(format!("Unsupported archive type: {}", archive.display()))
    })?;

    let staging = staging_path(target);
    if staging.exists() {
        // Leftover from an interrupted run
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    log::info!("Extracting {} into {}", archive.display(), target.display());
    let start_time = std::time::Instant::now();

    let unpacked = match kind {
        ArchiveKind::TarGz => {
            let file = File::open(archive)?;
            tar::Archive::new(GzDecoder::new(BufReader::new(file))).unpack(&staging)
        }
        ArchiveKind::Tar => {
            let file = File::open(archive)?;
            tar::Archive::new(BufReader::new(file)).unpack(&staging)
        }
        ArchiveKind::Zip => {
            let result = File::open(archive).map_err(FieldError::from).and_then(|file| {
                ZipArchive::new(file)?
                    .extract(&staging)
                    .map_err(FieldError::from)
            });
            if let Err(e) = result {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
            Ok(())
        }
    };

    if let Err(e) = unpacked {
        let _ = fs::remove_dir_all(&staging);
        return Err(FieldError::Archive(format!(
            "Failed to unpack {}: {}",
            archive.display(),
            e
        )));
    }

    fs::rename(&staging, target)?;
    log::debug!("Extraction took: {:?}", start_time.elapsed());
    Ok(true)
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

/// Recursively list regular files below `dir`
pub fn list_files(dir: &Path) -> FieldResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_archive_year() {
        let path = Path::new("/data/LT50340342009195PAC01.tar.gz");
        assert_eq!(archive_year(path), Some(2009));
        assert_eq!(archive_year(Path::new("short.tgz")), None);
    }

    #[test]
    fn test_archive_stem() {
        assert_eq!(
            archive_stem(Path::new("LT50340342009195PAC01.tar.gz")).unwrap(),
            "LT50340342009195PAC01"
        );
        assert_eq!(archive_stem(Path::new("scene.ZIP")).unwrap(), "scene");
    }

    #[test]
    fn test_extract_tar_gz_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("scene.tar.gz");
        write_tar_gz(&archive, &[("scene_MTL.txt", b"GROUP = A\nEND_GROUP = A\n")]);

        let target = dir.path().join("scene");
        assert!(extract_archive(&archive, &target).unwrap());
        assert!(target.join("scene_MTL.txt").is_file());
        assert!(!staging_path(&target).exists());

        assert!(!extract_archive(&archive, &target).unwrap());
    }

    #[test]
    fn test_extract_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("scene.zip");
        {
            let file = File::create(&archive).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file("nested/scene_MTL.txt", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(b"GROUP = A\n").unwrap();
            writer.finish().unwrap();
        }

        let target = dir.path().join("scene");
        extract_archive(&archive, &target).unwrap();
        let files = list_files(&target).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("nested/scene_MTL.txt"));
    }

    #[test]
    fn test_unsupported_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("scene.rar");
        File::create(&archive).unwrap();
        let result = extract_archive(&archive, &dir.path().join("scene"));
        assert!(matches!(result, Err(FieldError::Archive(_))));
    }
}
