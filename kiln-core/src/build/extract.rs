// kiln-core/src/build/extract.rs
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use kiln_common::error::{KilnError, Result};
use kiln_common::model::artifact::LocalArtifact;
use tar::{Archive, EntryType};
use tracing::{debug, error, warn};
use xz2::read::XzDecoder;
use zip::read::ZipArchive;

const SUPPORTED_ARCHIVE_TYPES: [&str; 5] = ["gz", "bz2", "xz", "tar", "zip"];

/// Extracted source, rooted at the directory the build commands run in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    pub root: PathBuf,
}

/// Detects the archive type from the file's contents, falling back to its
/// extension.
pub fn determine_archive_type(archive_path: &Path) -> Result<&'static str> {
    let detected = infer::get_from_path(archive_path)?
        .map(|kind| kind.extension().to_string())
        .or_else(|| {
            archive_path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| match e {
                    "tgz" => "gz".to_string(),
                    "tbz" | "tbz2" => "bz2".to_string(),
                    "txz" => "xz".to_string(),
                    other => other.to_string(),
                })
        })
        .unwrap_or_default();
    SUPPORTED_ARCHIVE_TYPES
        .iter()
        .find(|t| **t == detected)
        .copied()
        .ok_or_else(|| {
            KilnError::ArchiveError(format!(
                "Unsupported archive type '{}' for {}",
                detected,
                archive_path.display()
            ))
        })
}

/// Extracts `artifact` into `build_dir`, dropping the archive's single
/// top-level directory when it has one.
pub fn extract_source(artifact: &LocalArtifact, build_dir: &Path) -> Result<SourceTree> {
    let archive_type = determine_archive_type(&artifact.path)?;
    let strip_components = match infer_archive_root_dir(&artifact.path, archive_type)? {
        Some(root) => {
            debug!("Archive {} has single root {}", artifact.name, root.display());
            1
        }
        None => 0,
    };
    extract_archive(&artifact.path, build_dir, strip_components, archive_type)?;
    Ok(SourceTree {
        root: build_dir.to_path_buf(),
    })
}

fn tar_reader(file: File, archive_type: &str) -> Box<dyn Read> {
    match archive_type {
        "gz" => Box::new(GzDecoder::new(file)),
        "bz2" => Box::new(BzDecoder::new(file)),
        "xz" => Box::new(XzDecoder::new(file)),
        _ => Box::new(file),
    }
}

fn open_archive(archive_path: &Path) -> Result<File> {
    File::open(archive_path).map_err(|e| {
        KilnError::IoError(format!(
            "Failed to open archive {}: {}",
            archive_path.display(),
            e
        ))
    })
}

pub fn infer_archive_root_dir(archive_path: &Path, archive_type: &str) -> Result<Option<PathBuf>> {
    let file = open_archive(archive_path)?;
    let names: Vec<PathBuf> = if archive_type == "zip" {
        zip_entry_names(file, archive_path)?
    } else {
        let mut archive = Archive::new(tar_reader(file, archive_type));
        let mut names = Vec::new();
        for entry in archive.entries()? {
            let entry = entry.map_err(|e| tar_error(archive_path, e))?;
            names.push(entry.path().map_err(|e| tar_error(archive_path, e))?.into_owned());
        }
        names
    };
    Ok(single_root(&names, archive_path))
}

fn zip_entry_names<R: Read + Seek>(reader: R, archive_path: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(reader).map_err(|e| zip_error(archive_path, e))?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i).map_err(|e| zip_error(archive_path, e))?;
        names.push(PathBuf::from(file.name()));
    }
    Ok(names)
}

// The single top-level directory shared by every entry, if there is one and
// it is not the only entry.
fn single_root(names: &[PathBuf], archive_path: &Path) -> Option<PathBuf> {
    let mut roots = HashSet::new();
    let mut has_nested = false;
    for name in names {
        let mut components = name.components().filter(|c| !matches!(c, Component::CurDir));
        match components.next() {
            None => continue,
            Some(Component::Normal(first)) => {
                roots.insert(PathBuf::from(first));
                if components.next().is_some() {
                    has_nested = true;
                }
            }
            Some(other) => {
                debug!(
                    "Non-standard top-level component ({:?}) in {}",
                    other,
                    archive_path.display()
                );
                return None;
            }
        }
        if roots.len() > 1 {
            return None;
        }
    }
    if roots.is_empty() {
        warn!("Archive {} appears to be empty", archive_path.display());
        return None;
    }
    if !has_nested {
        return None;
    }
    roots.into_iter().next()
}

fn tar_error(archive_path: &Path, e: io::Error) -> KilnError {
    KilnError::ArchiveError(format!(
        "Error reading TAR entry from {}: {}",
        archive_path.display(),
        e
    ))
}

fn zip_error(archive_path: &Path, e: zip::result::ZipError) -> KilnError {
    KilnError::ArchiveError(format!(
        "Failed to read ZIP {}: {}",
        archive_path.display(),
        e
    ))
}

/// Maps an archive path to its location under `target_dir` after stripping.
/// `Ok(None)` means the entry vanished under stripping; absolute paths and
/// `..` components are errors.
fn stripped_target(
    original: &Path,
    target_dir: &Path,
    strip_components: usize,
) -> std::result::Result<Option<PathBuf>, String> {
    let mut kept = original
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .skip(strip_components)
        .peekable();
    if kept.peek().is_none() {
        return Ok(None);
    }
    let mut target = target_dir.to_path_buf();
    for comp in kept {
        match comp {
            Component::Normal(p) => target.push(p),
            Component::ParentDir => {
                return Err(format!("Unsafe '..' in path {}", original.display()))
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("Absolute path {} in archive", original.display()))
            }
            Component::CurDir => {}
        }
    }
    Ok(Some(target))
}

pub fn extract_archive(
    archive_path: &Path,
    target_dir: &Path,
    strip_components: usize,
    archive_type: &str,
) -> Result<()> {
    debug!(
        "Extracting archive '{}' (type: {}) to '{}' (strip_components={})",
        archive_path.display(),
        archive_type,
        target_dir.display(),
        strip_components
    );
    fs::create_dir_all(target_dir)?;
    let file = open_archive(archive_path)?;
    match archive_type {
        "zip" => extract_zip_archive(file, target_dir, strip_components, archive_path),
        "gz" | "bz2" | "xz" | "tar" => extract_tar_archive(
            tar_reader(file, archive_type),
            target_dir,
            strip_components,
            archive_path,
        ),
        other => Err(KilnError::ArchiveError(format!(
            "Unsupported archive type '{}' for {}",
            other,
            archive_path.display()
        ))),
    }
}

/// Errors when `target`'s closest existing ancestor resolves outside `root`,
/// which happens when an earlier entry planted a symlink on the way.
fn check_within(target: &Path, root: &Path) -> std::result::Result<(), String> {
    let mut ancestor = target.parent();
    while let Some(dir) = ancestor {
        if dir.symlink_metadata().is_ok() {
            return match fs::canonicalize(dir) {
                Ok(real) if real.starts_with(root) => Ok(()),
                _ => Err(format!(
                    "Entry '{}' would be written outside {} through a symlink",
                    target.display(),
                    root.display()
                )),
            };
        }
        ancestor = dir.parent();
    }
    Err(format!("Entry '{}' has no existing parent", target.display()))
}

// A previous entry may have left a symlink where a file now goes.
fn remove_symlink(target: &Path) -> io::Result<()> {
    match target.symlink_metadata() {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(target),
        _ => Ok(()),
    }
}

fn extract_tar_archive<R: Read>(
    reader: R,
    target_dir: &Path,
    strip_components: usize,
    archive_path: &Path,
) -> Result<()> {
    let root = fs::canonicalize(target_dir)?;
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    // (link location, link target) pairs; created once every file exists.
    let mut deferred_hardlinks: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry.map_err(|e| tar_error(archive_path, e))?;
        let original = entry
            .path()
            .map_err(|e| tar_error(archive_path, e))?
            .into_owned();
        let target = match stripped_target(&original, target_dir, strip_components) {
            Ok(Some(target)) => target,
            Ok(None) => continue,
            Err(msg) => {
                error!("{} ({})", msg, archive_path.display());
                errors.push(msg);
                continue;
            }
        };
        if let Err(msg) = check_within(&target, &root) {
            error!("{} ({})", msg, archive_path.display());
            errors.push(msg);
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        if entry.header().entry_type() == EntryType::Link {
            let link_target = entry
                .link_name()
                .ok()
                .flatten()
                .map(|name| stripped_target(&name, target_dir, strip_components));
            match link_target {
                Some(Ok(Some(link_target))) => deferred_hardlinks.push((target, link_target)),
                _ => errors.push(format!(
                    "Hardlink entry '{}' has an unusable target",
                    original.display()
                )),
            }
            continue;
        }

        if !entry.header().entry_type().is_dir() {
            remove_symlink(&target)?;
        }
        if let Err(e) = entry.unpack(&target) {
            let msg = format!(
                "Failed to unpack entry {} to {}: {}",
                original.display(),
                target.display(),
                e
            );
            error!("{}", msg);
            errors.push(msg);
        }
    }

    for (link, link_target) in deferred_hardlinks {
        if let Err(msg) = check_within(&link, &root).and(check_within(&link_target, &root)) {
            error!("{} ({})", msg, archive_path.display());
            errors.push(msg);
            continue;
        }
        if link.symlink_metadata().is_ok() {
            let _ = fs::remove_file(&link);
        }
        if let Err(e) = fs::hard_link(&link_target, &link) {
            let msg = format!(
                "Failed to create hardlink '{}' -> '{}': {}",
                link.display(),
                link_target.display(),
                e
            );
            error!("{}", msg);
            errors.push(msg);
        }
    }

    if !errors.is_empty() {
        return Err(KilnError::ArchiveError(format!(
            "Failed during TAR extraction for {} with {} error(s): {}",
            archive_path.display(),
            errors.len(),
            errors.join("; ")
        )));
    }
    debug!("Finished TAR extraction for {}", archive_path.display());
    Ok(())
}

fn extract_zip_archive<R: Read + Seek>(
    reader: R,
    target_dir: &Path,
    strip_components: usize,
    archive_path: &Path,
) -> Result<()> {
    let root = fs::canonicalize(target_dir)?;
    let mut archive = ZipArchive::new(reader).map_err(|e| zip_error(archive_path, e))?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| zip_error(archive_path, e))?;
        let original = file.enclosed_name().ok_or_else(|| {
            KilnError::ArchiveError(format!(
                "Unsafe ZIP entry name '{}' in {}",
                file.name(),
                archive_path.display()
            ))
        })?;
        let target = match stripped_target(&original, target_dir, strip_components) {
            Ok(Some(target)) => target,
            Ok(None) => continue,
            Err(msg) => return Err(KilnError::ArchiveError(msg)),
        };
        check_within(&target, &root).map_err(KilnError::ArchiveError)?;

        if file.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if file.is_symlink() {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            let link_target = PathBuf::from(String::from_utf8_lossy(&buf).into_owned());
            #[cfg(unix)]
            {
                if target.symlink_metadata().is_ok() {
                    let _ = fs::remove_file(&target);
                }
                std::os::unix::fs::symlink(&link_target, &target)?;
            }
            #[cfg(not(unix))]
            warn!(
                "Cannot create symlink on non-unix system: {} -> {}",
                target.display(),
                link_target.display()
            );
            continue;
        }

        remove_symlink(&target)?;
        let mut out_file = File::create(&target)?;
        io::copy(&mut file, &mut out_file)?;
        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
        }
    }
    debug!("Finished ZIP extraction for {}", archive_path.display());
    Ok(())
}
