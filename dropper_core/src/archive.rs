//! Folders are dropped as a single zip built in a temporary directory.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ZIP_ARCHIVE_EXT: &str = ".zip";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("path to file/folder is not correct: {}", .0.display())]
    IncorrectPath(PathBuf),

    #[error("can't create archive: {0}")]
    Io(#[from] io::Error),

    #[error("error during recursive archiving: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("can't write archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archiving task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A zip of a folder. The temporary directory holding it goes away on drop.
#[derive(Debug)]
pub struct PackedArchive {
    path: PathBuf,
    _dir: TempDir,
}

impl PackedArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What actually gets sent for a user-supplied path.
#[derive(Debug)]
pub enum PreparedSource {
    File(PathBuf),
    Archive(PackedArchive),
}

impl PreparedSource {
    pub fn path(&self) -> &Path {
        match self {
            PreparedSource::File(path) => path,
            PreparedSource::Archive(archive) => archive.path(),
        }
    }
}

/// Files are sent as they are, folders are packed first.
pub async fn prepare_source(path: &Path) -> Result<PreparedSource, ArchiveError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| ArchiveError::IncorrectPath(path.to_path_buf()))?;

    if meta.is_dir() {
        Ok(PreparedSource::Archive(pack_directory(path).await?))
    } else if meta.is_file() {
        Ok(PreparedSource::File(path.to_path_buf()))
    } else {
        Err(ArchiveError::IncorrectPath(path.to_path_buf()))
    }
}

/// Zip every regular file under `dir` into `<tmp>/<dirname>.zip`.
pub async fn pack_directory(dir: &Path) -> Result<PackedArchive, ArchiveError> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || pack_directory_blocking(&dir)).await?
}

fn pack_directory_blocking(dir: &Path) -> Result<PackedArchive, ArchiveError> {
    let base_name = dir
        .canonicalize()?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());

    let tmp = tempfile::Builder::new().prefix("dropper").tempdir()?;
    let archive_path = tmp.path().join(format!("{}{}", base_name, ZIP_ARCHIVE_EXT));

    let file = File::create(&archive_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0usize;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = archive_name(dir, entry.path());
        debug!("adding {}", name);
        zip.start_file(name, options)?;
        let mut src = File::open(entry.path())?;
        io::copy(&mut src, &mut zip)?;
        count += 1;
    }

    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer)?;

    info!("packed {} files from {} into {}", count, dir.display(), archive_path.display());
    Ok(PackedArchive {
        path: archive_path,
        _dir: tmp,
    })
}

/// Path of `file` relative to `root`, always with `/` separators.
fn archive_name(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
