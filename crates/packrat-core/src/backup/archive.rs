//! Archive creation for each supported compression format
//!
//! All formats archive the staged directory's contents with relative
//! paths, walked in sorted order so the same staging tree always
//! produces the same archive layout. The `none` format is different:
//! it ships a single staged file verbatim.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use walkdir::WalkDir;
use xz2::write::XzEncoder;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::executor::RunLogger;
use super::format_size;
use crate::error::{Error, Result};
use crate::models::CompressionFormat;

const XZ_LEVEL: u32 = 6;

struct ArchiveEntry {
    abs: PathBuf,
    rel: PathBuf,
    is_dir: bool,
}

impl ArchiveEntry {
    fn file_name(&self) -> String {
        self.rel
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Entry name inside the archive, always forward-slashed
    fn archive_name(&self) -> String {
        self.rel.to_string_lossy().replace('\\', "/")
    }
}

/// Build the archive for a run
///
/// Archives everything under `staged_dir` into `dest_dir/{base_name}.{ext}`
/// and returns the archive path and its size in bytes. A failed build
/// removes the partial output file before returning the error.
pub fn create_archive(
    staged_dir: &Path,
    format: CompressionFormat,
    dest_dir: &Path,
    base_name: &str,
    logger: &RunLogger,
) -> Result<(PathBuf, u64)> {
    let file_name = match format.extension() {
        Some(ext) => format!("{}.{}", base_name, ext),
        None => return ship_single_file(staged_dir, dest_dir, base_name, logger),
    };
    let dest = dest_dir.join(file_name);

    let entries = collect_entries(staged_dir)?;

    let build_result = match format {
        CompressionFormat::Zip => write_zip(&entries, &dest, logger),
        CompressionFormat::TarGz => write_tar_gz(&entries, &dest, logger),
        CompressionFormat::TarBz2 => write_tar_bz2(&entries, &dest, logger),
        CompressionFormat::TarXz => write_tar_xz(&entries, &dest, logger),
        CompressionFormat::None => unreachable!("handled above"),
    };

    if let Err(e) = build_result {
        fs::remove_file(&dest).ok();
        return Err(e);
    }

    let size = fs::metadata(&dest)?.len();
    Ok((dest, size))
}

/// The `none` format: exactly one staged regular file, copied verbatim
///
/// The output keeps the source file's extension so the stored object
/// still says what it is, e.g. `backup_20260115_143022.sql`.
fn ship_single_file(
    staged_dir: &Path,
    dest_dir: &Path,
    base_name: &str,
    logger: &RunLogger,
) -> Result<(PathBuf, u64)> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(staged_dir)? {
        entries.push(entry?);
    }

    if entries.len() != 1 {
        return Err(Error::InvalidConfiguration(format!(
            "compression format 'none' requires exactly one source file, found {}",
            entries.len()
        )));
    }
    let entry = &entries[0];
    if !entry.file_type()?.is_file() {
        return Err(Error::InvalidConfiguration(
            "compression format 'none' cannot ship a directory; pick an archive format".to_string(),
        ));
    }

    let source = entry.path();
    let source_name = entry.file_name().to_string_lossy().to_string();
    // Keep the full suffix: dump.sql.gz stays .sql.gz
    let file_name = match source_name.split_once('.') {
        Some((_, suffix)) if !suffix.is_empty() => format!("{}.{}", base_name, suffix),
        _ => base_name.to_string(),
    };
    let dest = dest_dir.join(file_name);

    let size = fs::metadata(&source)?.len();
    logger.log(&format!(
        "→ Processing file: {} ({})",
        source_name,
        format_size(size)
    ));
    fs::copy(&source, &dest)?;

    Ok((dest, size))
}

fn collect_entries(staged_dir: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(staged_dir).sort_by_file_name() {
        let entry = entry.map_err(compression_err)?;
        let rel = entry
            .path()
            .strip_prefix(staged_dir)
            .map_err(compression_err)?
            .to_path_buf();
        if rel.as_os_str().is_empty() {
            continue;
        }

        let is_dir = entry.file_type().is_dir();
        if !is_dir && !entry.file_type().is_file() {
            continue;
        }
        entries.push(ArchiveEntry {
            abs: entry.path().to_path_buf(),
            rel,
            is_dir,
        });
    }
    Ok(entries)
}

fn write_zip(entries: &[ArchiveEntry], dest: &Path, logger: &RunLogger) -> Result<()> {
    let file = File::create(dest).map_err(compression_err)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for entry in entries {
        if entry.is_dir {
            writer
                .add_directory(entry.archive_name(), options)
                .map_err(compression_err)?;
        } else {
            let size = fs::metadata(&entry.abs).map_err(compression_err)?.len();
            logger.log(&format!(
                "→ Processing file: {} ({})",
                entry.file_name(),
                format_size(size)
            ));
            writer
                .start_file(entry.archive_name(), options)
                .map_err(compression_err)?;
            let mut reader = BufReader::new(File::open(&entry.abs).map_err(compression_err)?);
            io::copy(&mut reader, &mut writer).map_err(compression_err)?;
        }
    }

    writer.finish().map_err(compression_err)?;
    Ok(())
}

fn write_tar_gz(entries: &[ArchiveEntry], dest: &Path, logger: &RunLogger) -> Result<()> {
    let file = File::create(dest).map_err(compression_err)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_entries(&mut builder, entries, logger)?;

    let encoder = builder.into_inner().map_err(compression_err)?;
    let mut inner = encoder.finish().map_err(compression_err)?;
    inner.flush().map_err(compression_err)?;
    Ok(())
}

fn write_tar_bz2(entries: &[ArchiveEntry], dest: &Path, logger: &RunLogger) -> Result<()> {
    let file = File::create(dest).map_err(compression_err)?;
    let encoder = BzEncoder::new(BufWriter::new(file), bzip2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_entries(&mut builder, entries, logger)?;

    let encoder = builder.into_inner().map_err(compression_err)?;
    let mut inner = encoder.finish().map_err(compression_err)?;
    inner.flush().map_err(compression_err)?;
    Ok(())
}

fn write_tar_xz(entries: &[ArchiveEntry], dest: &Path, logger: &RunLogger) -> Result<()> {
    let file = File::create(dest).map_err(compression_err)?;
    let encoder = XzEncoder::new(BufWriter::new(file), XZ_LEVEL);
    let mut builder = tar::Builder::new(encoder);
    append_entries(&mut builder, entries, logger)?;

    let encoder = builder.into_inner().map_err(compression_err)?;
    let mut inner = encoder.finish().map_err(compression_err)?;
    inner.flush().map_err(compression_err)?;
    Ok(())
}

fn append_entries<W: Write>(
    builder: &mut tar::Builder<W>,
    entries: &[ArchiveEntry],
    logger: &RunLogger,
) -> Result<()> {
    for entry in entries {
        if entry.is_dir {
            builder
                .append_dir(&entry.rel, &entry.abs)
                .map_err(compression_err)?;
        } else {
            let size = fs::metadata(&entry.abs).map_err(compression_err)?.len();
            logger.log(&format!(
                "→ Processing file: {} ({})",
                entry.file_name(),
                format_size(size)
            ));
            builder
                .append_path_with_name(&entry.abs, &entry.rel)
                .map_err(compression_err)?;
        }
    }
    Ok(())
}

fn compression_err(e: impl std::fmt::Display) -> Error {
    Error::Compression(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_db, test_logger};
    use std::io::Read;
    use tempfile::TempDir;

    /// Staging tree used by the round-trip tests:
    ///   notes.txt
    ///   app/config.json
    ///   app/logs/today.log
    fn build_staging(dir: &Path) -> PathBuf {
        let staged = dir.join("staged");
        fs::create_dir_all(staged.join("app/logs")).unwrap();
        fs::write(staged.join("notes.txt"), b"remember the milk").unwrap();
        fs::write(staged.join("app/config.json"), b"{\"debug\":false}").unwrap();
        fs::write(staged.join("app/logs/today.log"), b"started ok\n").unwrap();
        staged
    }

    fn assert_tree(root: &Path) {
        assert_eq!(
            fs::read(root.join("notes.txt")).unwrap(),
            b"remember the milk"
        );
        assert_eq!(
            fs::read(root.join("app/config.json")).unwrap(),
            b"{\"debug\":false}"
        );
        assert_eq!(
            fs::read(root.join("app/logs/today.log")).unwrap(),
            b"started ok\n"
        );
    }

    fn archive_to(dir: &TempDir, format: CompressionFormat) -> PathBuf {
        let db = test_db();
        let (logger, _run) = test_logger(&db, &format!("archive-{}", format.as_str()));
        let staged = build_staging(dir.path());
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let (path, size) =
            create_archive(&staged, format, &out, "backup_20260115_143022", &logger).unwrap();
        assert!(size > 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), size);
        path
    }

    #[test]
    fn test_tar_gz_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = archive_to(&dir, CompressionFormat::TarGz);
        assert!(path.to_string_lossy().ends_with("backup_20260115_143022.tar.gz"));

        let decoder = flate2::read::GzDecoder::new(File::open(&path).unwrap());
        let mut archive = tar::Archive::new(decoder);
        let extracted = dir.path().join("extracted");
        archive.unpack(&extracted).unwrap();
        assert_tree(&extracted);
    }

    #[test]
    fn test_tar_bz2_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = archive_to(&dir, CompressionFormat::TarBz2);

        let decoder = bzip2::read::BzDecoder::new(File::open(&path).unwrap());
        let mut archive = tar::Archive::new(decoder);
        let extracted = dir.path().join("extracted");
        archive.unpack(&extracted).unwrap();
        assert_tree(&extracted);
    }

    #[test]
    fn test_tar_xz_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = archive_to(&dir, CompressionFormat::TarXz);

        let decoder = xz2::read::XzDecoder::new(File::open(&path).unwrap());
        let mut archive = tar::Archive::new(decoder);
        let extracted = dir.path().join("extracted");
        archive.unpack(&extracted).unwrap();
        assert_tree(&extracted);
    }

    #[test]
    fn test_zip_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = archive_to(&dir, CompressionFormat::Zip);

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let extracted = dir.path().join("extracted");
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let rel = match file.enclosed_name().map(|p| p.to_path_buf()) {
                Some(rel) => rel,
                None => continue,
            };
            let target = extracted.join(rel);
            if file.is_dir() {
                fs::create_dir_all(&target).unwrap();
            } else {
                fs::create_dir_all(target.parent().unwrap()).unwrap();
                let mut contents = Vec::new();
                file.read_to_end(&mut contents).unwrap();
                fs::write(&target, contents).unwrap();
            }
        }
        assert_tree(&extracted);
    }

    #[test]
    fn test_none_ships_single_file_verbatim() {
        let dir = TempDir::new().unwrap();
        let db = test_db();
        let (logger, _run) = test_logger(&db, "archive-none");

        let staged = dir.path().join("staged");
        fs::create_dir(&staged).unwrap();
        fs::write(staged.join("dump.sql"), b"CREATE TABLE t (id INT);").unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let (path, size) = create_archive(
            &staged,
            CompressionFormat::None,
            &out,
            "backup_20260115_143022",
            &logger,
        )
        .unwrap();

        assert_eq!(path, out.join("backup_20260115_143022.sql"));
        assert_eq!(size, 24);
        assert_eq!(fs::read(&path).unwrap(), b"CREATE TABLE t (id INT);");
    }

    #[test]
    fn test_none_rejects_multiple_entries() {
        let dir = TempDir::new().unwrap();
        let db = test_db();
        let (logger, _run) = test_logger(&db, "archive-none-multi");

        let staged = dir.path().join("staged");
        fs::create_dir(&staged).unwrap();
        fs::write(staged.join("a.sql"), b"a").unwrap();
        fs::write(staged.join("b.sql"), b"b").unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let err = create_archive(&staged, CompressionFormat::None, &out, "backup", &logger)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_none_rejects_directory() {
        let dir = TempDir::new().unwrap();
        let db = test_db();
        let (logger, _run) = test_logger(&db, "archive-none-dir");

        let staged = dir.path().join("staged");
        fs::create_dir_all(staged.join("data")).unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let err = create_archive(&staged, CompressionFormat::None, &out, "backup", &logger)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_archive_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let db = test_db();
        let (logger, _run) = test_logger(&db, "archive-determinism");
        let staged = build_staging(dir.path());

        let out_a = dir.path().join("out_a");
        let out_b = dir.path().join("out_b");
        fs::create_dir(&out_a).unwrap();
        fs::create_dir(&out_b).unwrap();

        let (a, _) =
            create_archive(&staged, CompressionFormat::TarGz, &out_a, "backup", &logger).unwrap();
        let (b, _) =
            create_archive(&staged, CompressionFormat::TarGz, &out_b, "backup", &logger).unwrap();

        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }

    #[test]
    fn test_processing_lines_logged() {
        let dir = TempDir::new().unwrap();
        let db = test_db();
        let (logger, run) = test_logger(&db, "archive-logs");
        let staged = build_staging(dir.path());
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        create_archive(&staged, CompressionFormat::TarGz, &out, "backup", &logger).unwrap();
        logger.flush().unwrap();

        let logs = db.get_run_logs(run.id).unwrap().unwrap();
        assert!(logs.contains("→ Processing file: notes.txt"));
        assert!(logs.contains("→ Processing file: config.json"));
        assert!(logs.contains("→ Processing file: today.log"));
    }
}
