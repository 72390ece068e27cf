//! Source acquisition: copy a job's source data into the run workspace
//!
//! Local paths are copied directly; SSH paths are fetched over SFTP.
//! Either way the workspace ends up with one entry per configured path,
//! named after the path's final component, with directory structure
//! preserved underneath.

use std::fs;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{Session, Sftp};
use walkdir::WalkDir;

use super::executor::RunLogger;
use super::format_size;
use crate::error::{Error, Result};
use crate::models::{JobSource, LocalSourceConfig, SshSourceConfig};

/// Applies to connect, handshake, and each SFTP operation
const SSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Stage all source paths into `dest`, returning the staged entries
pub fn acquire(source: &JobSource, dest: &Path, logger: &RunLogger) -> Result<Vec<PathBuf>> {
    match source {
        JobSource::Local(config) => acquire_local(config, dest, logger),
        JobSource::Ssh(config) => acquire_ssh(config, dest, logger),
    }
}

fn acquire_local(
    config: &LocalSourceConfig,
    dest: &Path,
    logger: &RunLogger,
) -> Result<Vec<PathBuf>> {
    let mut staged = Vec::new();

    for raw in &config.paths {
        let source_path = Path::new(raw);
        let metadata = fs::metadata(source_path).map_err(|e| map_local_io(raw, e))?;

        let base_name = source_path.file_name().ok_or_else(|| {
            Error::InvalidConfiguration(format!("source path has no name: {}", raw))
        })?;
        let target = dest.join(base_name);

        if metadata.is_dir() {
            copy_dir(source_path, &target, logger)?;
        } else {
            logger.log(&format!(
                "→ Processing file: {} ({})",
                base_name.to_string_lossy(),
                format_size(metadata.len())
            ));
            fs::copy(source_path, &target).map_err(|e| map_local_io(raw, e))?;
        }
        staged.push(target);
    }

    Ok(staged)
}

fn copy_dir(source_root: &Path, target_root: &Path, logger: &RunLogger) -> Result<()> {
    for entry in WalkDir::new(source_root) {
        let entry = entry.map_err(|e| map_walk_error(source_root, e))?;
        let rel = entry
            .path()
            .strip_prefix(source_root)
            .map_err(|e| Error::Other(format!("walk escaped {}: {}", source_root.display(), e)))?;
        let target = if rel.as_os_str().is_empty() {
            target_root.to_path_buf()
        } else {
            target_root.join(rel)
        };

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            logger.log(&format!(
                "→ Processing file: {} ({})",
                entry.file_name().to_string_lossy(),
                format_size(size)
            ));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)
                .map_err(|e| map_local_io(&entry.path().to_string_lossy(), e))?;
        }
        // Symlinks and special files are skipped
    }
    Ok(())
}

fn map_local_io(path: &str, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => Error::SourceNotFound(path.to_string()),
        io::ErrorKind::PermissionDenied => Error::Permission(format!("cannot read {}: {}", path, e)),
        _ => Error::Io(e),
    }
}

fn map_walk_error(root: &Path, e: walkdir::Error) -> Error {
    let path = e
        .path()
        .unwrap_or(root)
        .to_string_lossy()
        .to_string();
    match e.into_io_error() {
        Some(io_err) => map_local_io(&path, io_err),
        None => Error::Other(format!("walk failed under {}", root.display())),
    }
}

fn acquire_ssh(config: &SshSourceConfig, dest: &Path, logger: &RunLogger) -> Result<Vec<PathBuf>> {
    let sftp = connect_sftp(config)?;
    let mut staged = Vec::new();

    for raw in &config.paths {
        let remote_path = Path::new(raw);
        let stat = sftp
            .stat(remote_path)
            .map_err(|e| map_sftp_error(raw, e))?;

        let base_name = remote_path.file_name().ok_or_else(|| {
            Error::InvalidConfiguration(format!("source path has no name: {}", raw))
        })?;
        let target = dest.join(base_name);

        if stat.is_dir() {
            fetch_dir(&sftp, remote_path, &target, logger)?;
        } else {
            fetch_file(&sftp, remote_path, &target, stat.size.unwrap_or(0), logger)?;
        }
        staged.push(target);
    }

    Ok(staged)
}

fn connect_sftp(config: &SshSourceConfig) -> Result<Sftp> {
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| Error::Connection(format!("cannot resolve {}: {}", config.host, e)))?
        .next()
        .ok_or_else(|| Error::Connection(format!("no address for {}", config.host)))?;

    let stream = TcpStream::connect_timeout(&addr, SSH_TIMEOUT).map_err(|e| {
        Error::Connection(format!(
            "cannot reach {}:{}: {}",
            config.host, config.port, e
        ))
    })?;

    let mut session = Session::new()
        .map_err(|e| Error::Connection(format!("SSH session setup failed: {}", e)))?;
    session.set_timeout(SSH_TIMEOUT.as_millis() as u32);
    session.set_tcp_stream(stream);
    session.handshake().map_err(|e| {
        Error::Connection(format!("SSH handshake with {} failed: {}", config.host, e))
    })?;

    if let Some(key) = &config.private_key {
        session
            .userauth_pubkey_memory(&config.username, None, key, None)
            .map_err(|e| {
                Error::Connection(format!(
                    "SSH key auth failed for {}@{}: {}",
                    config.username, config.host, e
                ))
            })?;
    } else if let Some(password) = &config.password {
        session
            .userauth_password(&config.username, password)
            .map_err(|e| {
                Error::Connection(format!(
                    "SSH password auth failed for {}@{}: {}",
                    config.username, config.host, e
                ))
            })?;
    } else {
        return Err(Error::InvalidConfiguration(
            "SSH requires a password or a private key".to_string(),
        ));
    }

    session
        .sftp()
        .map_err(|e| Error::Connection(format!("SFTP channel failed: {}", e)))
}

fn fetch_dir(
    sftp: &Sftp,
    remote_root: &Path,
    target_root: &Path,
    logger: &RunLogger,
) -> Result<()> {
    fs::create_dir_all(target_root)?;

    let entries = sftp
        .readdir(remote_root)
        .map_err(|e| map_sftp_error(&remote_root.to_string_lossy(), e))?;

    for (remote_path, stat) in entries {
        let name = match remote_path.file_name() {
            Some(n) => n,
            None => continue,
        };
        let target = target_root.join(name);

        if is_symlink(&stat) {
            // Symlinks are not followed
            continue;
        } else if stat.is_dir() {
            fetch_dir(sftp, &remote_path, &target, logger)?;
        } else {
            fetch_file(sftp, &remote_path, &target, stat.size.unwrap_or(0), logger)?;
        }
    }
    Ok(())
}

fn fetch_file(
    sftp: &Sftp,
    remote_path: &Path,
    target: &Path,
    size: u64,
    logger: &RunLogger,
) -> Result<()> {
    let name = remote_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| remote_path.display().to_string());
    logger.log(&format!(
        "→ Downloading file: {} ({})",
        name,
        format_size(size)
    ));

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut remote = sftp
        .open(remote_path)
        .map_err(|e| map_sftp_error(&remote_path.to_string_lossy(), e))?;
    let mut local = fs::File::create(target)?;
    io::copy(&mut remote, &mut local).map_err(|e| {
        Error::Connection(format!("transfer of {} failed: {}", remote_path.display(), e))
    })?;

    Ok(())
}

/// SFTP stat bits arrive as a raw mode word; check the file type mask
fn is_symlink(stat: &ssh2::FileStat) -> bool {
    stat.perm.map(|p| p & 0o170000 == 0o120000).unwrap_or(false)
}

fn map_sftp_error(path: &str, e: ssh2::Error) -> Error {
    // SFTP status 2 is no-such-file, 3 is permission-denied
    match e.code() {
        ssh2::ErrorCode::SFTP(2) => Error::SourceNotFound(path.to_string()),
        ssh2::ErrorCode::SFTP(3) => Error::Permission(format!("cannot read {}: {}", path, e)),
        _ => Error::Connection(format!("SFTP error for {}: {}", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_db, test_logger};
    use tempfile::TempDir;

    #[test]
    fn test_acquire_local_file() {
        let db = test_db();
        let (logger, run) = test_logger(&db, "source-file");
        let dir = TempDir::new().unwrap();

        let source = dir.path().join("data.txt");
        fs::write(&source, b"hello backup").unwrap();
        let dest = dir.path().join("staged");
        fs::create_dir(&dest).unwrap();

        let config = JobSource::Local(LocalSourceConfig {
            paths: vec![source.to_str().unwrap().to_string()],
        });
        let staged = acquire(&config, &dest, &logger).unwrap();

        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0], dest.join("data.txt"));
        assert_eq!(fs::read(&staged[0]).unwrap(), b"hello backup");

        logger.flush().unwrap();
        let logs = db.get_run_logs(run.id).unwrap().unwrap();
        assert!(logs.contains("→ Processing file: data.txt"));
    }

    #[test]
    fn test_acquire_local_directory_preserves_structure() {
        let db = test_db();
        let (logger, _run) = test_logger(&db, "source-tree");
        let dir = TempDir::new().unwrap();

        let tree = dir.path().join("site");
        fs::create_dir_all(tree.join("css")).unwrap();
        fs::write(tree.join("index.html"), b"<html>").unwrap();
        fs::write(tree.join("css/main.css"), b"body {}").unwrap();

        let dest = dir.path().join("staged");
        fs::create_dir(&dest).unwrap();

        let config = JobSource::Local(LocalSourceConfig {
            paths: vec![tree.to_str().unwrap().to_string()],
        });
        let staged = acquire(&config, &dest, &logger).unwrap();

        assert_eq!(staged, vec![dest.join("site")]);
        assert_eq!(fs::read(dest.join("site/index.html")).unwrap(), b"<html>");
        assert_eq!(fs::read(dest.join("site/css/main.css")).unwrap(), b"body {}");
    }

    #[test]
    fn test_acquire_missing_path_is_source_not_found() {
        let db = test_db();
        let (logger, _run) = test_logger(&db, "source-missing");
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("staged");
        fs::create_dir(&dest).unwrap();

        let config = JobSource::Local(LocalSourceConfig {
            paths: vec!["/does/not/exist".to_string()],
        });
        let err = acquire(&config, &dest, &logger).unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(_)));
    }

    #[test]
    fn test_acquire_multiple_paths() {
        let db = test_db();
        let (logger, _run) = test_logger(&db, "source-multi");
        let dir = TempDir::new().unwrap();

        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        let dest = dir.path().join("staged");
        fs::create_dir(&dest).unwrap();

        let config = JobSource::Local(LocalSourceConfig {
            paths: vec![
                dir.path().join("a.txt").to_str().unwrap().to_string(),
                dir.path().join("b.txt").to_str().unwrap().to_string(),
            ],
        });
        let staged = acquire(&config, &dest, &logger).unwrap();
        assert_eq!(staged.len(), 2);
        assert!(dest.join("a.txt").exists());
        assert!(dest.join("b.txt").exists());
    }

    #[test]
    fn test_symlink_mode_detection() {
        let link = ssh2::FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(0o120777),
            atime: None,
            mtime: None,
        };
        assert!(is_symlink(&link));

        let file = ssh2::FileStat {
            size: Some(10),
            uid: None,
            gid: None,
            perm: Some(0o100644),
            atime: None,
            mtime: None,
        };
        assert!(!is_symlink(&file));

        let unknown = ssh2::FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: None,
            atime: None,
            mtime: None,
        };
        assert!(!is_symlink(&unknown));
    }
}
