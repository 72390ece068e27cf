//! Default filesystem locations

use std::path::PathBuf;

/// Base data directory: `~/.local/share/packrat` on Linux
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("packrat")
}

/// Scratch space for in-flight run workspaces
pub fn staging_dir() -> PathBuf {
    data_dir().join("staging")
}

/// Default root for local archive copies, used when no override is configured
pub fn default_archive_root() -> PathBuf {
    data_dir().join("archives")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_nest_under_data_dir() {
        assert!(staging_dir().starts_with(data_dir()));
        assert!(default_archive_root().starts_with(data_dir()));
        assert!(staging_dir().ends_with("packrat/staging"));
    }
}
