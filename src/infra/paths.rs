// src/infra/paths.rs — XDG-compliant path management
//
// All paths respect the PLANCRAFT_HOME environment variable for isolation.
// When PLANCRAFT_HOME is set, config and data live under that directory.
// When unset, config uses ~/.plancraft/ and data uses XDG_DATA_HOME/plancraft.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Returns the PLANCRAFT_HOME override, if set.
fn plancraft_home() -> Option<PathBuf> {
    std::env::var_os("PLANCRAFT_HOME").map(PathBuf::from)
}

/// Home directory, falling back to the working directory when none can be determined.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $PLANCRAFT_HOME/ or ~/.plancraft/
pub fn config_dir() -> PathBuf {
    if let Some(home) = plancraft_home() {
        return home;
    }
    dirs_home().join(".plancraft")
}

/// Data directory: $PLANCRAFT_HOME/data/ or ~/.local/share/plancraft/
pub fn data_dir() -> PathBuf {
    if let Some(home) = plancraft_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "plancraft")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

/// Database path
pub fn db_path() -> PathBuf {
    data_dir().join("plancraft.db")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}
