use std::path::{Path, PathBuf};

use deploydb_core::config::config_dir_at;

pub const DAEMON_LABEL: &str = "dev.deploydb.daemon";
pub const DAEMON_SOCKET: &str = "deploydb.sock";

/// `<home>/.deploydb/deploydb.sock`, next to `config.yaml`.
pub fn socket_path(home: &Path) -> PathBuf {
    config_dir_at(home).join(DAEMON_SOCKET)
}
