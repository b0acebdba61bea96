use std::path::{Path, PathBuf};

use dirsync_core::config::dirsync_root;

pub const DAEMON_SOCKET: &str = "dirsync.sock";

/// `<home>/.dirsync/dirsync.sock`
pub fn socket_path(home: &Path) -> PathBuf {
    dirsync_root(home).join(DAEMON_SOCKET)
}
