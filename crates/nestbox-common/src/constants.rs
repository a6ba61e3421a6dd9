//! System-wide constants and default paths.

use std::path::PathBuf;

/// Directory used for the control socket when `$TMPDIR` is unset or empty.
pub const DEFAULT_SOCKET_DIR: &str = "/tmp";

/// Environment variable naming the temp directory that holds the socket.
pub const TMPDIR_ENV: &str = "TMPDIR";

/// File name of the daemon's control socket inside the socket directory.
pub const SOCKET_FILE: &str = "nestbox.sock";

/// File name of the detached daemon's log inside the socket directory.
pub const LOG_FILE: &str = "nestboxd.log";

/// Pending connection queue length of the control socket.
pub const SOCKET_BACKLOG: i32 = 16;

/// Largest message body accepted on the control socket, in bytes.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Number of forced unmount attempts per mount point during teardown.
pub const DEFAULT_UNMOUNT_RETRIES: u32 = 10;

/// Process name the daemon assumes after detaching.
pub const DAEMON_PROCESS_NAME: &str = "nestboxd";

/// Environment variable that must be empty when the daemon starts.
pub const PRELOAD_ENV: &str = "LD_PRELOAD";

/// Init command used when a creation request carries an empty argv.
pub const DEFAULT_INIT_COMMAND: [&str; 3] = ["/bin/sh", "-c", "while :;do /bin/sleep 100s;done"];

/// Pseudo-filesystems mounted under every container root, in unmount order.
pub const BASE_MOUNTS: [&str; 3] = ["sys", "dev", "proc"];

/// Resolves the directory that holds the control socket.
///
/// Follows `$TMPDIR` so that hosts with a non-standard temp directory
/// (Termux, sandboxes) agree on the socket location without configuration.
pub fn socket_dir() -> PathBuf {
    match std::env::var_os(TMPDIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_SOCKET_DIR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_init_command_is_a_shell_loop() {
        assert_eq!(DEFAULT_INIT_COMMAND[0], "/bin/sh");
        assert_eq!(DEFAULT_INIT_COMMAND[1], "-c");
    }

    #[test]
    fn base_mounts_are_relative_names() {
        assert!(BASE_MOUNTS.iter().all(|m| !m.starts_with('/')));
    }
}
