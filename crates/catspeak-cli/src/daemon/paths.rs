//! Where an assistant instance keeps its socket and PID file.
//!
//! The directory is the first of these that is set and non-empty:
//! `CATSPEAK_SOCKET_DIR`, `$XDG_RUNTIME_DIR/catspeak`, `~/.catspeak`, then
//! `catspeak` under the temp dir. Each instance (`CATSPEAK_INSTANCE`,
//! default "default") gets `{dir}/{instance}.sock` and `{dir}/{instance}.pid`,
//! so several assistants can run side by side.

use std::env;
use std::io;
use std::path::PathBuf;

pub const DEFAULT_INSTANCE: &str = "default";

/// Resolved file locations for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    pub dir: PathBuf,
    pub socket: PathBuf,
    pub pid: PathBuf,
}

impl InstancePaths {
    /// Paths of the instance selected by the environment.
    pub fn from_env() -> Self {
        let instance = non_empty_var("CATSPEAK_INSTANCE");
        let dir = resolve_socket_dir(
            non_empty_var("CATSPEAK_SOCKET_DIR"),
            non_empty_var("XDG_RUNTIME_DIR"),
            dirs::home_dir(),
        );
        Self::new(dir, instance.as_deref().unwrap_or(DEFAULT_INSTANCE))
    }

    /// Paths of `instance` under `dir`.
    ///
    /// A name that could escape `dir` is replaced by the default instance.
    pub fn new(dir: PathBuf, instance: &str) -> Self {
        let name = sanitize_instance_name(instance);
        Self {
            socket: dir.join(format!("{}.sock", name)),
            pid: dir.join(format!("{}.pid", name)),
            dir,
        }
    }

    /// Create the directory, readable only by the owner on Unix.
    pub fn ensure_dir(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn resolve_socket_dir(
    explicit: Option<String>,
    runtime_dir: Option<String>,
    home: Option<PathBuf>,
) -> PathBuf {
    if let Some(dir) = explicit {
        return PathBuf::from(dir);
    }
    if let Some(runtime_dir) = runtime_dir {
        return PathBuf::from(runtime_dir).join("catspeak");
    }
    match home {
        Some(home) => home.join(".catspeak"),
        None => env::temp_dir().join("catspeak"),
    }
}

/// ASCII alphanumerics, `-` and `_`, not starting with `-`.
fn sanitize_instance_name(name: &str) -> &str {
    let is_valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if is_valid {
        name
    } else {
        tracing::warn!(
            "Invalid instance name {:?}, using '{}'",
            name,
            DEFAULT_INSTANCE
        );
        DEFAULT_INSTANCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_dir_wins() {
        let dir = resolve_socket_dir(
            Some("/custom/socket/path".into()),
            Some("/run/user/1000".into()),
            Some(PathBuf::from("/home/cat")),
        );
        assert_eq!(dir, PathBuf::from("/custom/socket/path"));
    }

    #[test]
    fn test_runtime_dir_before_home() {
        let dir = resolve_socket_dir(
            None,
            Some("/run/user/1000".into()),
            Some(PathBuf::from("/home/cat")),
        );
        assert_eq!(dir, PathBuf::from("/run/user/1000/catspeak"));
    }

    #[test]
    fn test_home_then_temp_dir() {
        let dir = resolve_socket_dir(None, None, Some(PathBuf::from("/home/cat")));
        assert_eq!(dir, PathBuf::from("/home/cat/.catspeak"));

        let dir = resolve_socket_dir(None, None, None);
        assert_eq!(dir, env::temp_dir().join("catspeak"));
    }

    #[test]
    fn test_instance_file_names() {
        let paths = InstancePaths::new(PathBuf::from("/tmp/test"), "work");
        assert_eq!(paths.socket, PathBuf::from("/tmp/test/work.sock"));
        assert_eq!(paths.pid, PathBuf::from("/tmp/test/work.pid"));
        assert_eq!(paths.dir, PathBuf::from("/tmp/test"));
    }

    #[test]
    fn test_traversal_falls_back_to_default_instance() {
        let paths = InstancePaths::new(PathBuf::from("/tmp/test"), "../../../etc/passwd");
        assert_eq!(paths.socket, PathBuf::from("/tmp/test/default.sock"));
    }

    #[test]
    fn test_sanitize_valid_names() {
        assert_eq!(sanitize_instance_name("default"), "default");
        assert_eq!(sanitize_instance_name("work-2"), "work-2");
        assert_eq!(sanitize_instance_name("_private"), "_private");
    }

    #[test]
    fn test_sanitize_rejects_unsafe_names() {
        for name in ["..", "foo/bar", "", " ", "-rf", "$(whoami)", "a\0b", "喵"] {
            assert_eq!(sanitize_instance_name(name), DEFAULT_INSTANCE, "{:?}", name);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = env::temp_dir().join(format!("catspeak-paths-{}", std::process::id()));
        let paths = InstancePaths::new(dir.join("nested"), "default");
        paths.ensure_dir().expect("create dir");

        let mode = std::fs::metadata(&paths.dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
