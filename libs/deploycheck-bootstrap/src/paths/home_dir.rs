use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Errors for resolving the working home directory
#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("neither HOME nor USERPROFILE is set")]
    UserHomeMissing,
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn user_home() -> Result<PathBuf, HomeDirError> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or(HomeDirError::UserHomeMissing)
}

fn expand_tilde(raw: &str) -> Result<PathBuf, HomeDirError> {
    if raw == "~" {
        return user_home();
    }
    match raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        Some(rest) => Ok(user_home()?.join(rest)),
        None => Ok(PathBuf::from(raw)),
    }
}

/// Resolve the directory that holds log files and other run artifacts.
///
/// A configured value may start with `~`; after expansion it must be absolute.
/// Without a configured value the directory is `<user home>/<default_subdir>`.
/// When `create` is set the directory is created if missing.
pub fn resolve_home_dir(
    configured: Option<&str>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            let expanded = expand_tilde(raw)?;
            if !expanded.is_absolute() {
                return Err(HomeDirError::AbsoluteRequired(
                    expanded.to_string_lossy().into_owned(),
                ));
            }
            expanded
        }
        None => user_home()?.join(default_subdir),
    };

    if create {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}

/// Resolve `file` against `base_dir` unless it is already absolute.
pub fn resolve_under(base_dir: &Path, file: &str) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn absolute_path_is_kept() {
        let tmp = tempdir().unwrap();
        let abs = tmp.path().join("runs");

        let resolved =
            resolve_home_dir(Some(abs.to_string_lossy().as_ref()), ".deploycheck", false).unwrap();

        assert_eq!(resolved, abs);
        assert!(!resolved.exists());
    }

    #[test]
    fn relative_path_is_rejected() {
        let err = resolve_home_dir(Some("relative/dir"), ".deploycheck", false).unwrap_err();
        assert!(
            matches!(err, HomeDirError::AbsoluteRequired(ref p) if p.contains("relative")),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn directory_is_created_on_request() {
        let tmp = tempdir().unwrap();
        let target = tmp.path().join("a").join("b");

        let resolved =
            resolve_home_dir(Some(target.to_string_lossy().as_ref()), ".deploycheck", true)
                .unwrap();

        assert!(resolved.is_dir());
    }

    #[test]
    fn blank_value_falls_back_to_default_subdir() {
        // Only meaningful where a user home is known.
        if user_home().is_err() {
            return;
        }
        let resolved = resolve_home_dir(Some("   "), ".deploycheck", false).unwrap();
        assert!(resolved.ends_with(".deploycheck"));
    }

    #[test]
    fn resolve_under_keeps_absolute_files() {
        let tmp = tempdir().unwrap();
        let abs = tmp.path().join("x.log");
        assert_eq!(resolve_under(Path::new("/base"), abs.to_str().unwrap()), abs);
        assert_eq!(
            resolve_under(Path::new("/base"), "logs/x.log"),
            Path::new("/base").join("logs/x.log")
        );
    }
}
