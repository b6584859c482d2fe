//! Upserting a profile into a credentials file with atomic replacement.

use super::parser::{self, Profile};
use crate::error::{AppError, AppResult, OrFatal};
use crate::plumbing::AwsCredentials;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// `$AWS_SHARED_CREDENTIALS_FILE`, else `~/.aws/credentials`.
pub fn default_credentials_path() -> AppResult<PathBuf> {
    if let Some(path) = std::env::var_os("AWS_SHARED_CREDENTIALS_FILE") {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".aws").join("credentials"))
        .ok_or_else(|| AppError::fatal(anyhow::anyhow!("Cannot determine home directory")))
}

/// Lexical path normalization: drops `.`, resolves `..` against preceding
/// components and collapses separators. Does not touch the filesystem.
pub fn clean_path(raw: &str) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last().copied() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Writes `creds` into `profile_name` of the file at `path`.
///
/// A missing file is created with just that profile. Otherwise the file is
/// parsed, the profile upserted (other profiles untouched, new profiles
/// appended) and the whole file atomically replaced.
pub fn write_profile_credentials(
    path: &Path,
    profile_name: &str,
    creds: &AwsCredentials,
) -> AppResult<()> {
    let contents = if path.exists() {
        let existing = std::fs::read_to_string(path)
            .or_fatal(format!("Failed to read {}", path.display()))?;
        let mut profiles = parser::parse(&existing)?;

        match profiles.iter_mut().find(|p| p.name == profile_name) {
            Some(profile) => profile.apply_credentials(creds),
            None => profiles.push(new_profile(profile_name, creds)),
        }
        parser::serialize(&profiles)
    } else {
        let mut single = parser::serialize(&[new_profile(profile_name, creds)]);
        // A fresh file holds one profile without the trailing separator
        single.pop();
        single
    };

    replace_atomically(path, &contents)?;
    debug!(path = %path.display(), profile = %profile_name, "Credentials written");
    Ok(())
}

fn new_profile(name: &str, creds: &AwsCredentials) -> Profile {
    let mut profile = Profile::new(name);
    profile.apply_credentials(creds);
    profile
}

/// Sibling temp file, fsync, then rename over the target. The temp file is
/// created with mode 0600.
fn replace_atomically(path: &Path, contents: &str) -> AppResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).or_fatal(format!("Failed to create {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(&dir)
        .or_fatal(format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())
        .or_fatal("Failed to write credentials")?;
    tmp.as_file()
        .sync_all()
        .or_fatal("Failed to sync credentials")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .or_fatal("Failed to set credentials file mode")?;
    }

    tmp.persist(path)
        .map_err(|e| e.error)
        .or_fatal(format!("Failed to replace {}", path.display()))?;
    Ok(())
}
