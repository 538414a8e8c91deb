//! Host filesystem access used by the orchestrator and lifecycle states.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;

use crate::error::PcfDevError;

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait HostFs {
    async fn exists(&self, path: &Path) -> Result<bool, PcfDevError>;
    async fn read(&self, path: &Path) -> Result<Vec<u8>, PcfDevError>;
    /// Write `contents`, creating parent directories. `append` keeps existing bytes.
    async fn write(&self, path: &Path, contents: &[u8], append: bool) -> Result<(), PcfDevError>;
    /// Remove a file or a whole directory tree. Missing paths are not an error.
    async fn remove(&self, path: &Path) -> Result<(), PcfDevError>;
    async fn chmod(&self, path: &Path, mode: u32) -> Result<(), PcfDevError>;
    /// Extract the first member of `archive` whose name matches `pattern` to `dest`.
    async fn extract(&self, archive: &Path, dest: &Path, pattern: &str)
    -> Result<(), PcfDevError>;
}

/// Pick the first archive member whose file name matches the glob `pattern`.
pub fn matching_member<'a>(
    listing: &'a str,
    pattern: &str,
) -> Result<Option<&'a str>, PcfDevError> {
    let pattern = glob::Pattern::new(pattern)
        .map_err(|e| PcfDevError::validation(format!("invalid member pattern {pattern}: {e}")))?;
    Ok(listing.lines().find(|line| {
        let base = line.rsplit('/').next().unwrap_or(line);
        pattern.matches(base)
    }))
}

fn io_err(context: String) -> impl FnOnce(std::io::Error) -> PcfDevError {
    move |source| PcfDevError::Io { context, source }
}

pub struct LocalFs;

impl HostFs for LocalFs {
    async fn exists(&self, path: &Path) -> Result<bool, PcfDevError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(io_err(format!("checking {}", path.display())))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, PcfDevError> {
        tokio::fs::read(path)
            .await
            .map_err(io_err(format!("reading {}", path.display())))
    }

    async fn write(&self, path: &Path, contents: &[u8], append: bool) -> Result<(), PcfDevError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(format!("creating directory {}", parent.display())))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .await
            .map_err(io_err(format!("opening {}", path.display())))?;
        file.write_all(contents)
            .await
            .map_err(io_err(format!("writing {}", path.display())))?;
        file.flush()
            .await
            .map_err(io_err(format!("writing {}", path.display())))
    }

    async fn remove(&self, path: &Path) -> Result<(), PcfDevError> {
        let result = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PcfDevError::Io {
                context: format!("removing {}", path.display()),
                source: e,
            }),
        }
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<(), PcfDevError> {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(io_err(format!("setting permissions on {}", path.display())))
    }

    async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        pattern: &str,
    ) -> Result<(), PcfDevError> {
        let listing = tokio::process::Command::new("tar")
            .arg("-tf")
            .arg(archive)
            .output()
            .await
            .map_err(io_err("running tar".into()))?;
        if !listing.status.success() {
            return Err(PcfDevError::ExternalCommand {
                command: "tar".into(),
                message: String::from_utf8_lossy(&listing.stderr).trim().to_string(),
            });
        }

        let listing = String::from_utf8_lossy(&listing.stdout);
        let member = matching_member(&listing, pattern)?
            .ok_or_else(|| PcfDevError::ExternalCommand {
                command: "tar".into(),
                message: format!("no member matching {pattern} in {}", archive.display()),
            })?
            .to_string();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(format!("creating directory {}", parent.display())))?;
        }
        let out = std::fs::File::create(dest)
            .map_err(io_err(format!("creating {}", dest.display())))?;

        let status = tokio::process::Command::new("tar")
            .arg("-xOf")
            .arg(archive)
            .arg(&member)
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(io_err("running tar".into()))?;
        if !status.status.success() {
            return Err(PcfDevError::ExternalCommand {
                command: "tar".into(),
                message: String::from_utf8_lossy(&status.stderr).trim().to_string(),
            });
        }

        tracing::info!(member = %member, dest = %dest.display(), "extracted disk from image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_is_picked_by_file_name() {
        let listing = "pcfdev.ovf\npcfdev.mf\nimages/pcfdev-disk1.vmdk\n";
        assert_eq!(
            matching_member(listing, "*.vmdk").unwrap(),
            Some("images/pcfdev-disk1.vmdk")
        );
        assert_eq!(matching_member(listing, "disk?.vmdk").unwrap(), None);
        assert_eq!(
            matching_member("disk10.vmdk\ndisk1.vmdk", "disk?.vmdk").unwrap(),
            Some("disk1.vmdk")
        );
    }

    #[test]
    fn malformed_member_pattern_is_rejected() {
        let err = matching_member("disk1.vmdk", "[disk").unwrap_err();
        assert!(err.to_string().contains("invalid member pattern"));
    }

    #[tokio::test]
    async fn write_append_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file");
        let fs = LocalFs;

        fs.write(&path, b"some-", false).await.unwrap();
        fs.write(&path, b"contents", true).await.unwrap();
        assert_eq!(fs.read(&path).await.unwrap(), b"some-contents");

        fs.write(&path, b"new", false).await.unwrap();
        assert_eq!(fs.read(&path).await.unwrap(), b"new");

        fs.remove(&dir.path().join("nested")).await.unwrap();
        assert!(!fs.exists(&path).await.unwrap());
        fs.remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn chmod_sets_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        let fs = LocalFs;

        fs.write(&path, b"key", false).await.unwrap();
        fs.chmod(&path, 0o600).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
