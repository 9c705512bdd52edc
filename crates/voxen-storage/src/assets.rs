//! Filesystem assets kept next to a world's database: panorama images and
//! copied plugin artifacts.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::source::{Panorama, PluginReference, PANORAMA_SIZE};

/// Subdirectory receiving copied plugin artifacts.
pub const PLUGINS_DIR: &str = "plugins";

/// Write each image as `Panorama<i>.png`, replacing files atomically.
pub fn write_panorama(dir: &Path, panorama: &Panorama) -> Result<()> {
    for (index, image) in panorama.images().iter().enumerate() {
        let path = dir.join(Panorama::file_name(index));
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, image)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| StorageError::io(format!("write {}", path.display()), e))?;
    }
    debug!("stored panorama in {}", dir.display());
    Ok(())
}

/// Read all panorama images. Any missing file means no panorama.
pub fn read_panorama(dir: &Path) -> Result<Option<Panorama>> {
    let mut images = Vec::with_capacity(PANORAMA_SIZE);
    for index in 0..PANORAMA_SIZE {
        let path = dir.join(Panorama::file_name(index));
        match fs::read(&path) {
            Ok(bytes) => images.push(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(format!("read {}", path.display()), e)),
        }
    }
    Ok(Panorama::new(images))
}

/// Copy plugin artifacts into `<dir>/plugins`. Returns the copied paths.
pub fn copy_plugins(dir: &Path, plugins: &[PluginReference]) -> Result<Vec<PathBuf>> {
    let target = dir.join(PLUGINS_DIR);
    fs::create_dir_all(&target)
        .map_err(|e| StorageError::init_caused(format!("create {}", target.display()), e))?;

    let mut copied = Vec::new();
    for plugin in plugins {
        let Some(src) = &plugin.artifact else {
            continue;
        };
        let name = src.file_name().ok_or_else(|| {
            StorageError::init(format!(
                "plugin {} artifact {} has no file name",
                plugin.id,
                src.display()
            ))
        })?;
        let dest = target.join(name);
        fs::copy(src, &dest).map_err(|e| {
            StorageError::init_caused(format!("copy plugin {} from {}", plugin.id, src.display()), e)
        })?;
        info!("copied plugin {} {} to {}", plugin.id, plugin.version, dest.display());
        copied.push(dest);
    }
    Ok(copied)
}

/// Copy plugin artifacts, then run `commit`. A failed copy skips `commit`,
/// so a world is never recorded as initialized without its plugin files.
pub fn copy_plugins_then<T>(
    dir: &Path,
    plugins: &[PluginReference],
    commit: impl FnOnce() -> Result<T>,
) -> Result<(Vec<PathBuf>, T)> {
    let copied = copy_plugins(dir, plugins)?;
    let committed = commit()?;
    Ok((copied, committed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("voxen_assets_{}", rand::random::<u64>()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn panorama() -> Panorama {
        Panorama::new((0..PANORAMA_SIZE as u8).map(|i| vec![0x89, b'P', i]).collect()).unwrap()
    }

    #[test]
    fn panorama_round_trip() {
        let dir = temp_dir();
        assert!(read_panorama(&dir).unwrap().is_none());
        write_panorama(&dir, &panorama()).unwrap();
        assert!(dir.join("Panorama0.png").exists());
        assert!(dir.join("Panorama5.png").exists());
        assert_eq!(read_panorama(&dir).unwrap(), Some(panorama()));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn partial_panorama_is_absent() {
        let dir = temp_dir();
        write_panorama(&dir, &panorama()).unwrap();
        fs::remove_file(dir.join("Panorama3.png")).unwrap();
        assert!(read_panorama(&dir).unwrap().is_none());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn copies_only_plugins_with_artifacts() {
        let dir = temp_dir();
        let src = dir.join("farming.wasm");
        fs::write(&src, b"\0asm").unwrap();
        let plugins = [
            PluginReference::new("farming", "1.2").with_artifact(&src),
            PluginReference::new("core", "1.0"),
        ];
        let copied = copy_plugins(&dir, &plugins).unwrap();
        assert_eq!(copied, vec![dir.join(PLUGINS_DIR).join("farming.wasm")]);
        assert_eq!(fs::read(&copied[0]).unwrap(), b"\0asm");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn failed_copy_skips_commit() {
        let dir = temp_dir();
        let plugins = [PluginReference::new("ghost", "1").with_artifact(dir.join("nope.wasm"))];
        let mut committed = false;
        let result = copy_plugins_then(&dir, &plugins, || {
            committed = true;
            Ok(())
        });
        assert!(matches!(result, Err(StorageError::Init { .. })));
        assert!(!committed);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn commit_runs_after_copy() {
        let dir = temp_dir();
        let src = dir.join("core.wasm");
        fs::write(&src, b"\0asm").unwrap();
        let plugins = [PluginReference::new("core", "1.0").with_artifact(&src)];
        let dest = dir.join(PLUGINS_DIR).join("core.wasm");
        let (copied, seen) = copy_plugins_then(&dir, &plugins, || Ok(dest.exists())).unwrap();
        assert!(seen, "artifact must be in place before the commit");
        assert_eq!(copied, vec![dest.clone()]);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_artifact_fails_init() {
        let dir = temp_dir();
        let plugins = [PluginReference::new("ghost", "1").with_artifact(dir.join("nope.wasm"))];
        let err = copy_plugins(&dir, &plugins).unwrap_err();
        assert!(matches!(err, StorageError::Init { .. }));
        fs::remove_dir_all(&dir).ok();
    }
}
