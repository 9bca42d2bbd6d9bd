//! Filesystem helpers shared by modules for sources and model artifacts.

use std::io;
use std::path::{Path, PathBuf};

use orthos_common::{OrthosError, Result, RunParameters};

use crate::spec::ModuleSpec;

/// Reads a source corpus. A missing file is `MissingSource`.
pub fn read_source(spec: &ModuleSpec, path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => OrthosError::MissingSource {
            module: spec.id.clone(),
            path: path.to_path_buf(),
        },
        io::ErrorKind::PermissionDenied => OrthosError::PermissionDenied(path.to_path_buf()),
        _ => OrthosError::Io(e),
    })
}

/// Reads the file named by option `key`, if any. A stage parameter of the
/// same name takes precedence over the configured option.
pub fn read_option_source(
    spec: &ModuleSpec,
    parameters: &RunParameters,
    key: &str,
) -> Result<Option<String>> {
    let path = match parameters.extra.get(key) {
        Some(path) => Some(path.clone()),
        None => spec.options.str(&spec.id, key)?,
    };
    match path {
        Some(path) => read_source(spec, Path::new(&path)).map(Some),
        None => Ok(None),
    }
}

/// Reads a model artifact. A missing file is `ModelMissing`.
pub fn read_model(spec: &ModuleSpec, path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => OrthosError::ModelMissing {
            module: spec.id.clone(),
            path: path.to_path_buf(),
        },
        io::ErrorKind::PermissionDenied => OrthosError::PermissionDenied(path.to_path_buf()),
        _ => OrthosError::Io(e),
    })
}

/// Fails with `ModelMissing` naming the first declared model that does not exist.
pub fn require_models(spec: &ModuleSpec) -> Result<()> {
    match first_missing(&spec.models) {
        Some(path) => Err(OrthosError::ModelMissing {
            module: spec.id.clone(),
            path,
        }),
        None => Ok(()),
    }
}

/// Fails with `MissingSource` naming the first declared source that does not exist.
pub fn require_sources(spec: &ModuleSpec) -> Result<()> {
    if spec.sources.is_empty() {
        return Err(OrthosError::TrainingFailure {
            module: spec.id.clone(),
            message: "no sources declared".to_string(),
        });
    }
    match first_missing(&spec.sources) {
        Some(path) => Err(OrthosError::MissingSource {
            module: spec.id.clone(),
            path,
        }),
        None => Ok(()),
    }
}

fn first_missing(paths: &[PathBuf]) -> Option<PathBuf> {
    paths.iter().find(|p| !p.exists()).cloned()
}

/// Writes a model artifact, replacing any previous version.
///
/// The content goes to a sibling temporary file first and is renamed into
/// place, so a failed write never leaves a truncated model behind.
pub fn write_model(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| map_write_error(e, parent))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents).map_err(|e| map_write_error(e, &tmp))?;
    std::fs::rename(&tmp, path).map_err(|e| map_write_error(e, path))?;
    Ok(())
}

/// Deletes every declared model artifact. Absent files are skipped.
pub fn remove_models(spec: &ModuleSpec) -> Result<()> {
    for path in &spec.models {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::info!(module = %spec.id, path = %path.display(), "removed model"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(map_write_error(e, path)),
        }
    }
    Ok(())
}

fn map_write_error(err: io::Error, path: &Path) -> OrthosError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => OrthosError::PermissionDenied(path.to_path_buf()),
        _ => OrthosError::Io(err),
    }
}
