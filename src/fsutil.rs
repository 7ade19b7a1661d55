use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use crate::container::ContainerDefinition;

/// Error that occurs when opening a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to open file `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    FileOpen(#[from] FileOpenError),
    #[error("failed to parse container definitions in `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Opens a file at the given path and wraps it in a [`BufReader`].
///
/// # Errors
///
/// Returns a [`FileOpenError`] if the file cannot be opened.
///
/// # Example
/// ```no_run
/// # use gadget_resolver::fsutil;
/// let reader = fsutil::open_file_reader("/some/file.txt")?;
/// # Ok::<(), fsutil::FileOpenError>(())
/// ```
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileOpenError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Reads a JSON array of [`ContainerDefinition`]s.
///
/// # Errors
///
/// - [`LoadError::FileOpen`] if the file can't be opened.
/// - [`LoadError::Parse`] if the content is not a valid list of definitions.
pub fn load_container_definitions(
    path: impl AsRef<Path>,
) -> Result<Vec<ContainerDefinition>, LoadError> {
    let path = path.as_ref();
    let reader = open_file_reader(path)?;
    serde_json::from_reader(reader).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
