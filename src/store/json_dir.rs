use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use super::{Backend, Namespace};

const SNAPSHOT_SUFFIX: &str = ".json";
const TEMP_FILE_SUFFIX: &str = ".tmp";

/// One JSON file per namespace inside a data directory.
pub struct JsonDirBackend {
    dir: PathBuf,
}

impl JsonDirBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating data dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, ns: Namespace) -> PathBuf {
        self.dir
            .join(format!("{}{}", ns.as_str(), SNAPSHOT_SUFFIX))
    }
}

// Temp names are unique so two writers never share a half-written file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = PathBuf::from(format!(
        "{}.{}{}",
        path.display(),
        Uuid::new_v4().simple(),
        TEMP_FILE_SUFFIX
    ));
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("replacing {}", path.display()));
    }
    Ok(())
}

impl Backend for JsonDirBackend {
    fn read(&self, ns: Namespace) -> Result<Option<String>> {
        let path = self.path_for(ns);
        match fs::read(&path) {
            // Undecodable bytes are left for the JSON parser to reject.
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn write(&self, ns: Namespace, snapshot: &str) -> Result<()> {
        write_atomic(&self.path_for(ns), snapshot.as_bytes())
    }

    fn describe(&self) -> String {
        format!("json files in {}", self.dir.display())
    }
}
