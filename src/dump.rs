use crate::prelude::*;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Appends raw device payloads to one file per topic, for offline analysis.
#[derive(Debug, Clone)]
pub struct MessageDumper {
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
    messages_written: Arc<Mutex<u64>>,
}

impl MessageDumper {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            lock: Arc::new(Mutex::new(())),
            messages_written: Arc::new(Mutex::new(0)),
        }
    }

    /// `c/33/QMN123` dumps to `<dir>/c_33_QMN123.bin`.
    pub fn path_for(&self, topic: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", topic.replace('/', "_")))
    }

    pub fn dump(&self, topic: &str, payload: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(topic);

        // one writer at a time so concurrent payloads for a topic don't interleave
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("Failed to lock message dump"))?;

        std::fs::create_dir_all(&self.dir)
            .map_err(|err| crate::file_error_with_source!(err, "creating {}", self.dir.display()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| crate::file_error_with_source!(err, "opening {}", path.display()))?;

        file.write_all(payload)?;
        file.write_all(b"\n")?;
        file.flush()?;

        if let Ok(mut written) = self.messages_written.lock() {
            *written += 1;
            debug!("dumped {} bytes to {} ({} total)", payload.len(), path.display(), *written);
        }

        Ok(path)
    }

    pub fn messages_written(&self) -> u64 {
        self.messages_written.lock().map(|w| *w).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_appends_with_newline() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dumper = MessageDumper::new(dir.path());

        dumper.dump("c/33/QMN000001", &[1, 2, 3])?;
        let path = dumper.dump("c/33/QMN000001", &[4])?;

        assert_eq!(path, dir.path().join("c_33_QMN000001.bin"));
        assert_eq!(std::fs::read(&path)?, vec![1, 2, 3, b'\n', 4, b'\n']);
        assert_eq!(dumper.messages_written(), 2);

        Ok(())
    }

    #[test]
    fn test_dump_creates_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dumper = MessageDumper::new(dir.path().join("nested/dump"));

        let path = dumper.dump("c/1/0PVP000001", b"x")?;

        assert!(path.exists());
        Ok(())
    }
}
