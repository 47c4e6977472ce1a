//! Directory-backed page cache shared by all worker processes.
//!
//! One file per request path, named by the hex encoding of the path. Writes
//! go to a temporary file first and are renamed into place, so concurrent
//! readers in other workers never see a partial page.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use renderlet::{Cache, CacheError, RequestInfo, ResponseInfo};

pub struct FsCache {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FsCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, path: &str) -> PathBuf {
        self.root.join(encode_key(path))
    }
}

fn encode_key(path: &str) -> String {
    path.bytes().map(|b| format!("{b:02x}")).collect()
}

#[async_trait::async_trait]
impl Cache for FsCache {
    async fn fetch(&self, path: &str, _request: &RequestInfo) -> Result<Option<Bytes>, CacheError> {
        match tokio::fs::read(self.entry_path(path)).await {
            Ok(body) => Ok(Some(Bytes::from(body))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        path: &str,
        body: Bytes,
        _response: &ResponseInfo,
    ) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(format!(".tmp-{}-{n}", std::process::id()));
        let written = match tokio::fs::write(&tmp, &body).await {
            Ok(()) => tokio::fs::rename(&tmp, self.entry_path(path)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}
