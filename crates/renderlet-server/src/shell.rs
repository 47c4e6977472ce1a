//! Built-in renderer that serves the bundle's app shell.
//!
//! Every route gets `index.html` and the client-side app takes over from
//! there. The file is read when the renderer is created and again on reload.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use renderlet::{
    RenderError, RenderedPage, Renderer, RendererFactory, RendererOptions, RequestInfo,
};
use tokio::sync::RwLock;

const INDEX_FILE: &str = "index.html";

pub struct ShellRendererFactory;

#[async_trait::async_trait]
impl RendererFactory for ShellRendererFactory {
    async fn create(
        &self,
        dist_path: &Path,
        options: &RendererOptions,
    ) -> anyhow::Result<Arc<dyn Renderer>> {
        let renderer = ShellRenderer::new(dist_path.join(INDEX_FILE));
        match renderer.reload().await {
            Ok(()) => {}
            Err(e) if options.resilient => {
                tracing::warn!(error = %e, "App shell unreadable, continuing")
            }
            Err(e) => return Err(e),
        }
        Ok(Arc::new(renderer))
    }
}

pub struct ShellRenderer {
    index_path: PathBuf,
    shell: RwLock<Option<String>>,
}

impl ShellRenderer {
    fn new(index_path: PathBuf) -> Self {
        Self {
            index_path,
            shell: RwLock::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Renderer for ShellRenderer {
    async fn render(&self, _request: &RequestInfo) -> Result<RenderedPage, RenderError> {
        match &*self.shell.read().await {
            Some(html) => Ok(RenderedPage::ok(html.clone())),
            None => Err(RenderError::not_found("<h1>Not Found</h1>")),
        }
    }

    async fn reload(&self) -> anyhow::Result<()> {
        let shell = match tokio::fs::read_to_string(&self.index_path).await {
            Ok(html) => Some(html),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.index_path.display(), "No app shell in bundle");
                None
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("reading {}", self.index_path.display())));
            }
        };
        *self.shell.write().await = shell;
        Ok(())
    }
}
