//! Host clipboard access.

use crate::context::AppContext;
use crate::error::{AppResult, OrFatal};
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn write_text(&self, ctx: &AppContext, text: &str) -> AppResult<()>;
}

/// System clipboard via `arboard`. Each write opens a fresh handle on the
/// blocking pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClipboard;

#[async_trait]
impl Clipboard for SystemClipboard {
    async fn write_text(&self, ctx: &AppContext, text: &str) -> AppResult<()> {
        let text = text.to_string();
        let task = tokio::task::spawn_blocking(move || -> Result<(), arboard::Error> {
            let mut clipboard = arboard::Clipboard::new()?;
            clipboard.set_text(text)
        });

        ctx.run(task)
            .await?
            .or_fatal("Clipboard task failed")?
            .or_fatal("Failed to write to the clipboard")?;
        debug!("Clipboard updated");
        Ok(())
    }
}
