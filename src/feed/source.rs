use std::future::Future;

use tokio::task::JoinHandle;

use super::auth::AuthSession;
use super::buffer::TickBuffer;
use crate::error::FeedError;
use crate::models::Tick;

/// Upstream that can deliver ticks for one instrument
#[allow(async_fn_in_trait)]
pub trait TickSource {
    fn name(&self) -> &str;

    async fn open(&mut self, session: &AuthSession) -> Result<(), FeedError>;

    /// Start pushing ticks into `buffer`
    ///
    /// Returns `StreamingUnsupported` when the source can only be polled.
    async fn subscribe(&mut self, symbol: &str, buffer: TickBuffer) -> Result<StreamHandle, FeedError>;

    /// Fetch the latest quote on demand
    async fn poll(&mut self, symbol: &str) -> Result<Tick, FeedError>;

    async fn close(&mut self);
}

/// Owner of a background streaming task
///
/// Dropping the handle aborts the task.
#[derive(Debug, Default)]
pub struct StreamHandle {
    task: Option<JoinHandle<()>>,
    external: bool,
}

impl StreamHandle {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(future)),
            external: false,
        }
    }

    /// Stream driven by the caller rather than a task of its own
    pub fn external() -> Self {
        Self {
            task: None,
            external: true,
        }
    }

    pub fn is_alive(&self) -> bool {
        match &self.task {
            Some(task) => !task.is_finished(),
            None => self.external,
        }
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.external = false;
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
