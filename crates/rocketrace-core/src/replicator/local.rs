// In-process channel: every subscriber sees every frame.

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tracing::warn;

use super::{SyncChannel, SyncFrame};

pub struct LocalHub {
    tx: broadcast::Sender<SyncFrame>,
}

impl LocalHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl SyncChannel for LocalHub {
    fn post(&self, frame: SyncFrame) -> anyhow::Result<()> {
        // No receivers is not an error: there is simply nobody to tell.
        let _ = self.tx.send(frame);
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, SyncFrame> {
        let rx = self.tx.subscribe();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => return Some((frame, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "sync subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
