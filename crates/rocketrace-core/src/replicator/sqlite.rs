// Cross-process channel backed by the `sync_log` table.
//
// Every client process opens the same database file. Posting appends a row;
// subscribers poll for rows past their cursor.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use tracing::warn;

use super::{SyncChannel, SyncFrame};
use crate::db::Database;

const READ_BATCH: usize = 64;

pub struct SqliteChannel {
    db: Arc<Database>,
    poll_interval: Duration,
}

impl SqliteChannel {
    pub fn new(db: Arc<Database>, poll_interval: Duration) -> Self {
        Self { db, poll_interval }
    }
}

impl SyncChannel for SqliteChannel {
    fn post(&self, frame: SyncFrame) -> anyhow::Result<()> {
        self.db.append_sync_frame(&frame)
    }

    fn subscribe(&self) -> BoxStream<'static, SyncFrame> {
        let cursor = match self.db.latest_sync_seq() {
            Ok(seq) => seq,
            Err(e) => {
                warn!("Failed to read sync cursor, replaying retained log: {e:#}");
                0
            }
        };
        let db = Arc::clone(&self.db);
        let interval = self.poll_interval;

        stream::unfold(
            (db, cursor, Vec::<(i64, SyncFrame)>::new()),
            move |(db, mut cursor, mut pending)| async move {
                loop {
                    if !pending.is_empty() {
                        let (seq, frame) = pending.remove(0);
                        cursor = seq;
                        return Some((frame, (db, cursor, pending)));
                    }
                    tokio::time::sleep(interval).await;
                    match db.read_sync_frames(cursor, READ_BATCH) {
                        Ok(rows) => pending = rows,
                        Err(e) => warn!("Failed to read sync log: {e:#}"),
                    }
                }
            },
        )
        .boxed()
    }
}
