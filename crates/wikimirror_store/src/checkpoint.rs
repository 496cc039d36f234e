//! Per-stream checkpoint persistence.
//!
//! Each change stream has its own row in `checkpoints`. A checkpoint is
//! only committed after the writes of the batch it covers have been
//! committed, so a crash in between merely replays idempotent writes.

use crate::error::{StoreError, StoreResult};
use crate::mirror::Mirror;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use wikimirror_protocol::{format_timestamp, parse_timestamp, Checkpoint, Position, StreamKind};

/// Durable storage of stream checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// Loads the checkpoint of a stream.
    ///
    /// # Errors
    ///
    /// Returns `CorruptCheckpoint` if the stored row cannot be decoded.
    fn load(&self, stream: StreamKind) -> StoreResult<Option<Checkpoint>>;

    /// Durably records a checkpoint. Committing the stored value again
    /// writes nothing.
    fn commit(&self, checkpoint: &Checkpoint) -> StoreResult<()>;

    /// Forgets the checkpoint of a stream; the stream restarts from the
    /// beginning of its feed.
    fn reset(&self, stream: StreamKind) -> StoreResult<()>;

    /// Returns every stored checkpoint, ordered by stream name.
    fn all(&self) -> StoreResult<Vec<Checkpoint>>;
}

type StoredCheckpoint = (String, String, i64, Option<String>);

impl CheckpointStore for Mirror {
    fn load(&self, stream: StreamKind) -> StoreResult<Option<Checkpoint>> {
        self.read(|conn| load_stored(conn, stream)?.map(decode).transpose())
    }

    fn commit(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        let record_id = i64::try_from(checkpoint.position.id).map_err(|_| {
            StoreError::invalid_data(format!(
                "checkpoint id {} out of range",
                checkpoint.position.id
            ))
        })?;
        let timestamp = format_timestamp(&checkpoint.position.timestamp);
        self.write(|tx| {
            let stored = load_stored(tx, checkpoint.stream)?;
            if let Some((_, ts, id, continuation)) = &stored {
                if *ts == timestamp && *id == record_id && *continuation == checkpoint.continuation
                {
                    return Ok(());
                }
            }
            tx.execute(
                "INSERT OR REPLACE INTO checkpoints (stream, timestamp, record_id, continuation) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    checkpoint.stream.as_str(),
                    timestamp,
                    record_id,
                    checkpoint.continuation
                ],
            )?;
            debug!(
                stream = %checkpoint.stream,
                position = %checkpoint.position,
                continued = checkpoint.continuation.is_some(),
                "checkpoint committed"
            );
            Ok(())
        })
    }

    fn reset(&self, stream: StreamKind) -> StoreResult<()> {
        debug!(stream = %stream, "checkpoint reset");
        self.write(|tx| {
            tx.execute(
                "DELETE FROM checkpoints WHERE stream = ?1",
                params![stream.as_str()],
            )?;
            Ok(())
        })
    }

    fn all(&self) -> StoreResult<Vec<Checkpoint>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT stream, timestamp, record_id, continuation FROM checkpoints ORDER BY stream",
            )?;
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
                .collect::<Result<Vec<StoredCheckpoint>, _>>()?;
            let mut checkpoints = Vec::with_capacity(rows.len());
            for row in rows {
                // rows of unknown streams belong to a newer version
                if row.0.parse::<StreamKind>().is_ok() {
                    checkpoints.push(decode(row)?);
                }
            }
            Ok(checkpoints)
        })
    }
}

fn load_stored(conn: &Connection, stream: StreamKind) -> StoreResult<Option<StoredCheckpoint>> {
    Ok(conn
        .query_row(
            "SELECT stream, timestamp, record_id, continuation FROM checkpoints WHERE stream = ?1",
            params![stream.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?)
}

fn decode((stream, timestamp, record_id, continuation): StoredCheckpoint) -> StoreResult<Checkpoint> {
    let stream: StreamKind = stream.parse().map_err(|_| StoreError::InvalidData {
        message: format!("unknown checkpoint stream {stream:?}"),
    })?;
    let corrupt = |reason: String| StoreError::CorruptCheckpoint { stream, reason };
    let timestamp =
        parse_timestamp(&timestamp).map_err(|_| corrupt(format!("bad timestamp {timestamp:?}")))?;
    let id = u64::try_from(record_id).map_err(|_| corrupt(format!("bad record id {record_id}")))?;
    if continuation.as_deref() == Some("") {
        return Err(corrupt("empty continuation token".to_string()));
    }
    Ok(Checkpoint::new(stream, Position::new(timestamp, id)).with_continuation(continuation))
}
