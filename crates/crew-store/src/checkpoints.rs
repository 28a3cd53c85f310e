use chrono::{SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crew_core::ids::ConversationId;
use crew_core::state::OrchestrationState;

use crate::database::Database;
use crate::error::StoreError;

/// Listing row for a stored conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub conversation_id: ConversationId,
    pub message_count: u32,
    pub turn_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// Persisted orchestration states keyed by conversation id. Saves are
/// upserts; the last writer wins.
#[derive(Clone)]
pub struct CheckpointRepo {
    db: Database,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl CheckpointRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, state), fields(conversation_id = %state.conversation_id(), messages = state.message_count()))]
    pub fn save(&self, state: &OrchestrationState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        let ts = now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO checkpoints (conversation_id, state, message_count, turn_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(conversation_id) DO UPDATE SET
                    state = excluded.state,
                    message_count = excluded.message_count,
                    turn_count = excluded.turn_count,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    state.conversation_id().as_str(),
                    json,
                    state.message_count() as i64,
                    state.turn_count(),
                    ts,
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn load(&self, id: &ConversationId) -> Result<Option<OrchestrationState>, StoreError> {
        let raw: Option<String> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT state FROM checkpoints WHERE conversation_id = ?1",
                    [id.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| StoreError::CorruptRow {
                table: "checkpoints",
                column: "state",
                detail: format!("invalid state JSON: {e}"),
            })
        })
        .transpose()
    }

    /// Like [`load`](Self::load) but a missing checkpoint is an error.
    pub fn get(&self, id: &ConversationId) -> Result<OrchestrationState, StoreError> {
        self.load(id)?
            .ok_or_else(|| StoreError::NotFound(format!("checkpoint {id}")))
    }

    /// Returns whether a checkpoint was removed.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn delete(&self, id: &ConversationId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM checkpoints WHERE conversation_id = ?1",
                [id.as_str()],
            )?;
            Ok(n > 0)
        })
    }

    /// All checkpoints, most recently updated first.
    pub fn list(&self) -> Result<Vec<CheckpointSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, message_count, turn_count, created_at, updated_at
                 FROM checkpoints ORDER BY updated_at DESC, conversation_id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(CheckpointSummary {
                    conversation_id: ConversationId::from_raw(row.get::<_, String>(0)?),
                    message_count: row.get(1)?,
                    turn_count: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}
