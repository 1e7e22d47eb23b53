//! SQLite persistence for clients, experiments, and webhook registrations.
//!
//! ## Responsibility
//! Own the database schema and expose the narrow set of operations the
//! service needs: client registration and lookup, append-only experiment
//! recording, and webhook registration/lookup.
//!
//! ## Guarantees
//! - Every operation acquires its own connection and releases it on all
//!   exit paths; no session outlives a single call.
//! - Each experiment insert is its own transaction: a failure for proposal
//!   N never rolls back proposal N-1.
//! - The experiments table is append-only; nothing here updates or deletes
//!   rows.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::PipelineError;

/// Handle to the service database.
///
/// Holds only the path; connections are scoped to individual operations.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

/// A registered client, as read from the `clients` table.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// Row id.
    pub id: i64,
    /// Client display name.
    pub name: String,
    /// Business domain the client registered under.
    pub domain: String,
    /// Static API key presented as a bearer token.
    pub api_key: String,
    /// Registration time (UTC).
    pub created_at: NaiveDateTime,
    /// Inactive clients fail authentication.
    pub is_active: bool,
}

/// A webhook registration, as read from the `webhooks` table.
#[derive(Debug, Clone)]
pub struct WebhookRecord {
    /// Row id.
    pub id: i64,
    /// Owning client.
    pub client_id: i64,
    /// URL notified on new recommendations.
    pub webhook_url: String,
    /// Comma-separated event kinds the client opted into.
    pub event_types: String,
}

impl Store {
    /// Open (or create) the database at `path` and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] if the database cannot be opened
    /// or the schema cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let store = Self {
            db_path: path.into(),
        };
        store.conn()?;
        Ok(store)
    }

    /// Acquire a fresh connection with the schema ensured.
    fn conn(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS clients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                domain TEXT NOT NULL,
                api_key TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS experiments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL,
                hypothesis TEXT NOT NULL,
                intervention_kind TEXT NOT NULL,
                status TEXT NOT NULL,
                results TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS webhooks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL,
                webhook_url TEXT NOT NULL,
                event_types TEXT NOT NULL DEFAULT 'all',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_clients_api_key ON clients(api_key);
            CREATE INDEX IF NOT EXISTS idx_experiments_client ON experiments(client_id);
            ",
        )?;
        Ok(conn)
    }

    /// Register a new client and mint its API key.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] on any database failure.
    pub fn register_client(
        &self,
        name: &str,
        domain: &str,
    ) -> Result<ClientRecord, PipelineError> {
        let api_key = mint_api_key();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO clients (name, domain, api_key) VALUES (?1, ?2, ?3)",
            params![name, domain, api_key],
        )?;
        let id = conn.last_insert_rowid();

        self.client_by_api_key(&api_key)?
            .ok_or_else(|| PipelineError::Other(format!("client {id} vanished after insert")))
    }

    /// Look up an active client by its API key.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] on any database failure. An
    /// unknown key is `Ok(None)`, not an error.
    pub fn client_by_api_key(&self, api_key: &str) -> Result<Option<ClientRecord>, PipelineError> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT id, name, domain, api_key, created_at, is_active
                 FROM clients WHERE api_key = ?1 AND is_active = 1",
                params![api_key],
                |row| {
                    Ok(ClientRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        domain: row.get(2)?,
                        api_key: row.get(3)?,
                        created_at: row.get(4)?,
                        is_active: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Append one experiment row; returns the generated id.
    ///
    /// Runs in its own transaction scope (connection-per-call), so each
    /// write commits independently of the others in a pipeline run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] on any database failure; the
    /// caller treats this as fatal for the run.
    pub fn insert_experiment(
        &self,
        client_id: i64,
        hypothesis: &str,
        intervention_kind: &str,
        status: &str,
        results: &str,
    ) -> Result<i64, PipelineError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO experiments (client_id, hypothesis, intervention_kind, status, results)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![client_id, hypothesis, intervention_kind, status, results],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Count experiment rows recorded for a client.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] on any database failure.
    pub fn experiment_count(&self, client_id: i64) -> Result<i64, PipelineError> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM experiments WHERE client_id = ?1",
            params![client_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Register a webhook URL for a client; returns the generated id.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] on any database failure.
    pub fn register_webhook(
        &self,
        client_id: i64,
        webhook_url: &str,
        event_types: &str,
    ) -> Result<i64, PipelineError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO webhooks (client_id, webhook_url, event_types) VALUES (?1, ?2, ?3)",
            params![client_id, webhook_url, event_types],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The most recently registered active webhook for a client, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] on any database failure.
    pub fn webhook_for_client(
        &self,
        client_id: i64,
    ) -> Result<Option<WebhookRecord>, PipelineError> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT id, client_id, webhook_url, event_types
                 FROM webhooks WHERE client_id = ?1 AND is_active = 1
                 ORDER BY id DESC LIMIT 1",
                params![client_id],
                |row| {
                    Ok(WebhookRecord {
                        id: row.get(0)?,
                        client_id: row.get(1)?,
                        webhook_url: row.get(2)?,
                        event_types: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

/// Mint a client API key: `acs_` plus 16 hex characters of a fresh UUID.
fn mint_api_key() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    let tail = raw.get(..16).unwrap_or(&raw);
    format!("acs_{tail}")
}
