//! SQLite-backed persistence for Zaps, their runs and owner credentials.
//! One connection behind a mutex: concurrent readers queue, writes are serialized.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use zapline_core::error::{Result, ZaplineError};
use zapline_core::traits::{RunStore, ZapRegistry};
use zapline_core::types::{
    Action, ActionRun, ActionRunStatus, Credentials, NewAction, NewTrigger, NewZap, RunStatus,
    Trigger, TriggerKind, Zap, ZapRun, ZapStatus, ZapUpdate,
};

/// Zap registry + run store.
pub struct ZapDb {
    conn: Mutex<Connection>,
}

fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> ZaplineError {
    move |e| ZaplineError::Database(format!("{context}: {e}"))
}

fn now_str() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_json(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or(Value::Null)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ZapDb {
    /// Open or create the database. `":memory:"` gives a private in-memory store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .ok();
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ZaplineError::Database(format!("Lock: {e}")))
    }

    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                access_token TEXT,
                refresh_token TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS zaps (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',  -- active, deleted
                owner_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_zaps_owner ON zaps(owner_id);

            -- exactly one trigger per zap
            CREATE TABLE IF NOT EXISTS triggers (
                id TEXT PRIMARY KEY,
                zap_id TEXT NOT NULL UNIQUE REFERENCES zaps(id),
                type TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS actions (
                id TEXT PRIMARY KEY,
                zap_id TEXT NOT NULL REFERENCES zaps(id),
                type TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                sorting_order INTEGER NOT NULL,
                UNIQUE (zap_id, sorting_order)
            );

            CREATE TABLE IF NOT EXISTS zap_runs (
                id TEXT PRIMARY KEY,
                zap_id TEXT NOT NULL REFERENCES zaps(id),
                status TEXT NOT NULL,  -- running, completed, partially_completed, failed
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                finished_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_zap_runs_zap ON zap_runs(zap_id, created_at);

            -- no FK to actions: editing a zap recreates its actions, runs stay
            CREATE TABLE IF NOT EXISTS action_runs (
                id TEXT PRIMARY KEY,
                action_id TEXT NOT NULL,
                zap_run_id TEXT NOT NULL REFERENCES zap_runs(id),
                status TEXT NOT NULL,  -- running, success, failed
                message TEXT,
                details TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                finished_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_action_runs_run ON action_runs(zap_run_id);
         ",
            )
            .map_err(db_err("Migration"))
    }

    // ─── Zaps ─────────────────────────────────────────────────

    /// Create a Zap with its trigger and actions in one transaction.
    pub fn create_zap(&self, new: &NewZap) -> Result<Zap> {
        if new.name.trim().is_empty() {
            return Err(ZaplineError::InvalidRequest("name is required".into()));
        }
        if new.owner_id.trim().is_empty() {
            return Err(ZaplineError::InvalidRequest("ownerId is required".into()));
        }
        let trigger_type = normalize_trigger_type(&new.trigger)?;
        let actions = ordered_actions(&new.actions)?;

        let id = new_id();
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction().map_err(db_err("Begin"))?;
            tx.execute(
                "INSERT INTO zaps (id, name, status, owner_id, created_at) VALUES (?1, ?2, 'active', ?3, ?4)",
                params![id, new.name, new.owner_id, now_str()],
            )
            .map_err(db_err("Insert zap"))?;
            tx.execute(
                "INSERT INTO triggers (id, zap_id, type, metadata) VALUES (?1, ?2, ?3, ?4)",
                params![new_id(), id, trigger_type, metadata_text(&new.trigger.metadata)],
            )
            .map_err(db_err("Insert trigger"))?;
            insert_actions(&tx, &id, &actions)?;
            tx.commit().map_err(db_err("Commit"))?;
        }

        tracing::info!("⚡ Zap created: '{}' ({id})", new.name);
        self.get_zap(&id)?
            .ok_or_else(|| ZaplineError::zap_not_found(&id))
    }

    /// Edit a live Zap. Present `actions` replace the whole batch.
    pub fn update_zap(&self, id: &str, update: &ZapUpdate) -> Result<Zap> {
        let trigger = update
            .trigger
            .as_ref()
            .map(|t| normalize_trigger_type(t).map(|kind| (kind, t)))
            .transpose()?;
        let actions = update.actions.as_deref().map(ordered_actions).transpose()?;
        if let Some(name) = &update.name
            && name.trim().is_empty()
        {
            return Err(ZaplineError::InvalidRequest("name cannot be empty".into()));
        }

        {
            let mut conn = self.conn()?;
            let tx = conn.transaction().map_err(db_err("Begin"))?;
            let live: bool = tx
                .query_row(
                    "SELECT COUNT(*) FROM zaps WHERE id = ?1 AND status = 'active'",
                    params![id],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(db_err("Lookup zap"))?
                > 0;
            if !live {
                return Err(ZaplineError::zap_not_found(id));
            }

            if let Some(name) = &update.name {
                tx.execute("UPDATE zaps SET name = ?1 WHERE id = ?2", params![name, id])
                    .map_err(db_err("Update zap"))?;
            }
            if let Some((kind, t)) = trigger {
                tx.execute(
                    "UPDATE triggers SET type = ?1, metadata = ?2 WHERE zap_id = ?3",
                    params![kind, metadata_text(&t.metadata), id],
                )
                .map_err(db_err("Update trigger"))?;
            }
            if let Some(actions) = &actions {
                tx.execute("DELETE FROM actions WHERE zap_id = ?1", params![id])
                    .map_err(db_err("Delete actions"))?;
                insert_actions(&tx, id, actions)?;
            }
            tx.commit().map_err(db_err("Commit"))?;
        }

        tracing::info!("✏️ Zap updated: {id}");
        self.get_zap(id)?.ok_or_else(|| ZaplineError::zap_not_found(id))
    }

    /// Mark a Zap deleted. Runs and definition rows are kept.
    pub fn soft_delete_zap(&self, id: &str) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE zaps SET status = 'deleted' WHERE id = ?1 AND status = 'active'",
                params![id],
            )
            .map_err(db_err("Delete zap"))?;
        if changed == 0 {
            return Err(ZaplineError::zap_not_found(id));
        }
        tracing::info!("🗑️ Zap deleted: {id}");
        Ok(())
    }

    /// Active Zaps of one owner, newest first.
    pub fn list_zaps_by_owner(&self, owner_id: &str) -> Result<Vec<Zap>> {
        let conn = self.conn()?;
        let ids = query_ids(
            &conn,
            "SELECT id FROM zaps WHERE owner_id = ?1 AND status = 'active' ORDER BY created_at DESC, rowid DESC",
            owner_id,
        )?;
        ids.iter()
            .filter_map(|id| load_zap(&conn, id).transpose())
            .collect()
    }

    // ─── Runs ─────────────────────────────────────────────────

    /// Runs of a Zap, newest first.
    pub fn list_runs(&self, zap_id: &str, limit: u32, offset: u32) -> Result<Vec<ZapRun>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, zap_id, status, metadata, created_at, finished_at FROM zap_runs
                 WHERE zap_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
            )
            .map_err(db_err("Prepare runs"))?;
        stmt.query_map(params![zap_id, limit, offset], zap_run_from_row)
            .map_err(db_err("Query runs"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read runs"))
    }

    pub fn get_zap_run(&self, id: &str) -> Result<Option<ZapRun>> {
        self.conn()?
            .query_row(
                "SELECT id, zap_id, status, metadata, created_at, finished_at FROM zap_runs WHERE id = ?1",
                params![id],
                zap_run_from_row,
            )
            .optional()
            .map_err(db_err("Get run"))
    }

    /// Action runs of one ZapRun in execution order.
    pub fn list_action_runs(&self, zap_run_id: &str) -> Result<Vec<ActionRun>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, action_id, zap_run_id, status, message, details, created_at, finished_at
                 FROM action_runs WHERE zap_run_id = ?1 ORDER BY created_at, rowid",
            )
            .map_err(db_err("Prepare action runs"))?;
        stmt.query_map(params![zap_run_id], action_run_from_row)
            .map_err(db_err("Query action runs"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read action runs"))
    }

    // ─── Users ────────────────────────────────────────────────

    /// Store (or replace) the mailbox tokens of a user.
    pub fn upsert_user_credentials(&self, user_id: &str, credentials: &Credentials) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO users (id, access_token, refresh_token, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET access_token = ?2, refresh_token = ?3, updated_at = ?4",
                params![
                    user_id,
                    credentials.access_token,
                    credentials.refresh_token,
                    now_str()
                ],
            )
            .map_err(db_err("Upsert user"))?;
        Ok(())
    }
}

impl ZapRegistry for ZapDb {
    fn list_active_zaps_by_trigger_type(&self, trigger_type: &str) -> Result<Vec<Zap>> {
        let trigger_type = TriggerKind::parse(trigger_type)
            .map(|k| k.as_str().to_string())
            .unwrap_or_else(|| trigger_type.to_ascii_lowercase());
        let conn = self.conn()?;
        let ids = query_ids(
            &conn,
            "SELECT z.id FROM zaps z JOIN triggers t ON t.zap_id = z.id
             WHERE z.status = 'active' AND t.type = ?1 ORDER BY z.created_at, z.rowid",
            &trigger_type,
        )?;
        ids.iter()
            .filter_map(|id| load_zap(&conn, id).transpose())
            .collect()
    }

    fn get_zap(&self, id: &str) -> Result<Option<Zap>> {
        let conn = self.conn()?;
        load_zap(&conn, id)
    }

    fn find_zap_by_webhook(&self, webhook_id: &str) -> Result<Option<Zap>> {
        let conn = self.conn()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT z.id FROM zaps z JOIN triggers t ON t.zap_id = z.id
                 WHERE z.status = 'active' AND t.type = 'webhook'
                   AND json_extract(t.metadata, '$.webhookId') = ?1
                 ORDER BY z.created_at, z.rowid LIMIT 1",
                params![webhook_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Find webhook"))?;
        match id {
            Some(id) => load_zap(&conn, &id),
            None => Ok(None),
        }
    }

    fn credentials_for(&self, owner_id: &str) -> Result<Option<Credentials>> {
        let row: Option<(Option<String>, Option<String>)> = self
            .conn()?
            .query_row(
                "SELECT access_token, refresh_token FROM users WHERE id = ?1",
                params![owner_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err("Get credentials"))?;
        Ok(row.and_then(|(access, refresh)| {
            access.filter(|a| !a.is_empty()).map(|access_token| Credentials {
                access_token,
                refresh_token: refresh,
            })
        }))
    }
}

impl RunStore for ZapDb {
    fn create_zap_run(&self, zap_id: &str, metadata: &Value) -> Result<ZapRun> {
        let run = ZapRun {
            id: new_id(),
            zap_id: zap_id.to_string(),
            status: RunStatus::Running,
            metadata: metadata.clone(),
            created_at: Utc::now(),
            finished_at: None,
        };
        self.conn()?
            .execute(
                "INSERT INTO zap_runs (id, zap_id, status, metadata, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run.id,
                    run.zap_id,
                    run.status.as_str(),
                    metadata.to_string(),
                    run.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
                ],
            )
            .map_err(db_err("Create run"))?;
        Ok(run)
    }

    fn update_zap_run(&self, id: &str, status: RunStatus, metadata: &Value) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE zap_runs SET status = ?1, metadata = ?2, finished_at = ?3 WHERE id = ?4",
                params![status.as_str(), metadata.to_string(), now_str(), id],
            )
            .map_err(db_err("Update run"))?;
        if changed == 0 {
            return Err(ZaplineError::NotFound(format!("zap run '{id}'")));
        }
        Ok(())
    }

    fn create_action_run(&self, action_id: &str, zap_run_id: &str) -> Result<ActionRun> {
        let run = ActionRun {
            id: new_id(),
            action_id: action_id.to_string(),
            zap_run_id: zap_run_id.to_string(),
            status: ActionRunStatus::Running,
            message: None,
            details: Value::Object(Default::default()),
            created_at: Utc::now(),
            finished_at: None,
        };
        self.conn()?
            .execute(
                "INSERT INTO action_runs (id, action_id, zap_run_id, status, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, '{}', ?5)",
                params![
                    run.id,
                    run.action_id,
                    run.zap_run_id,
                    run.status.as_str(),
                    run.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
                ],
            )
            .map_err(db_err("Create action run"))?;
        Ok(run)
    }

    fn update_action_run(
        &self,
        id: &str,
        status: ActionRunStatus,
        message: &str,
        details: &Value,
    ) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE action_runs SET status = ?1, message = ?2, details = ?3, finished_at = ?4 WHERE id = ?5",
                params![status.as_str(), message, details.to_string(), now_str(), id],
            )
            .map_err(db_err("Update action run"))?;
        if changed == 0 {
            return Err(ZaplineError::NotFound(format!("action run '{id}'")));
        }
        Ok(())
    }
}

// ─── Row helpers ──────────────────────────────────────────────

fn normalize_trigger_type(trigger: &NewTrigger) -> Result<&'static str> {
    TriggerKind::parse(&trigger.trigger_type)
        .map(|k| k.as_str())
        .ok_or_else(|| {
            ZaplineError::InvalidRequest(format!("unknown trigger type '{}'", trigger.trigger_type))
        })
}

/// Resolve default sorting orders (list index) and reject duplicates.
fn ordered_actions(actions: &[NewAction]) -> Result<Vec<(i64, &NewAction)>> {
    let mut ordered: Vec<(i64, &NewAction)> = actions
        .iter()
        .enumerate()
        .map(|(i, a)| (a.sorting_order.unwrap_or(i as i64), a))
        .collect();
    ordered.sort_by_key(|(order, _)| *order);
    if ordered.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(ZaplineError::InvalidRequest(
            "sortingOrder must be unique within a zap".into(),
        ));
    }
    if ordered.iter().any(|(_, a)| a.action_type.trim().is_empty()) {
        return Err(ZaplineError::InvalidRequest("action type is required".into()));
    }
    Ok(ordered)
}

fn metadata_text(metadata: &Value) -> String {
    if metadata.is_null() {
        "{}".to_string()
    } else {
        metadata.to_string()
    }
}

fn insert_actions(tx: &Transaction<'_>, zap_id: &str, actions: &[(i64, &NewAction)]) -> Result<()> {
    for (order, action) in actions {
        tx.execute(
            "INSERT INTO actions (id, zap_id, type, metadata, sorting_order) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new_id(),
                zap_id,
                action.action_type,
                metadata_text(&action.metadata),
                order
            ],
        )
        .map_err(db_err("Insert action"))?;
    }
    Ok(())
}

fn query_ids(conn: &Connection, sql: &str, param: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql).map_err(db_err("Prepare ids"))?;
    stmt.query_map(params![param], |row| row.get(0))
        .map_err(db_err("Query ids"))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(db_err("Read ids"))
}

/// Load a Zap with its trigger and sorted actions. Zaps missing a trigger row are skipped.
fn load_zap(conn: &Connection, id: &str) -> Result<Option<Zap>> {
    let head = conn
        .query_row(
            "SELECT z.id, z.name, z.status, z.owner_id, z.created_at, t.id, t.type, t.metadata
             FROM zaps z JOIN triggers t ON t.zap_id = z.id WHERE z.id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    Trigger {
                        id: row.get(5)?,
                        trigger_type: row.get(6)?,
                        metadata: parse_json(&row.get::<_, String>(7)?),
                    },
                ))
            },
        )
        .optional()
        .map_err(db_err("Load zap"))?;

    let Some((id, name, status, owner_id, created_at, trigger)) = head else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, type, metadata, sorting_order FROM actions WHERE zap_id = ?1 ORDER BY sorting_order",
        )
        .map_err(db_err("Prepare actions"))?;
    let actions = stmt
        .query_map(params![id], |row| {
            Ok(Action {
                id: row.get(0)?,
                action_type: row.get(1)?,
                metadata: parse_json(&row.get::<_, String>(2)?),
                sorting_order: row.get(3)?,
            })
        })
        .map_err(db_err("Query actions"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err("Read actions"))?;

    Ok(Some(Zap {
        id,
        name,
        status: ZapStatus::parse(&status),
        owner_id,
        trigger,
        actions,
        created_at: parse_time(&created_at),
    }))
}

fn zap_run_from_row(row: &Row<'_>) -> rusqlite::Result<ZapRun> {
    Ok(ZapRun {
        id: row.get(0)?,
        zap_id: row.get(1)?,
        status: RunStatus::parse(&row.get::<_, String>(2)?),
        metadata: parse_json(&row.get::<_, String>(3)?),
        created_at: parse_time(&row.get::<_, String>(4)?),
        finished_at: row.get::<_, Option<String>>(5)?.map(|s| parse_time(&s)),
    })
}

fn action_run_from_row(row: &Row<'_>) -> rusqlite::Result<ActionRun> {
    Ok(ActionRun {
        id: row.get(0)?,
        action_id: row.get(1)?,
        zap_run_id: row.get(2)?,
        status: ActionRunStatus::parse(&row.get::<_, String>(3)?),
        message: row.get(4)?,
        details: parse_json(&row.get::<_, String>(5)?),
        created_at: parse_time(&row.get::<_, String>(6)?),
        finished_at: row.get::<_, Option<String>>(7)?.map(|s| parse_time(&s)),
    })
}
