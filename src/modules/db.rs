use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{AppError, AppResult};
use crate::models::user::SERVICE_ACCOUNT_USER_ID;
use crate::models::{DataSource, DataSourceCommand, OrgRole, SignedInUser, UserAuth};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS data_source (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    type TEXT NOT NULL,
    name TEXT NOT NULL,
    url TEXT NOT NULL DEFAULT '',
    database TEXT NOT NULL DEFAULT '',
    user TEXT NOT NULL DEFAULT '',
    password TEXT NOT NULL DEFAULT '',
    basic_auth INTEGER NOT NULL DEFAULT 0,
    basic_auth_user TEXT NOT NULL DEFAULT '',
    basic_auth_password TEXT NOT NULL DEFAULT '',
    json_data TEXT NOT NULL DEFAULT '{}',
    secure_json_data TEXT NOT NULL DEFAULT '{}',
    created INTEGER NOT NULL,
    updated INTEGER NOT NULL,
    UNIQUE (org_id, name)
);
CREATE TABLE IF NOT EXISTS user_auth (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL UNIQUE,
    auth_module TEXT NOT NULL,
    auth_id TEXT NOT NULL DEFAULT '',
    o_auth_access_token TEXT NOT NULL DEFAULT '',
    o_auth_refresh_token TEXT NOT NULL DEFAULT '',
    o_auth_token_type TEXT NOT NULL DEFAULT '',
    o_auth_expiry INTEGER NOT NULL DEFAULT 0,
    created INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS api_key (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    key_hash TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL,
    user_id INTEGER NOT NULL DEFAULT 0,
    login TEXT NOT NULL DEFAULT '',
    created INTEGER NOT NULL
);
";

const DS_COLUMNS: &str = "id, org_id, version, type, name, url, database, user, password, \
     basic_auth, basic_auth_user, basic_auth_password, json_data, secure_json_data";

/// SQLite backed store for datasources, stored OAuth tokens and API keys
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> AppResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Unknown("database lock poisoned".to_string()))
    }

    // ===== Datasources =====

    /// Load a datasource of `org_id` with its credential strategy resolved
    pub fn get_datasource(&self, id: i64, org_id: i64) -> AppResult<DataSource> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM data_source WHERE id = ?1 AND org_id = ?2",
            DS_COLUMNS
        );
        conn.query_row(&sql, params![id, org_id], datasource_from_row)
            .optional()?
            .map(DataSource::resolved)
            .ok_or_else(|| AppError::NotFound("Data source not found".to_string()))
    }

    pub fn list_datasources(&self, org_id: i64) -> AppResult<Vec<DataSource>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM data_source WHERE org_id = ?1 ORDER BY name",
            DS_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![org_id], datasource_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?.resolved());
        }
        Ok(result)
    }

    pub fn add_datasource(&self, org_id: i64, cmd: &DataSourceCommand) -> AppResult<DataSource> {
        validate_command(cmd)?;
        let id = {
            let conn = self.conn()?;
            let now = chrono::Utc::now().timestamp();
            conn.execute(
                "INSERT INTO data_source (org_id, version, type, name, url, database, user, password, \
                 basic_auth, basic_auth_user, basic_auth_password, json_data, secure_json_data, created, updated) \
                 VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                params![
                    org_id,
                    cmd.ds_type,
                    cmd.name,
                    cmd.url,
                    cmd.database,
                    cmd.user,
                    cmd.password,
                    cmd.basic_auth,
                    cmd.basic_auth_user,
                    cmd.basic_auth_password,
                    serde_json::to_string(&cmd.json_data)?,
                    serde_json::to_string(&cmd.secure_json_data)?,
                    now,
                ],
            )
            .map_err(map_unique_violation)?;
            conn.last_insert_rowid()
        };
        tracing::info!("Added datasource {} ({}) to org {}", cmd.name, cmd.ds_type, org_id);
        self.get_datasource(id, org_id)
    }

    /// Replace a datasource and bump its version. Secure fields that are
    /// not part of the command are kept.
    pub fn update_datasource(
        &self,
        id: i64,
        org_id: i64,
        cmd: &DataSourceCommand,
    ) -> AppResult<DataSource> {
        validate_command(cmd)?;
        let existing = self.get_datasource(id, org_id)?;
        let mut secure = existing.secure_json_data;
        for (key, value) in &cmd.secure_json_data {
            secure.insert(key.clone(), value.clone());
        }

        {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE data_source SET version = version + 1, type = ?3, name = ?4, url = ?5, \
                 database = ?6, user = ?7, password = ?8, basic_auth = ?9, basic_auth_user = ?10, \
                 basic_auth_password = ?11, json_data = ?12, secure_json_data = ?13, updated = ?14 \
                 WHERE id = ?1 AND org_id = ?2",
                params![
                    id,
                    org_id,
                    cmd.ds_type,
                    cmd.name,
                    cmd.url,
                    cmd.database,
                    cmd.user,
                    cmd.password,
                    cmd.basic_auth,
                    cmd.basic_auth_user,
                    cmd.basic_auth_password,
                    serde_json::to_string(&cmd.json_data)?,
                    serde_json::to_string(&secure)?,
                    chrono::Utc::now().timestamp(),
                ],
            )
            .map_err(map_unique_violation)?;
        }
        tracing::info!("Updated datasource {} in org {}", id, org_id);
        self.get_datasource(id, org_id)
    }

    pub fn delete_datasource(&self, id: i64, org_id: i64) -> AppResult<()> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "DELETE FROM data_source WHERE id = ?1 AND org_id = ?2",
            params![id, org_id],
        )?;
        if affected == 0 {
            return Err(AppError::NotFound("Data source not found".to_string()));
        }
        tracing::info!("Deleted datasource {} from org {}", id, org_id);
        Ok(())
    }

    // ===== OAuth tokens =====

    pub fn get_user_auth(&self, user_id: i64) -> AppResult<Option<UserAuth>> {
        let conn = self.conn()?;
        let auth = conn
            .query_row(
                "SELECT user_id, auth_module, auth_id, o_auth_access_token, o_auth_refresh_token, \
                 o_auth_token_type, o_auth_expiry FROM user_auth WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserAuth {
                        user_id: row.get(0)?,
                        auth_module: row.get(1)?,
                        auth_id: row.get(2)?,
                        access_token: row.get(3)?,
                        refresh_token: row.get(4)?,
                        token_type: row.get(5)?,
                        expiry: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(auth)
    }

    /// Insert or replace the stored token of a user
    pub fn upsert_user_auth(&self, auth: &UserAuth) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_auth (user_id, auth_module, auth_id, o_auth_access_token, \
             o_auth_refresh_token, o_auth_token_type, o_auth_expiry, created) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(user_id) DO UPDATE SET auth_module = excluded.auth_module, \
             auth_id = excluded.auth_id, o_auth_access_token = excluded.o_auth_access_token, \
             o_auth_refresh_token = excluded.o_auth_refresh_token, \
             o_auth_token_type = excluded.o_auth_token_type, o_auth_expiry = excluded.o_auth_expiry",
            params![
                auth.user_id,
                auth.auth_module,
                auth.auth_id,
                auth.access_token,
                auth.refresh_token,
                auth.token_type,
                auth.expiry,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    // ===== API keys =====

    /// Create a key and return its plaintext. Only the hash is stored.
    pub fn add_api_key(
        &self,
        org_id: i64,
        name: &str,
        role: OrgRole,
        user_id: i64,
        login: &str,
    ) -> AppResult<String> {
        let key = generate_api_key();
        self.insert_api_key(org_id, name, role, user_id, login, &key)?;
        tracing::info!("Created API key {} for org {} with role {}", name, org_id, role);
        Ok(key)
    }

    /// Make sure `key` exists as an org 1 admin key
    pub fn ensure_api_key(&self, key: &str) -> AppResult<()> {
        if self.lookup_api_key(key)?.is_some() {
            return Ok(());
        }
        self.insert_api_key(
            1,
            "bootstrap",
            OrgRole::Admin,
            SERVICE_ACCOUNT_USER_ID,
            "admin",
            key,
        )?;
        tracing::info!("Registered bootstrap admin API key");
        Ok(())
    }

    fn insert_api_key(
        &self,
        org_id: i64,
        name: &str,
        role: OrgRole,
        user_id: i64,
        login: &str,
        key: &str,
    ) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO api_key (org_id, name, key_hash, role, user_id, login, created) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                org_id,
                name,
                hash_api_key(key),
                role.as_str(),
                user_id,
                login,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Resolve a presented key to the identity it grants
    pub fn lookup_api_key(&self, key: &str) -> AppResult<Option<SignedInUser>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT org_id, role, user_id, login FROM api_key WHERE key_hash = ?1",
                params![hash_api_key(key)],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((org_id, role, user_id, login)) => {
                let org_role = role.parse::<OrgRole>().map_err(AppError::Unknown)?;
                Ok(Some(SignedInUser {
                    user_id,
                    org_id,
                    login,
                    org_role,
                    is_anonymous: false,
                }))
            }
            None => Ok(None),
        }
    }
}

fn datasource_from_row(row: &Row<'_>) -> rusqlite::Result<DataSource> {
    let json_data: String = row.get(12)?;
    let secure_json_data: String = row.get(13)?;
    Ok(DataSource {
        id: row.get(0)?,
        org_id: row.get(1)?,
        version: row.get(2)?,
        ds_type: row.get(3)?,
        name: row.get(4)?,
        url: row.get(5)?,
        database: row.get(6)?,
        user: row.get(7)?,
        password: row.get(8)?,
        basic_auth: row.get(9)?,
        basic_auth_user: row.get(10)?,
        basic_auth_password: row.get(11)?,
        json_data: serde_json::from_str::<Map<String, Value>>(&json_data).unwrap_or_default(),
        secure_json_data: serde_json::from_str::<HashMap<String, String>>(&secure_json_data)
            .unwrap_or_default(),
        auth: Default::default(),
    })
}

fn validate_command(cmd: &DataSourceCommand) -> AppResult<()> {
    if cmd.name.trim().is_empty() {
        return Err(AppError::BadRequest("Data source name is required".to_string()));
    }
    if cmd.ds_type.trim().is_empty() {
        return Err(AppError::BadRequest("Data source type is required".to_string()));
    }
    Ok(())
}

fn map_unique_violation(e: rusqlite::Error) -> AppError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            AppError::BadRequest("Data source with the same name already exists".to_string())
        }
        _ => AppError::Database(e),
    }
}

fn generate_api_key() -> String {
    let secret: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("dsp_{}", secret)
}

fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthMode;
    use serde_json::json;

    fn command(name: &str) -> DataSourceCommand {
        DataSourceCommand {
            name: name.to_string(),
            ds_type: "prometheus".to_string(),
            url: "http://prometheus:9090".to_string(),
            json_data: json!({ "httpHeaderName1": "Authorization" })
                .as_object()
                .cloned()
                .unwrap(),
            secure_json_data: HashMap::from([(
                "httpHeaderValue1".to_string(),
                "Bearer xf5yhfkpsnmgo".to_string(),
            )]),
            ..Default::default()
        }
    }

    #[test]
    fn test_datasource_crud() {
        let store = Store::open_in_memory().unwrap();
        let ds = store.add_datasource(1, &command("prom")).unwrap();
        assert_eq!(ds.version, 1);
        assert_eq!(ds.auth, AuthMode::CustomHeaderSecret);
        assert_eq!(ds.custom_headers()[0].1, "Bearer xf5yhfkpsnmgo");

        // other orgs do not see it
        assert!(matches!(
            store.get_datasource(ds.id, 2),
            Err(AppError::NotFound(_))
        ));

        let mut update = command("prom-renamed");
        update.secure_json_data.clear();
        let updated = store.update_datasource(ds.id, 1, &update).unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "prom-renamed");
        assert_eq!(
            updated.secure_json_data.get("httpHeaderValue1").map(String::as_str),
            Some("Bearer xf5yhfkpsnmgo")
        );

        assert_eq!(store.list_datasources(1).unwrap().len(), 1);
        store.delete_datasource(ds.id, 1).unwrap();
        assert!(store.list_datasources(1).unwrap().is_empty());
        assert!(matches!(
            store.delete_datasource(ds.id, 1),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_name_is_bad_request() {
        let store = Store::open_in_memory().unwrap();
        store.add_datasource(1, &command("prom")).unwrap();
        let err = store.add_datasource(1, &command("prom")).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        // same name in another org is fine
        store.add_datasource(2, &command("prom")).unwrap();
    }

    #[test]
    fn test_user_auth_upsert() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_user_auth(1).unwrap().is_none());

        let mut auth = UserAuth {
            user_id: 1,
            auth_module: "oauth_generic_oauth".into(),
            auth_id: "42".into(),
            access_token: "testtoken".into(),
            refresh_token: "testrefreshtoken".into(),
            token_type: "Bearer".into(),
            expiry: 2_000_000_000,
        };
        store.upsert_user_auth(&auth).unwrap();
        assert_eq!(store.get_user_auth(1).unwrap(), Some(auth.clone()));

        auth.access_token = "rotated".into();
        store.upsert_user_auth(&auth).unwrap();
        assert_eq!(store.get_user_auth(1).unwrap().unwrap().access_token, "rotated");
    }

    #[test]
    fn test_api_keys_store_only_hashes() {
        let store = Store::open_in_memory().unwrap();
        let key = store
            .add_api_key(3, "ci", OrgRole::Editor, 9, "ci-bot")
            .unwrap();
        assert!(key.starts_with("dsp_"));

        let user = store.lookup_api_key(&key).unwrap().unwrap();
        assert_eq!(user.org_id, 3);
        assert_eq!(user.org_role, OrgRole::Editor);
        assert_eq!(user.login, "ci-bot");
        assert!(store.lookup_api_key("dsp_wrong").unwrap().is_none());

        let conn = store.conn().unwrap();
        let stored: String = conn
            .query_row("SELECT key_hash FROM api_key", [], |row| row.get(0))
            .unwrap();
        assert_ne!(stored, key);
        assert_eq!(stored.len(), 64);
    }

    #[test]
    fn test_ensure_api_key_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.ensure_api_key("bootstrap-secret").unwrap();
        store.ensure_api_key("bootstrap-secret").unwrap();
        let user = store.lookup_api_key("bootstrap-secret").unwrap().unwrap();
        assert_eq!(user.org_role, OrgRole::Admin);
        assert_eq!(user.org_id, 1);
    }
}
