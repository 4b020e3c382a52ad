use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

use crate::cryptography::entry::EntryCipher;
use crate::cryptography::primitives::{ENTRY_SALT_LEN, NONCE_LEN};
use crate::filesystem::secure::{ensure_dir_secure, restrict_file_perms};

pub const DB_FILE: &str = "vault.db";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS passwords(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    website TEXT NOT NULL,
    username TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT 'password',
    salt BLOB NOT NULL,
    blob BLOB NOT NULL,
    createdAt INTEGER NOT NULL,
    updatedAt INTEGER NOT NULL,
    UNIQUE(website, username)
);
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no matching credential")]
    NotFound,
    #[error("credential already exists for this site and user")]
    Conflict,
    #[error("stored row is malformed")]
    BadRow,
    #[error("db: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("db io: {0}")]
    Io(anyhow::Error),
}

/// One credential row as persisted. Secrets live only in `cipher.blob`.
#[derive(Debug, Clone)]
pub struct EntryRow {
    pub id: i64,
    pub website: String,
    pub username: String,
    pub kind: String,
    pub cipher: EntryCipher,
}

/// Metadata-only listing item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub id: i64,
    pub website: String,
    pub username: String,
}

pub struct EntryStore {
    conn: Connection,
}

impl EntryStore {
    /// Open (creating if needed) the vault database inside `dir`.
    /// The schema is ensured idempotently; the file is clamped to
    /// owner-only permissions where the OS supports it.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        ensure_dir_secure(dir).map_err(StoreError::Io)?;
        let path = dir.join(DB_FILE);
        let conn = Connection::open(&path)?;
        restrict_file_perms(&path);
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    pub fn insert(
        &self,
        website: &str,
        username: &str,
        kind: &str,
        cipher: &EntryCipher,
    ) -> Result<i64, StoreError> {
        let now = Utc::now().timestamp();
        let res = self.conn.execute(
            "INSERT INTO passwords (website, username, type, salt, blob, createdAt, updatedAt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![website, username, kind, &cipher.salt[..], &cipher.blob, now],
        );
        match res {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a row's cipher material (and optionally its type), e.g. after
    /// an update or an at-read rotation.
    pub fn update_cipher(
        &self,
        id: i64,
        kind: &str,
        cipher: &EntryCipher,
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let n = self.conn.execute(
            "UPDATE passwords SET type = ?1, salt = ?2, blob = ?3, updatedAt = ?4 WHERE id = ?5",
            params![kind, &cipher.salt[..], &cipher.blob, now, id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_by_website(&self, website: &str) -> Result<Vec<EntryRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, website, username, type, salt, blob FROM passwords
             WHERE website = ?1 ORDER BY username ASC",
        )?;
        let rows = stmt.query_map(params![website], row_to_entry)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(decode_row(row?)?);
        }
        Ok(out)
    }

    pub fn get_by_site_and_user(
        &self,
        website: &str,
        username: &str,
    ) -> Result<EntryRow, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, website, username, type, salt, blob FROM passwords
                 WHERE website = ?1 AND username = ?2",
                params![website, username],
                row_to_entry,
            )
            .optional()?;
        match row {
            Some(raw) => decode_row(raw),
            None => Err(StoreError::NotFound),
        }
    }

    pub fn delete_by_site_and_user(
        &self,
        website: &str,
        username: &str,
    ) -> Result<(), StoreError> {
        let n = self.conn.execute(
            "DELETE FROM passwords WHERE website = ?1 AND username = ?2",
            params![website, username],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<EntryMeta>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, website, username FROM passwords ORDER BY website ASC, username ASC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(EntryMeta {
                id: r.get(0)?,
                website: r.get(1)?,
                username: r.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

type RawRow = (i64, String, String, String, Vec<u8>, Vec<u8>);

fn row_to_entry(r: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
    ))
}

fn decode_row(raw: RawRow) -> Result<EntryRow, StoreError> {
    let (id, website, username, kind, salt, blob) = raw;
    if salt.len() != ENTRY_SALT_LEN || blob.len() <= NONCE_LEN {
        return Err(StoreError::BadRow);
    }
    let mut salt_arr = [0u8; ENTRY_SALT_LEN];
    salt_arr.copy_from_slice(&salt);
    Ok(EntryRow {
        id,
        website,
        username,
        kind,
        cipher: EntryCipher {
            salt: salt_arr,
            blob,
        },
    })
}
