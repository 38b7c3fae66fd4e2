// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! User, role and site bookkeeping around the transaction table.
//!
//! Password hashing happens upstream; this module only stores the hash it
//! is handed. Preference writes take a JSON object so callers can patch a
//! subset of fields without reading the row first.

use pipetrack_core::{StoreError, UserPreferences};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::database::{map_call_err, Database};

fn user_exists(conn: &rusqlite::Connection, user_id: i64) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM users WHERE id = ?1", [user_id], |_| Ok(()))
        .optional()
        .map(|row| row.is_some())
}

fn role_exists(conn: &rusqlite::Connection, role_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM roles WHERE role_id = ?1", [role_id], |_| {
        Ok(())
    })
    .optional()
    .map(|row| row.is_some())
}

/// Register a user. Names are unique; a second registration under the same
/// name is a conflict, not an update.
pub async fn add_user(db: &Database, name: &str, password_hash: &str) -> Result<i64, StoreError> {
    let name = name.to_string();
    let password_hash = password_hash.to_string();
    let conn = db.connection().await;
    conn.call(move |conn| {
        let taken: bool = conn
            .query_row("SELECT 1 FROM users WHERE name = ?1", [&name], |_| Ok(()))
            .optional()?
            .is_some();
        if taken {
            return Err(StoreError::Conflict(format!(
                "user '{name}' already exists"
            ))
            .into());
        }
        conn.execute(
            "INSERT INTO users (name, hashed_password) VALUES (?1, ?2)",
            params![name, password_hash],
        )?;
        Ok(conn.last_insert_rowid())
    })
    .await
    .map_err(map_call_err)
}

/// Delete a user together with their role, preference and site rows.
/// Transaction associations stay, they record history.
pub async fn remove_user(db: &Database, user_id: i64) -> Result<(), StoreError> {
    let conn = db.connection().await;
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
        if removed == 0 {
            return Err(StoreError::not_found("user", user_id).into());
        }
        tx.execute("DELETE FROM user_roles WHERE user_id = ?1", [user_id])?;
        tx.execute("DELETE FROM user_preferences WHERE user_id = ?1", [user_id])?;
        tx.execute("DELETE FROM user_sites WHERE user_id = ?1", [user_id])?;
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

/// Define a role. `permissions` is an opaque bitmask interpreted upstream.
pub async fn add_role(
    db: &Database,
    role_id: &str,
    description: &str,
    permissions: i64,
) -> Result<(), StoreError> {
    let role_id = role_id.to_string();
    let description = description.to_string();
    let conn = db.connection().await;
    conn.call(move |conn| {
        if role_exists(conn, &role_id)? {
            return Err(StoreError::Conflict(format!(
                "role '{role_id}' already exists"
            ))
            .into());
        }
        conn.execute(
            "INSERT INTO roles (role_id, description, permissions) VALUES (?1, ?2, ?3)",
            params![role_id, description, permissions],
        )?;
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

/// Assign a role to a user. Both sides must exist already.
pub async fn add_user_role(db: &Database, user_id: i64, role_id: &str) -> Result<(), StoreError> {
    let role_id = role_id.to_string();
    let conn = db.connection().await;
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        if !user_exists(&tx, user_id)? {
            return Err(StoreError::not_found("user", user_id).into());
        }
        if !role_exists(&tx, &role_id)? {
            return Err(StoreError::not_found("role", &role_id).into());
        }
        let assigned: bool = tx
            .query_row(
                "SELECT 1 FROM user_roles WHERE user_id = ?1 AND role_id = ?2",
                params![user_id, role_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if assigned {
            return Err(StoreError::Conflict(format!(
                "user {user_id} already has role '{role_id}'"
            ))
            .into());
        }
        tx.execute(
            "INSERT INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
            params![user_id, role_id],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

/// Take a role away from a user.
pub async fn revoke_user_role(
    db: &Database,
    user_id: i64,
    role_id: &str,
) -> Result<(), StoreError> {
    let role_id = role_id.to_string();
    let conn = db.connection().await;
    conn.call(move |conn| {
        let removed = conn.execute(
            "DELETE FROM user_roles WHERE user_id = ?1 AND role_id = ?2",
            params![user_id, role_id],
        )?;
        if removed == 0 {
            return Err(StoreError::not_found("user_role", format!("{user_id}/{role_id}")).into());
        }
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

/// Patch a user's preferences from a JSON object. Keys absent from the
/// object keep their stored value; an unknown key rejects the whole patch
/// before anything is written.
pub async fn set_user_preferences(
    db: &Database,
    user_id: i64,
    patch: serde_json::Map<String, Value>,
) -> Result<(), StoreError> {
    for (key, value) in &patch {
        let ok = match key.as_str() {
            "user_id" => true,
            "language" | "timezone" => value.is_string() || value.is_null(),
            "notifications_enabled" => value.is_boolean(),
            _ => {
                return Err(StoreError::InvalidArgument(format!(
                    "unknown preference key '{key}'"
                )))
            }
        };
        if !ok {
            return Err(StoreError::InvalidArgument(format!(
                "preference '{key}' has the wrong type"
            )));
        }
    }

    let conn = db.connection().await;
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        if !user_exists(&tx, user_id)? {
            return Err(StoreError::not_found("user", user_id).into());
        }
        tx.execute(
            "INSERT INTO user_preferences (user_id) VALUES (?1) \
             ON CONFLICT (user_id) DO NOTHING",
            [user_id],
        )?;
        for (key, value) in &patch {
            match key.as_str() {
                "user_id" => {}
                "language" | "timezone" => {
                    let text = value.as_str().map(str::to_string);
                    tx.execute(
                        &format!("UPDATE user_preferences SET {key} = ?1 WHERE user_id = ?2"),
                        params![text, user_id],
                    )?;
                }
                "notifications_enabled" => {
                    tx.execute(
                        "UPDATE user_preferences SET notifications_enabled = ?1 \
                         WHERE user_id = ?2",
                        params![value.as_bool().unwrap_or(false), user_id],
                    )?;
                }
                _ => unreachable!("validated above"),
            }
        }
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

/// The stored preferences, `None` when the user never set any.
pub async fn get_user_preferences(
    db: &Database,
    user_id: i64,
) -> Result<Option<UserPreferences>, StoreError> {
    let conn = db.connection().await;
    conn.call(move |conn| {
        let row = conn
            .query_row(
                "SELECT user_id, language, timezone, notifications_enabled \
                 FROM user_preferences WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(UserPreferences {
                        user_id: row.get(0)?,
                        language: row.get(1)?,
                        timezone: row.get(2)?,
                        notifications_enabled: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
    .await
    .map_err(map_call_err)
}

/// Site ids the user may see, ascending.
pub async fn get_user_sites(db: &Database, user_id: i64) -> Result<Vec<i64>, StoreError> {
    let conn = db.connection().await;
    conn.call(move |conn| {
        let mut stmt =
            conn.prepare("SELECT site_id FROM user_sites WHERE user_id = ?1 ORDER BY site_id")?;
        let sites = stmt
            .query_map([user_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(sites)
    })
    .await
    .map_err(map_call_err)
}

/// Replace the user's site set wholesale.
pub async fn set_user_sites(db: &Database, user_id: i64, sites: Vec<i64>) -> Result<(), StoreError> {
    let conn = db.connection().await;
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        if !user_exists(&tx, user_id)? {
            return Err(StoreError::not_found("user", user_id).into());
        }
        tx.execute("DELETE FROM user_sites WHERE user_id = ?1", [user_id])?;
        for site_id in &sites {
            tx.execute(
                "INSERT OR IGNORE INTO user_sites (user_id, site_id) VALUES (?1, ?2)",
                params![user_id, site_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(map_call_err)
}
