//! Key-value settings table. Values are stored as JSON text.

use std::collections::BTreeMap;

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, Result};

use super::Repository;

impl Repository {
    /// Raw JSON value for `key`, if stored.
    pub async fn get_setting_value(&self, key: &str) -> Result<Option<Value>> {
        let key_owned = key.to_string();
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                let raw = conn
                    .query_row(
                        "SELECT value FROM settings WHERE key = ?1",
                        params![key_owned],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(raw)
            })
            .await?;

        raw.map(|text| {
            serde_json::from_str(&text).map_err(|source| AppError::Settings {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }

    /// Typed value for `key`. A stored value of the wrong shape is an error
    /// naming the key, not a silent default.
    pub async fn get_setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_setting_value(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| AppError::Settings {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    pub async fn set_setting<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let key = key.to_string();
        let text = serde_json::to_string(value)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                    params![key, text],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_all_settings(&self) -> Result<BTreeMap<String, Value>> {
        let rows: Vec<(String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(key, text)| match serde_json::from_str(&text) {
                Ok(value) => Ok((key, value)),
                Err(source) => Err(AppError::Settings { key, source }),
            })
            .collect()
    }

    /// Writes each default whose key is not stored yet. Existing values win.
    pub async fn seed_settings(&self, defaults: BTreeMap<String, Value>) -> Result<()> {
        let rows = defaults
            .into_iter()
            .map(|(key, value)| Ok((key, serde_json::to_string(&value)?)))
            .collect::<Result<Vec<_>>>()?;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt =
                        tx.prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")?;
                    for (key, text) in rows {
                        stmt.execute(params![key, text])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
