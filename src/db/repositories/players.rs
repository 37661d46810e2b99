use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime},
    models::Player,
};

fn row_to_player(row: &Row) -> Result<Player> {
    let created_at: String = row.get("created_at")?;
    Ok(Player {
        id: row.get("id")?,
        name: row.get("name")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    pub async fn list_players(&self) -> Result<Vec<Player>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, created_at FROM player ORDER BY name COLLATE NOCASE, id",
            )?;
            let mut rows = stmt.query([])?;
            let mut players = Vec::new();
            while let Some(row) = rows.next()? {
                players.push(row_to_player(row)?);
            }
            Ok(players)
        })
        .await
    }

    /// Returns an error if the name is blank or already taken.
    pub async fn insert_player(&self, name: &str) -> Result<Player> {
        let name = name.trim().to_string();
        self.execute(move |conn| {
            if name.is_empty() {
                bail!("player name must not be empty");
            }

            let taken: Option<i64> = conn
                .query_row(
                    "SELECT id FROM player WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                bail!("player {name} already exists");
            }

            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO player (name, created_at) VALUES (?1, ?2)",
                params![name, format_datetime(&created_at)],
            )?;

            Ok(Player {
                id: conn.last_insert_rowid(),
                name,
                created_at,
            })
        })
        .await
    }

    /// Looks a player up by numeric id first, then by exact name.
    pub async fn find_player(&self, key: &str) -> Result<Option<Player>> {
        let key = key.trim().to_string();
        self.execute(move |conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, created_at FROM player WHERE id = ?1 OR name = ?2 ORDER BY id = ?1 DESC LIMIT 1")?;
            let id = key.parse::<i64>().unwrap_or(-1);
            let mut rows = stmt.query(params![id, key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_player(row)?)),
                None => Ok(None),
            }
        })
        .await
    }
}
