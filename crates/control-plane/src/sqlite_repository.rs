use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::channel::{Ability, AbilityTagUpdate, Channel, ChannelInfo, ChannelStatus};
use crate::repository::{ChannelRepository, RepositoryError, ABILITY_BATCH_SIZE};

const CHANNEL_COLUMNS: &str =
    "id, name, status, models, \"group\", priority, weight, rate_limit, tag, channel_info";
const ABILITY_COLUMNS: &str =
    "a.\"group\", a.model, a.channel_id, a.enabled, a.priority, a.weight, a.tag";

pub struct SqliteChannelRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteChannelRepository {
    pub fn open(path: &str) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path).map_err(store_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn ensure_schema(&self) -> Result<(), RepositoryError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS channels (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                status INTEGER NOT NULL DEFAULT 1,
                models TEXT NOT NULL DEFAULT '',
                \"group\" TEXT NOT NULL DEFAULT 'default',
                priority INTEGER,
                weight INTEGER,
                rate_limit INTEGER,
                tag TEXT,
                channel_info TEXT NOT NULL DEFAULT '{}'
            );
            CREATE TABLE IF NOT EXISTS abilities (
                \"group\" TEXT NOT NULL,
                model TEXT NOT NULL,
                channel_id INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                priority INTEGER,
                weight INTEGER NOT NULL DEFAULT 0,
                tag TEXT,
                PRIMARY KEY (\"group\", model, channel_id)
            );
            CREATE INDEX IF NOT EXISTS idx_abilities_channel_id ON abilities (channel_id);
            CREATE INDEX IF NOT EXISTS idx_abilities_tag ON abilities (tag);",
        )
        .map_err(store_error)?;
        Ok(())
    }

    fn query_abilities(
        &self,
        sql: &str,
        values: &[&dyn ToSql],
    ) -> Result<Vec<Ability>, RepositoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(store_error)?;
        let rows = stmt
            .query_map(values, ability_from_row)
            .map_err(store_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }
}

impl ChannelRepository for SqliteChannelRepository {
    fn all_channels(&self) -> Result<Vec<Channel>, RepositoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY id"))
            .map_err(store_error)?;
        let rows = stmt.query_map([], channel_from_row).map_err(store_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }

    fn get_channel(&self, id: i64) -> Result<Option<Channel>, RepositoryError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
            params![id],
            channel_from_row,
        )
        .optional()
        .map_err(store_error)
    }

    fn upsert_channel(&self, channel: &Channel) -> Result<(), RepositoryError> {
        let info = serde_json::to_string(&channel.info)
            .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO channels (id, name, status, models, \"group\", priority, weight, rate_limit, tag, channel_info)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                models = excluded.models,
                \"group\" = excluded.\"group\",
                priority = excluded.priority,
                weight = excluded.weight,
                rate_limit = excluded.rate_limit,
                tag = excluded.tag,
                channel_info = excluded.channel_info",
            params![
                channel.id,
                channel.name,
                channel.status.code(),
                channel.models,
                channel.group,
                channel.priority,
                channel.weight,
                channel.rate_limit,
                channel.tag,
                info,
            ],
        )
        .map_err(store_error)?;
        Ok(())
    }

    fn delete_channel(&self, id: i64) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock();
        let removed = conn
            .execute("DELETE FROM channels WHERE id = ?1", params![id])
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    fn update_channel_status(
        &self,
        id: i64,
        status: ChannelStatus,
    ) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE channels SET status = ?1 WHERE id = ?2",
                params![status.code(), id],
            )
            .map_err(store_error)?;
        Ok(updated > 0)
    }

    fn all_abilities(&self) -> Result<Vec<Ability>, RepositoryError> {
        self.query_abilities(
            &format!("SELECT {ABILITY_COLUMNS} FROM abilities a"),
            &[],
        )
    }

    fn enabled_abilities(&self, group: &str, model: &str) -> Result<Vec<Ability>, RepositoryError> {
        self.query_abilities(
            &format!(
                "SELECT {ABILITY_COLUMNS} FROM abilities a
                 WHERE a.\"group\" = ?1 AND a.model = ?2 AND a.enabled = 1"
            ),
            &[&group, &model],
        )
    }

    fn enabled_priorities(&self, group: &str, model: &str) -> Result<Vec<i64>, RepositoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT COALESCE(a.priority, c.priority, 0) AS effective_priority
                 FROM abilities a LEFT JOIN channels c ON c.id = a.channel_id
                 WHERE a.\"group\" = ?1 AND a.model = ?2 AND a.enabled = 1
                 ORDER BY effective_priority DESC",
            )
            .map_err(store_error)?;
        let rows = stmt
            .query_map(params![group, model], |row| row.get::<_, i64>(0))
            .map_err(store_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }

    fn enabled_abilities_at_priority(
        &self,
        group: &str,
        model: &str,
        priority: i64,
    ) -> Result<Vec<Ability>, RepositoryError> {
        self.query_abilities(
            &format!(
                "SELECT {ABILITY_COLUMNS} FROM abilities a
                 LEFT JOIN channels c ON c.id = a.channel_id
                 WHERE a.\"group\" = ?1 AND a.model = ?2 AND a.enabled = 1
                   AND COALESCE(a.priority, c.priority, 0) = ?3
                 ORDER BY a.weight DESC"
            ),
            &[&group, &model, &priority],
        )
    }

    fn enabled_models(&self, group: Option<&str>) -> Result<Vec<String>, RepositoryError> {
        let conn = self.conn.lock();
        let (sql, values): (&str, Vec<&dyn ToSql>) = match &group {
            Some(group) => (
                "SELECT DISTINCT model FROM abilities WHERE \"group\" = ?1 AND enabled = 1 ORDER BY model",
                vec![group as &dyn ToSql],
            ),
            None => (
                "SELECT DISTINCT model FROM abilities WHERE enabled = 1 ORDER BY model",
                Vec::new(),
            ),
        };
        let mut stmt = conn.prepare(sql).map_err(store_error)?;
        let rows = stmt
            .query_map(values.as_slice(), |row| row.get::<_, String>(0))
            .map_err(store_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }

    fn insert_abilities(&self, abilities: &[Ability]) -> Result<usize, RepositoryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_error)?;
        let inserted = insert_chunked(&tx, abilities).map_err(store_error)?;
        tx.commit().map_err(store_error)?;
        Ok(inserted)
    }

    fn replace_channel_abilities(
        &self,
        channel_id: i64,
        abilities: &[Ability],
    ) -> Result<(), RepositoryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_error)?;
        tx.execute(
            "DELETE FROM abilities WHERE channel_id = ?1",
            params![channel_id],
        )
        .map_err(store_error)?;
        insert_chunked(&tx, abilities).map_err(store_error)?;
        tx.commit().map_err(store_error)?;
        Ok(())
    }

    fn delete_channel_abilities(&self, channel_ids: &[i64]) -> Result<usize, RepositoryError> {
        let conn = self.conn.lock();
        let mut removed = 0;
        for chunk in channel_ids.chunks(ABILITY_BATCH_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let values: Vec<&dyn ToSql> = chunk.iter().map(|id| id as &dyn ToSql).collect();
            removed += conn
                .execute(
                    &format!("DELETE FROM abilities WHERE channel_id IN ({placeholders})"),
                    values.as_slice(),
                )
                .map_err(store_error)?;
        }
        Ok(removed)
    }

    fn update_ability_status(
        &self,
        channel_id: i64,
        enabled: bool,
    ) -> Result<usize, RepositoryError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE abilities SET enabled = ?1 WHERE channel_id = ?2",
            params![enabled, channel_id],
        )
        .map_err(store_error)
    }

    fn update_ability_status_by_tag(
        &self,
        tag: &str,
        enabled: bool,
    ) -> Result<usize, RepositoryError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE abilities SET enabled = ?1 WHERE tag = ?2",
            params![enabled, tag],
        )
        .map_err(store_error)
    }

    fn update_abilities_by_tag(
        &self,
        tag: &str,
        update: &AbilityTagUpdate,
    ) -> Result<usize, RepositoryError> {
        if update.is_empty() {
            return Ok(0);
        }
        let mut sets = Vec::new();
        let mut values: Vec<&dyn ToSql> = Vec::new();
        if let Some(new_tag) = &update.tag {
            sets.push("tag = ?");
            values.push(new_tag);
        }
        if let Some(priority) = &update.priority {
            sets.push("priority = ?");
            values.push(priority);
        }
        if let Some(weight) = &update.weight {
            sets.push("weight = ?");
            values.push(weight);
        }
        values.push(&tag);
        let sql = format!("UPDATE abilities SET {} WHERE tag = ?", sets.join(", "));
        let conn = self.conn.lock();
        conn.execute(&sql, values.as_slice()).map_err(store_error)
    }
}

fn insert_chunked(conn: &Connection, abilities: &[Ability]) -> rusqlite::Result<usize> {
    let mut inserted = 0;
    for chunk in abilities.chunks(ABILITY_BATCH_SIZE) {
        let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO abilities (\"group\", model, channel_id, enabled, priority, weight, tag)
             VALUES {placeholders}
             ON CONFLICT DO NOTHING"
        );
        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * 7);
        for ability in chunk {
            values.push(&ability.group);
            values.push(&ability.model);
            values.push(&ability.channel_id);
            values.push(&ability.enabled);
            values.push(&ability.priority);
            values.push(&ability.weight);
            values.push(&ability.tag);
        }
        inserted += conn.execute(&sql, values.as_slice())?;
    }
    Ok(inserted)
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    let info_raw: String = row.get(9)?;
    let info: ChannelInfo = serde_json::from_str(&info_raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(err)))?;
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        status: ChannelStatus::from_code(row.get(2)?),
        models: row.get(3)?,
        group: row.get(4)?,
        priority: row.get(5)?,
        weight: row.get(6)?,
        rate_limit: row.get(7)?,
        tag: row.get(8)?,
        info,
    })
}

fn ability_from_row(row: &Row<'_>) -> rusqlite::Result<Ability> {
    Ok(Ability {
        group: row.get(0)?,
        model: row.get(1)?,
        channel_id: row.get(2)?,
        enabled: row.get(3)?,
        priority: row.get(4)?,
        weight: row.get(5)?,
        tag: row.get(6)?,
    })
}

fn store_error(err: rusqlite::Error) -> RepositoryError {
    RepositoryError::Store(err.to_string())
}
