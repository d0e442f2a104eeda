use std::sync::Arc;

use parking_lot::Mutex;
use postgres::types::ToSql;
use postgres::{Client, GenericClient, NoTls, Row};

use crate::channel::{Ability, AbilityTagUpdate, Channel, ChannelInfo, ChannelStatus};
use crate::repository::{ChannelRepository, RepositoryError, ABILITY_BATCH_SIZE};

const CHANNEL_COLUMNS: &str =
    "id, name, status, models, \"group\", priority, weight, rate_limit, tag, channel_info";
const ABILITY_COLUMNS: &str =
    "a.\"group\", a.model, a.channel_id, a.enabled, a.priority, a.weight, a.tag";

type PgParam<'a> = &'a (dyn ToSql + Sync);

pub struct PgChannelRepository {
    client: Arc<Mutex<Client>>,
}

impl PgChannelRepository {
    pub fn connect(dsn: &str) -> Result<Self, RepositoryError> {
        let client = Client::connect(dsn, NoTls).map_err(store_error)?;
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    pub fn ensure_schema(&self) -> Result<(), RepositoryError> {
        let mut client = self.client.lock();
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS channels (
                    id BIGINT PRIMARY KEY,
                    name TEXT NOT NULL DEFAULT '',
                    status BIGINT NOT NULL DEFAULT 1,
                    models TEXT NOT NULL DEFAULT '',
                    \"group\" TEXT NOT NULL DEFAULT 'default',
                    priority BIGINT,
                    weight BIGINT,
                    rate_limit BIGINT,
                    tag TEXT,
                    channel_info TEXT NOT NULL DEFAULT '{}'
                );
                CREATE TABLE IF NOT EXISTS abilities (
                    \"group\" VARCHAR(64) NOT NULL,
                    model VARCHAR(255) NOT NULL,
                    channel_id BIGINT NOT NULL,
                    enabled BOOLEAN NOT NULL DEFAULT TRUE,
                    priority BIGINT,
                    weight BIGINT NOT NULL DEFAULT 0,
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
        values: &[PgParam<'_>],
    ) -> Result<Vec<Ability>, RepositoryError> {
        let mut client = self.client.lock();
        let rows = client.query(sql, values).map_err(store_error)?;
        rows.iter().map(ability_from_row).collect()
    }
}

impl ChannelRepository for PgChannelRepository {
    fn all_channels(&self) -> Result<Vec<Channel>, RepositoryError> {
        let mut client = self.client.lock();
        let rows = client
            .query(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY id"),
                &[],
            )
            .map_err(store_error)?;
        rows.iter().map(channel_from_row).collect()
    }

    fn get_channel(&self, id: i64) -> Result<Option<Channel>, RepositoryError> {
        let mut client = self.client.lock();
        let row = client
            .query_opt(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = $1"),
                &[&id],
            )
            .map_err(store_error)?;
        row.as_ref().map(channel_from_row).transpose()
    }

    fn upsert_channel(&self, channel: &Channel) -> Result<(), RepositoryError> {
        let info = serde_json::to_string(&channel.info)
            .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
        let weight = channel.weight.map(i64::from);
        let mut client = self.client.lock();
        client
            .execute(
                "INSERT INTO channels (id, name, status, models, \"group\", priority, weight, rate_limit, tag, channel_info)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    status = EXCLUDED.status,
                    models = EXCLUDED.models,
                    \"group\" = EXCLUDED.\"group\",
                    priority = EXCLUDED.priority,
                    weight = EXCLUDED.weight,
                    rate_limit = EXCLUDED.rate_limit,
                    tag = EXCLUDED.tag,
                    channel_info = EXCLUDED.channel_info",
                &[
                    &channel.id,
                    &channel.name,
                    &channel.status.code(),
                    &channel.models,
                    &channel.group,
                    &channel.priority,
                    &weight,
                    &channel.rate_limit,
                    &channel.tag,
                    &info,
                ],
            )
            .map_err(store_error)?;
        Ok(())
    }

    fn delete_channel(&self, id: i64) -> Result<bool, RepositoryError> {
        let mut client = self.client.lock();
        let removed = client
            .execute("DELETE FROM channels WHERE id = $1", &[&id])
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    fn update_channel_status(
        &self,
        id: i64,
        status: ChannelStatus,
    ) -> Result<bool, RepositoryError> {
        let mut client = self.client.lock();
        let updated = client
            .execute(
                "UPDATE channels SET status = $1 WHERE id = $2",
                &[&status.code(), &id],
            )
            .map_err(store_error)?;
        Ok(updated > 0)
    }

    fn all_abilities(&self) -> Result<Vec<Ability>, RepositoryError> {
        self.query_abilities(&format!("SELECT {ABILITY_COLUMNS} FROM abilities a"), &[])
    }

    fn enabled_abilities(&self, group: &str, model: &str) -> Result<Vec<Ability>, RepositoryError> {
        self.query_abilities(
            &format!(
                "SELECT {ABILITY_COLUMNS} FROM abilities a
                 WHERE a.\"group\" = $1 AND a.model = $2 AND a.enabled = TRUE"
            ),
            &[&group, &model],
        )
    }

    fn enabled_priorities(&self, group: &str, model: &str) -> Result<Vec<i64>, RepositoryError> {
        let mut client = self.client.lock();
        let rows = client
            .query(
                "SELECT DISTINCT COALESCE(a.priority, c.priority, 0) AS effective_priority
                 FROM abilities a LEFT JOIN channels c ON c.id = a.channel_id
                 WHERE a.\"group\" = $1 AND a.model = $2 AND a.enabled = TRUE
                 ORDER BY effective_priority DESC",
                &[&group, &model],
            )
            .map_err(store_error)?;
        rows.iter()
            .map(|row| row.try_get::<_, i64>(0).map_err(store_error))
            .collect()
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
                 WHERE a.\"group\" = $1 AND a.model = $2 AND a.enabled = TRUE
                   AND COALESCE(a.priority, c.priority, 0) = $3
                 ORDER BY a.weight DESC"
            ),
            &[&group, &model, &priority],
        )
    }

    fn enabled_models(&self, group: Option<&str>) -> Result<Vec<String>, RepositoryError> {
        let mut client = self.client.lock();
        let rows = match group {
            Some(group) => client.query(
                "SELECT DISTINCT model FROM abilities WHERE \"group\" = $1 AND enabled = TRUE ORDER BY model",
                &[&group],
            ),
            None => client.query(
                "SELECT DISTINCT model FROM abilities WHERE enabled = TRUE ORDER BY model",
                &[],
            ),
        }
        .map_err(store_error)?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(store_error))
            .collect()
    }

    fn insert_abilities(&self, abilities: &[Ability]) -> Result<usize, RepositoryError> {
        let mut client = self.client.lock();
        let mut tx = client.transaction().map_err(store_error)?;
        let inserted = insert_chunked(&mut tx, abilities)?;
        tx.commit().map_err(store_error)?;
        Ok(inserted)
    }

    fn replace_channel_abilities(
        &self,
        channel_id: i64,
        abilities: &[Ability],
    ) -> Result<(), RepositoryError> {
        let mut client = self.client.lock();
        let mut tx = client.transaction().map_err(store_error)?;
        tx.execute("DELETE FROM abilities WHERE channel_id = $1", &[&channel_id])
            .map_err(store_error)?;
        insert_chunked(&mut tx, abilities)?;
        tx.commit().map_err(store_error)?;
        Ok(())
    }

    fn delete_channel_abilities(&self, channel_ids: &[i64]) -> Result<usize, RepositoryError> {
        let mut client = self.client.lock();
        let removed = client
            .execute(
                "DELETE FROM abilities WHERE channel_id = ANY($1)",
                &[&channel_ids],
            )
            .map_err(store_error)?;
        Ok(removed as usize)
    }

    fn update_ability_status(
        &self,
        channel_id: i64,
        enabled: bool,
    ) -> Result<usize, RepositoryError> {
        let mut client = self.client.lock();
        let updated = client
            .execute(
                "UPDATE abilities SET enabled = $1 WHERE channel_id = $2",
                &[&enabled, &channel_id],
            )
            .map_err(store_error)?;
        Ok(updated as usize)
    }

    fn update_ability_status_by_tag(
        &self,
        tag: &str,
        enabled: bool,
    ) -> Result<usize, RepositoryError> {
        let mut client = self.client.lock();
        let updated = client
            .execute(
                "UPDATE abilities SET enabled = $1 WHERE tag = $2",
                &[&enabled, &tag],
            )
            .map_err(store_error)?;
        Ok(updated as usize)
    }

    fn update_abilities_by_tag(
        &self,
        tag: &str,
        update: &AbilityTagUpdate,
    ) -> Result<usize, RepositoryError> {
        if update.is_empty() {
            return Ok(0);
        }
        let weight = update.weight.map(i64::from);
        let mut sets = Vec::new();
        let mut values: Vec<PgParam<'_>> = Vec::new();
        if let Some(new_tag) = &update.tag {
            values.push(new_tag);
            sets.push(format!("tag = ${}", values.len()));
        }
        if let Some(priority) = &update.priority {
            values.push(priority);
            sets.push(format!("priority = ${}", values.len()));
        }
        if let Some(weight) = &weight {
            values.push(weight);
            sets.push(format!("weight = ${}", values.len()));
        }
        values.push(&tag);
        let sql = format!(
            "UPDATE abilities SET {} WHERE tag = ${}",
            sets.join(", "),
            values.len()
        );
        let mut client = self.client.lock();
        let updated = client.execute(&sql, &values).map_err(store_error)?;
        Ok(updated as usize)
    }
}

fn insert_chunked(
    client: &mut impl GenericClient,
    abilities: &[Ability],
) -> Result<usize, RepositoryError> {
    let mut inserted = 0;
    for chunk in abilities.chunks(ABILITY_BATCH_SIZE) {
        let weights: Vec<i64> = chunk.iter().map(|a| i64::from(a.weight)).collect();
        let mut placeholders = Vec::with_capacity(chunk.len());
        let mut values: Vec<PgParam<'_>> = Vec::with_capacity(chunk.len() * 7);
        for (ability, weight) in chunk.iter().zip(&weights) {
            let base = values.len();
            placeholders.push(format!(
                "(${}, ${}, ${}, ${}, ${}, ${}, ${})",
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5,
                base + 6,
                base + 7
            ));
            values.push(&ability.group);
            values.push(&ability.model);
            values.push(&ability.channel_id);
            values.push(&ability.enabled);
            values.push(&ability.priority);
            values.push(weight);
            values.push(&ability.tag);
        }
        let sql = format!(
            "INSERT INTO abilities (\"group\", model, channel_id, enabled, priority, weight, tag)
             VALUES {}
             ON CONFLICT DO NOTHING",
            placeholders.join(", ")
        );
        inserted += client.execute(&sql, &values).map_err(store_error)? as usize;
    }
    Ok(inserted)
}

fn channel_from_row(row: &Row) -> Result<Channel, RepositoryError> {
    let info_raw: String = row.try_get("channel_info").map_err(store_error)?;
    let info: ChannelInfo = serde_json::from_str(&info_raw)
        .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
    let weight: Option<i64> = row.try_get("weight").map_err(store_error)?;
    Ok(Channel {
        id: row.try_get("id").map_err(store_error)?,
        name: row.try_get("name").map_err(store_error)?,
        status: ChannelStatus::from_code(row.try_get("status").map_err(store_error)?),
        models: row.try_get("models").map_err(store_error)?,
        group: row.try_get("group").map_err(store_error)?,
        priority: row.try_get("priority").map_err(store_error)?,
        weight: weight.map(|w| w.clamp(0, u32::MAX as i64) as u32),
        rate_limit: row.try_get("rate_limit").map_err(store_error)?,
        tag: row.try_get("tag").map_err(store_error)?,
        info,
    })
}

fn ability_from_row(row: &Row) -> Result<Ability, RepositoryError> {
    let weight: i64 = row.try_get(5).map_err(store_error)?;
    Ok(Ability {
        group: row.try_get(0).map_err(store_error)?,
        model: row.try_get(1).map_err(store_error)?,
        channel_id: row.try_get(2).map_err(store_error)?,
        enabled: row.try_get(3).map_err(store_error)?,
        priority: row.try_get(4).map_err(store_error)?,
        weight: weight.clamp(0, u32::MAX as i64) as u32,
        tag: row.try_get(6).map_err(store_error)?,
    })
}

fn store_error(err: postgres::Error) -> RepositoryError {
    RepositoryError::Store(err.to_string())
}
