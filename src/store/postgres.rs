//! PostgreSQL storage backend.
//!
//! Expected tables:
//!
//! ```sql
//! CREATE TABLE anime (
//!     id             TEXT PRIMARY KEY,
//!     anidb_id       TEXT,
//!     the_tvdb_id    TEXT,
//!     record_type    TEXT,
//!     title_en       TEXT,
//!     title_jp       TEXT,
//!     title_romaji   TEXT,
//!     title_kanji    TEXT,
//!     title_synonyms TEXT,
//!     image_url      TEXT,
//!     synopsis       TEXT,
//!     episodes       INTEGER,
//!     status         TEXT,
//!     start_date     TIMESTAMP,
//!     end_date       TIMESTAMP,
//!     genres         TEXT,
//!     duration       TEXT,
//!     broadcast      TEXT,
//!     source         TEXT,
//!     licensors      TEXT,
//!     studios        TEXT,
//!     rating         DOUBLE PRECISION,
//!     ranking        INTEGER,
//!     created_at     TIMESTAMPTZ NOT NULL,
//!     updated_at     TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE anime_seasons (
//!     id            TEXT PRIMARY KEY,
//!     season        TEXT NOT NULL,
//!     status        TEXT NOT NULL,
//!     episode_count INTEGER,
//!     notes         TEXT,
//!     anime_id      TEXT,
//!     created_at    TIMESTAMPTZ NOT NULL,
//!     updated_at    TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE episodes (
//!     id         TEXT PRIMARY KEY,
//!     anime_id   TEXT,
//!     episode    INTEGER,
//!     title_en   TEXT,
//!     title_jp   TEXT,
//!     aired      TIMESTAMP,
//!     synopsis   TEXT,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE tags (
//!     id   BIGSERIAL PRIMARY KEY,
//!     name TEXT NOT NULL UNIQUE
//! );
//!
//! CREATE TABLE anime_tags (
//!     anime_id TEXT NOT NULL,
//!     tag_id   BIGINT NOT NULL REFERENCES tags (id),
//!     PRIMARY KEY (anime_id, tag_id)
//! );
//! ```
//!
//! Timestamps normalized by the entity mappers are bound as text and cast
//! server-side, so the stored value is exactly the normalized wall-clock.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info, instrument};

use super::{AssociationStore, EntityStore, TagId, TagStore};
use crate::config::PostgresConfig;
use crate::entity::{Anime, AnimeEpisode, AnimeSeason, Record, RecordType, SeasonStatus};
use crate::{Error, Result};

/// Row that knows how to upsert itself.
pub trait PgRecord: Record {
    /// `INSERT ... ON CONFLICT (id) DO UPDATE` with one placeholder per
    /// value returned by [`PgRecord::params`].
    const UPSERT_SQL: &'static str;

    fn params(&self) -> Vec<&(dyn ToSql + Sync)>;
}

pub struct PgStore {
    // Transactions need `&mut Client`.
    client: Mutex<Client>,
    connection_task: JoinHandle<()>,
}

impl PgStore {
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connecting to PostgreSQL"
        );

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.username)
            .password(&config.password)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        let (client, connection) = pg_config.connect(NoTls).await?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        info!("Connected to PostgreSQL");

        Ok(Self {
            client: Mutex::new(client),
            connection_task,
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.connection_task.is_finished()
    }
}

impl Drop for PgStore {
    fn drop(&mut self) {
        self.connection_task.abort();
    }
}

#[async_trait]
impl<E: PgRecord> EntityStore<E> for PgStore {
    #[instrument(skip_all, fields(table = E::TABLE, id = entity.id()))]
    async fn upsert(&self, entity: &E, old_title: Option<&str>) -> Result<()> {
        if let Some(old_title) = old_title {
            debug!(old_title, "Title changed, row is keyed by id");
        }

        let client = self.client.lock().await;
        client.execute(E::UPSERT_SQL, &entity.params()).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(table = E::TABLE, id = entity.id()))]
    async fn delete(&self, entity: &E) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", E::TABLE);

        let client = self.client.lock().await;
        let deleted = client.execute(sql.as_str(), &[&entity.id()]).await?;
        if deleted == 0 {
            return Err(Error::NotFound {
                table: E::TABLE,
                id: entity.id().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TagStore for PgStore {
    async fn find_or_create(&self, name: &str) -> Result<TagId> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "INSERT INTO tags (name) VALUES ($1) \
                 ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
                 RETURNING id",
                &[&name],
            )
            .await?;
        Ok(row.try_get(0)?)
    }
}

#[async_trait]
impl AssociationStore for PgStore {
    async fn replace_all(&self, entity_id: &str, tag_ids: &[TagId]) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        tx.execute("DELETE FROM anime_tags WHERE anime_id = $1", &[&entity_id])
            .await?;
        if !tag_ids.is_empty() {
            tx.execute(
                "INSERT INTO anime_tags (anime_id, tag_id) \
                 SELECT $1, tag_id FROM unnest($2::bigint[]) AS t(tag_id) \
                 ON CONFLICT DO NOTHING",
                &[&entity_id, &tag_ids],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

impl PgRecord for Anime {
    const UPSERT_SQL: &'static str = "\
        INSERT INTO anime (
            id, anidb_id, the_tvdb_id, record_type, title_en, title_jp,
            title_romaji, title_kanji, title_synonyms, image_url, synopsis,
            episodes, status, start_date, end_date, genres, duration,
            broadcast, source, licensors, studios, rating, ranking,
            created_at, updated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6,
            $7, $8, $9, $10, $11,
            $12, $13, $14::text::timestamp, $15::text::timestamp, $16, $17,
            $18, $19, $20, $21, $22, $23,
            $24, $25
        )
        ON CONFLICT (id) DO UPDATE SET
            anidb_id = EXCLUDED.anidb_id,
            the_tvdb_id = EXCLUDED.the_tvdb_id,
            record_type = EXCLUDED.record_type,
            title_en = EXCLUDED.title_en,
            title_jp = EXCLUDED.title_jp,
            title_romaji = EXCLUDED.title_romaji,
            title_kanji = EXCLUDED.title_kanji,
            title_synonyms = EXCLUDED.title_synonyms,
            image_url = EXCLUDED.image_url,
            synopsis = EXCLUDED.synopsis,
            episodes = EXCLUDED.episodes,
            status = EXCLUDED.status,
            start_date = EXCLUDED.start_date,
            end_date = EXCLUDED.end_date,
            genres = EXCLUDED.genres,
            duration = EXCLUDED.duration,
            broadcast = EXCLUDED.broadcast,
            source = EXCLUDED.source,
            licensors = EXCLUDED.licensors,
            studios = EXCLUDED.studios,
            rating = EXCLUDED.rating,
            ranking = EXCLUDED.ranking,
            updated_at = EXCLUDED.updated_at";

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![
            &self.id,
            &self.anidb_id,
            &self.the_tvdb_id,
            &self.record_type,
            &self.title_en,
            &self.title_jp,
            &self.title_romaji,
            &self.title_kanji,
            &self.title_synonyms,
            &self.image_url,
            &self.synopsis,
            &self.episodes,
            &self.status,
            &self.start_date,
            &self.end_date,
            &self.genres,
            &self.duration,
            &self.broadcast,
            &self.source,
            &self.licensors,
            &self.studios,
            &self.rating,
            &self.ranking,
            &self.created_at,
            &self.updated_at,
        ]
    }
}

impl PgRecord for AnimeSeason {
    const UPSERT_SQL: &'static str = "\
        INSERT INTO anime_seasons (
            id, season, status, episode_count, notes, anime_id, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE SET
            season = EXCLUDED.season,
            status = EXCLUDED.status,
            episode_count = EXCLUDED.episode_count,
            notes = EXCLUDED.notes,
            anime_id = EXCLUDED.anime_id,
            updated_at = EXCLUDED.updated_at";

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![
            &self.id,
            &self.season,
            &self.status,
            &self.episode_count,
            &self.notes,
            &self.anime_id,
            &self.created_at,
            &self.updated_at,
        ]
    }
}

impl PgRecord for AnimeEpisode {
    const UPSERT_SQL: &'static str = "\
        INSERT INTO episodes (
            id, anime_id, episode, title_en, title_jp, aired, synopsis, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6::text::timestamp, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE SET
            anime_id = EXCLUDED.anime_id,
            episode = EXCLUDED.episode,
            title_en = EXCLUDED.title_en,
            title_jp = EXCLUDED.title_jp,
            aired = EXCLUDED.aired,
            synopsis = EXCLUDED.synopsis,
            updated_at = EXCLUDED.updated_at";

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![
            &self.id,
            &self.anime_id,
            &self.episode,
            &self.title_en,
            &self.title_jp,
            &self.aired,
            &self.synopsis,
            &self.created_at,
            &self.updated_at,
        ]
    }
}

// Enumerations are stored as their text form.

impl ToSql for RecordType {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.as_str().to_sql(ty, out)
    }

    fn accepts(ty: &Type) -> bool {
        <&str as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

impl ToSql for SeasonStatus {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.as_str().to_sql(ty, out)
    }

    fn accepts(ty: &Type) -> bool {
        <&str as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}
