//! Relational persistence (A4, §3, §6 "Persisted state").
//!
//! Backed by SQLite, adapted from the teacher's `SqliteJobStore`: one
//! `tokio::sync::Mutex<rusqlite::Connection>` behind an async trait, WAL mode,
//! JSON-blob columns for vector fields, RFC3339 timestamp columns, manual row
//! mapping. Feed/Article/Group/Collection/Episode/AudioFile rows and
//! `CollectionSnapshot` JSON blobs (§6) all live here; C1/C2 stay in-memory
//! and do not use this store (§9).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::types::{
    AudioFile, AudioFormat, Article, Collection, CollectionSnapshot, CollectionSnapshotId,
    CollectionStatus, ArticleId, AudioFileId, CadenceBucket, CollectionId, Episode, EpisodeId,
    EpisodeStatus, Feed, FeedId, FeedKind, Group, GroupId, ReviewTier,
};

/// Abstract relational store for every orchestrator entity (§3).
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_feed(&self, feed: &Feed) -> Result<(), StoreError>;
    async fn get_feed(&self, id: FeedId) -> Result<Option<Feed>, StoreError>;
    async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError>;
    async fn update_feed_polled_at(&self, id: FeedId, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn upsert_group(&self, group: &Group) -> Result<(), StoreError>;
    async fn get_group(&self, id: GroupId) -> Result<Option<Group>, StoreError>;
    async fn list_groups(&self) -> Result<Vec<Group>, StoreError>;
    async fn update_group_last_episode_at(
        &self,
        id: GroupId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_article(&self, article: &Article) -> Result<(), StoreError>;
    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>, StoreError>;
    #[allow(clippy::too_many_arguments)]
    async fn update_article_review(
        &self,
        id: ArticleId,
        review_tier: ReviewTier,
        tags: &[String],
        summary: &str,
        confidence: f64,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn update_article_collection(
        &self,
        id: ArticleId,
        collection_id: CollectionId,
    ) -> Result<(), StoreError>;
    async fn list_article_ids_for_collection(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<ArticleId>, StoreError>;

    async fn get_building_collection(&self, group_id: GroupId) -> Result<Option<Collection>, StoreError>;
    async fn get_ready_collection(&self, group_id: GroupId) -> Result<Option<Collection>, StoreError>;
    async fn get_collection(&self, id: CollectionId) -> Result<Option<Collection>, StoreError>;
    async fn create_building_collection(&self, group_id: GroupId) -> Result<Collection, StoreError>;
    async fn increment_collection_item_count(
        &self,
        collection_id: CollectionId,
    ) -> Result<Collection, StoreError>;
    async fn set_collection_status(
        &self,
        collection_id: CollectionId,
        status: CollectionStatus,
    ) -> Result<(), StoreError>;
    async fn expire_stale_building_collections(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    async fn insert_snapshot(&self, snapshot: &CollectionSnapshot) -> Result<(), StoreError>;
    async fn get_snapshot(
        &self,
        id: CollectionSnapshotId,
    ) -> Result<Option<CollectionSnapshot>, StoreError>;

    async fn insert_episode(&self, episode: &Episode) -> Result<(), StoreError>;
    async fn get_episode(&self, id: EpisodeId) -> Result<Option<Episode>, StoreError>;
    async fn update_episode_status(
        &self,
        id: EpisodeId,
        status: EpisodeStatus,
        failure_reason: Option<&str>,
    ) -> Result<(), StoreError>;
    async fn update_episode_script(&self, id: EpisodeId, script: &str) -> Result<(), StoreError>;
    async fn update_episode_metadata(
        &self,
        id: EpisodeId,
        title: &str,
        description: &str,
        duration_seconds: f64,
    ) -> Result<(), StoreError>;
    async fn list_stale_generating_episodes(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Episode>, StoreError>;

    async fn insert_audio_file(&self, audio: &AudioFile) -> Result<(), StoreError>;
    async fn get_audio_file_for_episode(
        &self,
        episode_id: EpisodeId,
    ) -> Result<Option<AudioFile>, StoreError>;
}

/// SQLite-backed implementation of [`Store`].
pub struct SqliteStore {
    conn: tokio::sync::Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Sqlite(format!("create dir: {e}")))?;
            }
        }
        let conn = rusqlite::Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS feeds (
                id TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                kind TEXT NOT NULL,
                active INTEGER NOT NULL,
                last_polled_at TEXT
            );

            CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                presenter_ids TEXT NOT NULL,
                writer_id TEXT NOT NULL,
                feed_ids TEXT NOT NULL,
                min_articles INTEGER NOT NULL,
                cadence_bucket TEXT NOT NULL,
                last_episode_at TEXT,
                tag_filter TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                feed_id TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                content TEXT NOT NULL,
                published_at TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                review_tier TEXT NOT NULL,
                tags TEXT NOT NULL,
                summary TEXT,
                confidence REAL,
                collection_id TEXT,
                processed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_articles_collection ON articles(collection_id);

            CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                status TEXT NOT NULL,
                item_count INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_collections_group_status ON collections(group_id, status);

            CREATE TABLE IF NOT EXISTS collection_snapshots (
                id TEXT PRIMARY KEY,
                collection_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                article_ids TEXT NOT NULL,
                taken_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS episodes (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                collection_snapshot_id TEXT NOT NULL,
                status TEXT NOT NULL,
                script TEXT,
                title TEXT,
                description TEXT,
                duration_seconds REAL,
                created_at TEXT NOT NULL,
                failure_reason TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_episodes_group ON episodes(group_id);
            CREATE INDEX IF NOT EXISTS idx_episodes_status ON episodes(status);

            CREATE TABLE IF NOT EXISTS audio_files (
                id TEXT PRIMARY KEY,
                episode_id TEXT NOT NULL,
                url TEXT NOT NULL,
                duration_seconds REAL NOT NULL,
                byte_size INTEGER NOT NULL,
                format TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audio_files_episode ON audio_files(episode_id);",
        )?;
        Ok(())
    }
}

fn feed_kind_str(kind: FeedKind) -> &'static str {
    match kind {
        FeedKind::Rss => "rss",
        FeedKind::Atom => "atom",
        FeedKind::Json => "json",
    }
}

fn feed_kind_parse(s: &str) -> Result<FeedKind, StoreError> {
    match s {
        "rss" => Ok(FeedKind::Rss),
        "atom" => Ok(FeedKind::Atom),
        "json" => Ok(FeedKind::Json),
        other => Err(StoreError::Serialization(format!("unknown feed kind: {other}"))),
    }
}

fn cadence_bucket_str(bucket: CadenceBucket) -> &'static str {
    match bucket {
        CadenceBucket::High => "high",
        CadenceBucket::Medium => "medium",
        CadenceBucket::Low => "low",
        CadenceBucket::Manual => "manual",
    }
}

fn cadence_bucket_parse(s: &str) -> Result<CadenceBucket, StoreError> {
    match s {
        "high" => Ok(CadenceBucket::High),
        "medium" => Ok(CadenceBucket::Medium),
        "low" => Ok(CadenceBucket::Low),
        "manual" => Ok(CadenceBucket::Manual),
        other => Err(StoreError::Serialization(format!("unknown cadence bucket: {other}"))),
    }
}

fn review_tier_str(tier: ReviewTier) -> &'static str {
    match tier {
        ReviewTier::None => "none",
        ReviewTier::Light => "light",
        ReviewTier::Heavy => "heavy",
    }
}

fn review_tier_parse(s: &str) -> Result<ReviewTier, StoreError> {
    match s {
        "none" => Ok(ReviewTier::None),
        "light" => Ok(ReviewTier::Light),
        "heavy" => Ok(ReviewTier::Heavy),
        other => Err(StoreError::Serialization(format!("unknown review tier: {other}"))),
    }
}

fn collection_status_str(status: CollectionStatus) -> &'static str {
    match status {
        CollectionStatus::Building => "building",
        CollectionStatus::Ready => "ready",
        CollectionStatus::Consumed => "consumed",
        CollectionStatus::Expired => "expired",
    }
}

fn collection_status_parse(s: &str) -> Result<CollectionStatus, StoreError> {
    match s {
        "building" => Ok(CollectionStatus::Building),
        "ready" => Ok(CollectionStatus::Ready),
        "consumed" => Ok(CollectionStatus::Consumed),
        "expired" => Ok(CollectionStatus::Expired),
        other => Err(StoreError::Serialization(format!("unknown collection status: {other}"))),
    }
}

fn episode_status_str(status: EpisodeStatus) -> &'static str {
    match status {
        EpisodeStatus::Queued => "queued",
        EpisodeStatus::Generating => "generating",
        EpisodeStatus::Completed => "completed",
        EpisodeStatus::Failed => "failed",
    }
}

fn episode_status_parse(s: &str) -> Result<EpisodeStatus, StoreError> {
    match s {
        "queued" => Ok(EpisodeStatus::Queued),
        "generating" => Ok(EpisodeStatus::Generating),
        "completed" => Ok(EpisodeStatus::Completed),
        "failed" => Ok(EpisodeStatus::Failed),
        other => Err(StoreError::Serialization(format!("unknown episode status: {other}"))),
    }
}

fn audio_format_str(format: AudioFormat) -> &'static str {
    match format {
        AudioFormat::Mp3 => "mp3",
        AudioFormat::Wav => "wav",
    }
}

fn audio_format_parse(s: &str) -> Result<AudioFormat, StoreError> {
    match s {
        "mp3" => Ok(AudioFormat::Mp3),
        "wav" => Ok(AudioFormat::Wav),
        other => Err(StoreError::Serialization(format!("unknown audio format: {other}"))),
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| StoreError::Serialization(e.to_string()))?
        .with_timezone(&Utc))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.map(|s| parse_ts(&s)).transpose()
}

trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn row_to_feed(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Feed, StoreError>> {
    let id: String = row.get(0)?;
    let source_url: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let active: i32 = row.get(3)?;
    let last_polled_at: Option<String> = row.get(4)?;
    Ok((|| {
        Ok(Feed {
            id: id.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            source_url,
            kind: feed_kind_parse(&kind)?,
            active: active != 0,
            last_polled_at: parse_opt_ts(last_polled_at)?,
        })
    })())
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Group, StoreError>> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let presenter_ids: String = row.get(2)?;
    let writer_id: String = row.get(3)?;
    let feed_ids: String = row.get(4)?;
    let min_articles: i64 = row.get(5)?;
    let cadence_bucket: String = row.get(6)?;
    let last_episode_at: Option<String> = row.get(7)?;
    let tag_filter: String = row.get(8)?;
    Ok((|| {
        let feed_id_strs: Vec<String> = serde_json::from_str(&feed_ids)?;
        let feed_ids = feed_id_strs
            .into_iter()
            .map(|s| s.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Group {
            id: id.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            name,
            presenter_ids: serde_json::from_str(&presenter_ids)?,
            writer_id,
            feed_ids,
            min_articles: min_articles as u32,
            cadence_bucket: cadence_bucket_parse(&cadence_bucket)?,
            last_episode_at: parse_opt_ts(last_episode_at)?,
            tag_filter: serde_json::from_str(&tag_filter)?,
        })
    })())
}

fn row_to_article(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Article, StoreError>> {
    let id: String = row.get(0)?;
    let feed_id: String = row.get(1)?;
    let title: String = row.get(2)?;
    let url: String = row.get(3)?;
    let content: String = row.get(4)?;
    let published_at: String = row.get(5)?;
    let fingerprint: String = row.get(6)?;
    let review_tier: String = row.get(7)?;
    let tags: String = row.get(8)?;
    let summary: Option<String> = row.get(9)?;
    let confidence: Option<f64> = row.get(10)?;
    let collection_id: Option<String> = row.get(11)?;
    let processed_at: Option<String> = row.get(12)?;
    Ok((|| {
        Ok(Article {
            id: id.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            feed_id: feed_id.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            title,
            url,
            content,
            published_at: parse_ts(&published_at)?,
            fingerprint,
            review_tier: review_tier_parse(&review_tier)?,
            tags: serde_json::from_str(&tags)?,
            summary,
            confidence,
            collection_id: collection_id
                .map(|s| s.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string())))
                .transpose()?,
            processed_at: parse_opt_ts(processed_at)?,
        })
    })())
}

fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Collection, StoreError>> {
    let id: String = row.get(0)?;
    let group_id: String = row.get(1)?;
    let status: String = row.get(2)?;
    let item_count: i64 = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok((|| {
        Ok(Collection {
            id: id.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            group_id: group_id.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            status: collection_status_parse(&status)?,
            item_count: item_count as u32,
            created_at: parse_ts(&created_at)?,
        })
    })())
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<CollectionSnapshot, StoreError>> {
    let id: String = row.get(0)?;
    let collection_id: String = row.get(1)?;
    let group_id: String = row.get(2)?;
    let article_ids: String = row.get(3)?;
    let taken_at: String = row.get(4)?;
    Ok((|| {
        let article_id_strs: Vec<String> = serde_json::from_str(&article_ids)?;
        let article_ids = article_id_strs
            .into_iter()
            .map(|s| s.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CollectionSnapshot {
            id: id.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            collection_id: collection_id
                .parse()
                .map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            group_id: group_id.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            article_ids,
            taken_at: parse_ts(&taken_at)?,
        })
    })())
}

fn row_to_episode(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Episode, StoreError>> {
    let id: String = row.get(0)?;
    let group_id: String = row.get(1)?;
    let collection_snapshot_id: String = row.get(2)?;
    let status: String = row.get(3)?;
    let script: Option<String> = row.get(4)?;
    let title: Option<String> = row.get(5)?;
    let description: Option<String> = row.get(6)?;
    let duration_seconds: Option<f64> = row.get(7)?;
    let created_at: String = row.get(8)?;
    let failure_reason: Option<String> = row.get(9)?;
    Ok((|| {
        Ok(Episode {
            id: id.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            group_id: group_id.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            collection_snapshot_id: collection_snapshot_id
                .parse()
                .map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            status: episode_status_parse(&status)?,
            script,
            title,
            description,
            duration_seconds,
            created_at: parse_ts(&created_at)?,
            failure_reason,
        })
    })())
}

fn row_to_audio_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<AudioFile, StoreError>> {
    let id: String = row.get(0)?;
    let episode_id: String = row.get(1)?;
    let url: String = row.get(2)?;
    let duration_seconds: f64 = row.get(3)?;
    let byte_size: i64 = row.get(4)?;
    let format: String = row.get(5)?;
    Ok((|| {
        Ok(AudioFile {
            id: id.parse().map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            episode_id: episode_id
                .parse()
                .map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            url,
            duration_seconds,
            byte_size: byte_size as u64,
            format: audio_format_parse(&format)?,
        })
    })())
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_feed(&self, feed: &Feed) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO feeds (id, source_url, kind, active, last_polled_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                feed.id.to_string(),
                feed.source_url,
                feed_kind_str(feed.kind),
                feed.active as i32,
                feed.last_polled_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn get_feed(&self, id: FeedId) -> Result<Option<Feed>, StoreError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT id, source_url, kind, active, last_polled_at FROM feeds WHERE id = ?1",
                rusqlite::params![id.to_string()],
                row_to_feed,
            )
            .optional()?;
        result.transpose()
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id, source_url, kind, active, last_polled_at FROM feeds")?;
        let rows = stmt.query_map([], row_to_feed)?;
        let mut feeds = Vec::new();
        for row in rows {
            feeds.push(row??);
        }
        Ok(feeds)
    }

    async fn update_feed_polled_at(&self, id: FeedId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE feeds SET last_polled_at = ?1 WHERE id = ?2",
            rusqlite::params![at.to_rfc3339(), id.to_string()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("feed {id}")));
        }
        Ok(())
    }

    async fn upsert_group(&self, group: &Group) -> Result<(), StoreError> {
        let feed_ids_json = serde_json::to_string(
            &group.feed_ids.iter().map(|f| f.to_string()).collect::<Vec<_>>(),
        )?;
        let presenter_ids_json = serde_json::to_string(&group.presenter_ids)?;
        let tag_filter_json = serde_json::to_string(&group.tag_filter)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO groups
                (id, name, presenter_ids, writer_id, feed_ids, min_articles, cadence_bucket, last_episode_at, tag_filter)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                group.id.to_string(),
                group.name,
                presenter_ids_json,
                group.writer_id,
                feed_ids_json,
                group.min_articles as i64,
                cadence_bucket_str(group.cadence_bucket),
                group.last_episode_at.map(|t| t.to_rfc3339()),
                tag_filter_json,
            ],
        )?;
        Ok(())
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>, StoreError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT id, name, presenter_ids, writer_id, feed_ids, min_articles, cadence_bucket, last_episode_at, tag_filter
                 FROM groups WHERE id = ?1",
                rusqlite::params![id.to_string()],
                row_to_group,
            )
            .optional()?;
        result.transpose()
    }

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, presenter_ids, writer_id, feed_ids, min_articles, cadence_bucket, last_episode_at, tag_filter
             FROM groups",
        )?;
        let rows = stmt.query_map([], row_to_group)?;
        let mut groups = Vec::new();
        for row in rows {
            groups.push(row??);
        }
        Ok(groups)
    }

    async fn update_group_last_episode_at(
        &self,
        id: GroupId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE groups SET last_episode_at = ?1 WHERE id = ?2",
            rusqlite::params![at.to_rfc3339(), id.to_string()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("group {id}")));
        }
        Ok(())
    }

    async fn insert_article(&self, article: &Article) -> Result<(), StoreError> {
        let tags_json = serde_json::to_string(&article.tags)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO articles
                (id, feed_id, title, url, content, published_at, fingerprint, review_tier,
                 tags, summary, confidence, collection_id, processed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            rusqlite::params![
                article.id.to_string(),
                article.feed_id.to_string(),
                article.title,
                article.url,
                article.content,
                article.published_at.to_rfc3339(),
                article.fingerprint,
                review_tier_str(article.review_tier),
                tags_json,
                article.summary,
                article.confidence,
                article.collection_id.map(|c| c.to_string()),
                article.processed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>, StoreError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT id, feed_id, title, url, content, published_at, fingerprint, review_tier,
                        tags, summary, confidence, collection_id, processed_at
                 FROM articles WHERE id = ?1",
                rusqlite::params![id.to_string()],
                row_to_article,
            )
            .optional()?;
        result.transpose()
    }

    async fn update_article_review(
        &self,
        id: ArticleId,
        review_tier: ReviewTier,
        tags: &[String],
        summary: &str,
        confidence: f64,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let tags_json = serde_json::to_string(tags)?;
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE articles SET review_tier = ?1, tags = ?2, summary = ?3, confidence = ?4, processed_at = ?5
             WHERE id = ?6",
            rusqlite::params![
                review_tier_str(review_tier),
                tags_json,
                summary,
                confidence,
                processed_at.to_rfc3339(),
                id.to_string(),
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("article {id}")));
        }
        Ok(())
    }

    async fn update_article_collection(
        &self,
        id: ArticleId,
        collection_id: CollectionId,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE articles SET collection_id = ?1 WHERE id = ?2",
            rusqlite::params![collection_id.to_string(), id.to_string()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("article {id}")));
        }
        Ok(())
    }

    async fn list_article_ids_for_collection(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<ArticleId>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id FROM articles WHERE collection_id = ?1")?;
        let rows = stmt.query_map(rusqlite::params![collection_id.to_string()], |row| {
            let id: String = row.get(0)?;
            Ok(id)
        })?;
        let mut ids = Vec::new();
        for row in rows {
            let id_str = row?;
            ids.push(
                id_str
                    .parse()
                    .map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            );
        }
        Ok(ids)
    }

    async fn get_building_collection(&self, group_id: GroupId) -> Result<Option<Collection>, StoreError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT id, group_id, status, item_count, created_at FROM collections
                 WHERE group_id = ?1 AND status = 'building'",
                rusqlite::params![group_id.to_string()],
                row_to_collection,
            )
            .optional()?;
        result.transpose()
    }

    async fn get_ready_collection(&self, group_id: GroupId) -> Result<Option<Collection>, StoreError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT id, group_id, status, item_count, created_at FROM collections
                 WHERE group_id = ?1 AND status = 'ready'",
                rusqlite::params![group_id.to_string()],
                row_to_collection,
            )
            .optional()?;
        result.transpose()
    }

    async fn get_collection(&self, id: CollectionId) -> Result<Option<Collection>, StoreError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT id, group_id, status, item_count, created_at FROM collections WHERE id = ?1",
                rusqlite::params![id.to_string()],
                row_to_collection,
            )
            .optional()?;
        result.transpose()
    }

    async fn create_building_collection(&self, group_id: GroupId) -> Result<Collection, StoreError> {
        let collection = Collection {
            id: CollectionId::new(),
            group_id,
            status: CollectionStatus::Building,
            item_count: 0,
            created_at: Utc::now(),
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO collections (id, group_id, status, item_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                collection.id.to_string(),
                collection.group_id.to_string(),
                collection_status_str(collection.status),
                collection.item_count as i64,
                collection.created_at.to_rfc3339(),
            ],
        )?;
        Ok(collection)
    }

    async fn increment_collection_item_count(
        &self,
        collection_id: CollectionId,
    ) -> Result<Collection, StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE collections SET item_count = item_count + 1 WHERE id = ?1",
            rusqlite::params![collection_id.to_string()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("collection {collection_id}")));
        }
        conn.query_row(
            "SELECT id, group_id, status, item_count, created_at FROM collections WHERE id = ?1",
            rusqlite::params![collection_id.to_string()],
            row_to_collection,
        )?
    }

    async fn set_collection_status(
        &self,
        collection_id: CollectionId,
        status: CollectionStatus,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE collections SET status = ?1 WHERE id = ?2",
            rusqlite::params![collection_status_str(status), collection_id.to_string()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("collection {collection_id}")));
        }
        Ok(())
    }

    async fn expire_stale_building_collections(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE collections SET status = 'expired'
             WHERE status IN ('building', 'ready') AND created_at < ?1",
            rusqlite::params![older_than.to_rfc3339()],
        )?;
        Ok(rows)
    }

    async fn insert_snapshot(&self, snapshot: &CollectionSnapshot) -> Result<(), StoreError> {
        let article_ids_json = serde_json::to_string(
            &snapshot.article_ids.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
        )?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO collection_snapshots (id, collection_id, group_id, article_ids, taken_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                snapshot.id.to_string(),
                snapshot.collection_id.to_string(),
                snapshot.group_id.to_string(),
                article_ids_json,
                snapshot.taken_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_snapshot(
        &self,
        id: CollectionSnapshotId,
    ) -> Result<Option<CollectionSnapshot>, StoreError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT id, collection_id, group_id, article_ids, taken_at FROM collection_snapshots WHERE id = ?1",
                rusqlite::params![id.to_string()],
                row_to_snapshot,
            )
            .optional()?;
        result.transpose()
    }

    async fn insert_episode(&self, episode: &Episode) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO episodes
                (id, group_id, collection_snapshot_id, status, script, title, description,
                 duration_seconds, created_at, failure_reason)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            rusqlite::params![
                episode.id.to_string(),
                episode.group_id.to_string(),
                episode.collection_snapshot_id.to_string(),
                episode_status_str(episode.status),
                episode.script,
                episode.title,
                episode.description,
                episode.duration_seconds,
                episode.created_at.to_rfc3339(),
                episode.failure_reason,
            ],
        )?;
        Ok(())
    }

    async fn get_episode(&self, id: EpisodeId) -> Result<Option<Episode>, StoreError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT id, group_id, collection_snapshot_id, status, script, title, description,
                        duration_seconds, created_at, failure_reason
                 FROM episodes WHERE id = ?1",
                rusqlite::params![id.to_string()],
                row_to_episode,
            )
            .optional()?;
        result.transpose()
    }

    async fn update_episode_status(
        &self,
        id: EpisodeId,
        status: EpisodeStatus,
        failure_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE episodes SET status = ?1, failure_reason = ?2 WHERE id = ?3",
            rusqlite::params![episode_status_str(status), failure_reason, id.to_string()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("episode {id}")));
        }
        Ok(())
    }

    async fn update_episode_script(&self, id: EpisodeId, script: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE episodes SET script = ?1 WHERE id = ?2",
            rusqlite::params![script, id.to_string()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("episode {id}")));
        }
        Ok(())
    }

    async fn update_episode_metadata(
        &self,
        id: EpisodeId,
        title: &str,
        description: &str,
        duration_seconds: f64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE episodes SET title = ?1, description = ?2, duration_seconds = ?3 WHERE id = ?4",
            rusqlite::params![title, description, duration_seconds, id.to_string()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("episode {id}")));
        }
        Ok(())
    }

    async fn list_stale_generating_episodes(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Episode>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, group_id, collection_snapshot_id, status, script, title, description,
                    duration_seconds, created_at, failure_reason
             FROM episodes WHERE status = 'generating' AND created_at < ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![older_than.to_rfc3339()], row_to_episode)?;
        let mut episodes = Vec::new();
        for row in rows {
            episodes.push(row??);
        }
        Ok(episodes)
    }

    async fn insert_audio_file(&self, audio: &AudioFile) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO audio_files (id, episode_id, url, duration_seconds, byte_size, format)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                audio.id.to_string(),
                audio.episode_id.to_string(),
                audio.url,
                audio.duration_seconds,
                audio.byte_size as i64,
                audio_format_str(audio.format),
            ],
        )?;
        Ok(())
    }

    async fn get_audio_file_for_episode(
        &self,
        episode_id: EpisodeId,
    ) -> Result<Option<AudioFile>, StoreError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT id, episode_id, url, duration_seconds, byte_size, format
                 FROM audio_files WHERE episode_id = ?1",
                rusqlite::params![episode_id.to_string()],
                row_to_audio_file,
            )
            .optional()?;
        result.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_group() -> Group {
        Group {
            id: GroupId::new(),
            name: "daily-tech".to_string(),
            presenter_ids: vec!["p1".to_string()],
            writer_id: "w1".to_string(),
            feed_ids: vec![FeedId::new()],
            min_articles: 3,
            cadence_bucket: CadenceBucket::High,
            last_episode_at: None,
            tag_filter: vec![],
        }
    }

    fn test_article(feed_id: FeedId) -> Article {
        Article {
            id: ArticleId::new(),
            feed_id,
            title: "t".to_string(),
            url: "https://example.com".to_string(),
            content: "c".to_string(),
            published_at: Utc::now(),
            fingerprint: "f1".to_string(),
            review_tier: ReviewTier::None,
            tags: vec![],
            summary: None,
            confidence: None,
            collection_id: None,
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn group_round_trips_vector_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let group = test_group();
        store.upsert_group(&group).await.unwrap();
        let loaded = store.get_group(group.id).await.unwrap().unwrap();
        assert_eq!(loaded.feed_ids, group.feed_ids);
        assert_eq!(loaded.presenter_ids, group.presenter_ids);
    }

    #[tokio::test]
    async fn article_review_update_is_single_write() {
        let store = SqliteStore::open_in_memory().unwrap();
        let group = test_group();
        let article = test_article(group.feed_ids[0]);
        store.insert_article(&article).await.unwrap();

        store
            .update_article_review(
                article.id,
                ReviewTier::Light,
                &["news".to_string()],
                "summary",
                0.9,
                Utc::now(),
            )
            .await
            .unwrap();

        let loaded = store.get_article(article.id).await.unwrap().unwrap();
        assert_eq!(loaded.review_tier, ReviewTier::Light);
        assert_eq!(loaded.confidence, Some(0.9));
    }

    #[tokio::test]
    async fn collection_lifecycle() {
        let store = SqliteStore::open_in_memory().unwrap();
        let group = test_group();
        store.upsert_group(&group).await.unwrap();

        assert!(store.get_building_collection(group.id).await.unwrap().is_none());
        let collection = store.create_building_collection(group.id).await.unwrap();
        assert_eq!(collection.status, CollectionStatus::Building);

        let updated = store.increment_collection_item_count(collection.id).await.unwrap();
        assert_eq!(updated.item_count, 1);

        store
            .set_collection_status(collection.id, CollectionStatus::Ready)
            .await
            .unwrap();
        let ready = store.get_ready_collection(group.id).await.unwrap().unwrap();
        assert_eq!(ready.id, collection.id);
    }

    #[tokio::test]
    async fn episode_and_audio_file_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let group = test_group();
        store.upsert_group(&group).await.unwrap();
        let snapshot = CollectionSnapshot {
            id: CollectionSnapshotId::new(),
            collection_id: CollectionId::new(),
            group_id: group.id,
            article_ids: vec![ArticleId::new(), ArticleId::new()],
            taken_at: Utc::now(),
        };
        store.insert_snapshot(&snapshot).await.unwrap();
        let loaded_snapshot = store.get_snapshot(snapshot.id).await.unwrap().unwrap();
        assert_eq!(loaded_snapshot.article_ids.len(), 2);

        let episode = Episode {
            id: EpisodeId::new(),
            group_id: group.id,
            collection_snapshot_id: snapshot.id,
            status: EpisodeStatus::Generating,
            script: None,
            title: None,
            description: None,
            duration_seconds: None,
            created_at: Utc::now(),
            failure_reason: None,
        };
        store.insert_episode(&episode).await.unwrap();
        store.update_episode_script(episode.id, "Speaker 1: hi").await.unwrap();
        store
            .update_episode_metadata(episode.id, "Title", "Desc", 120.0)
            .await
            .unwrap();
        store
            .update_episode_status(episode.id, EpisodeStatus::Completed, None)
            .await
            .unwrap();

        let loaded = store.get_episode(episode.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EpisodeStatus::Completed);
        assert_eq!(loaded.title.as_deref(), Some("Title"));

        let audio = AudioFile {
            id: AudioFileId::new(),
            episode_id: episode.id,
            url: "https://cdn.example.com/a.mp3".to_string(),
            duration_seconds: 120.0,
            byte_size: 4096,
            format: AudioFormat::Mp3,
        };
        store.insert_audio_file(&audio).await.unwrap();
        let loaded_audio = store.get_audio_file_for_episode(episode.id).await.unwrap().unwrap();
        assert_eq!(loaded_audio.url, audio.url);
    }

    #[tokio::test]
    async fn stale_generating_episodes_are_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let group = test_group();
        store.upsert_group(&group).await.unwrap();
        let snapshot_id = CollectionSnapshotId::new();
        let episode = Episode {
            id: EpisodeId::new(),
            group_id: group.id,
            collection_snapshot_id: snapshot_id,
            status: EpisodeStatus::Generating,
            script: None,
            title: None,
            description: None,
            duration_seconds: None,
            created_at: Utc::now() - chrono::Duration::hours(3),
            failure_reason: None,
        };
        store.insert_episode(&episode).await.unwrap();

        let stale = store
            .list_stale_generating_episodes(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, episode.id);
    }
}
