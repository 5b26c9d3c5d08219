//! SQLite-backed transcript cache.

use super::{CacheEntry, CacheLookup, CachedTranscript, MatchTier, Mode, ModeSelector};
use crate::episode::{Episode, EpisodeIdentity};
use crate::error::{HentError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, ToSql};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS episodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        podcast TEXT NOT NULL,
        title TEXT NOT NULL,
        title_key TEXT NOT NULL,
        published TEXT NOT NULL,
        published_date TEXT NOT NULL,
        guid TEXT,
        audio_url TEXT,
        transcript_url TEXT,
        description TEXT,
        link TEXT,
        duration TEXT,
        transcript TEXT,
        transcript_source TEXT,
        summary TEXT,
        paragraph_summary TEXT,
        transcript_test TEXT,
        transcript_test_source TEXT,
        summary_test TEXT,
        paragraph_summary_test TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_episodes_guid ON episodes(guid);
    CREATE INDEX IF NOT EXISTS idx_episodes_identity
        ON episodes(podcast, title_key, published_date);
"#;

/// Column names owned by one mode.
struct ModeColumns {
    transcript: &'static str,
    source: &'static str,
    summary: &'static str,
    paragraph: &'static str,
}

fn columns(mode: Mode) -> ModeColumns {
    match mode {
        Mode::Full => ModeColumns {
            transcript: "transcript",
            source: "transcript_source",
            summary: "summary",
            paragraph: "paragraph_summary",
        },
        Mode::Test => ModeColumns {
            transcript: "transcript_test",
            source: "transcript_test_source",
            summary: "summary_test",
            paragraph: "paragraph_summary_test",
        },
    }
}

/// SELECT list and filter for a mode selector.
///
/// Every expression yields (transcript, source, mode, summary, paragraph).
fn projection(selector: ModeSelector) -> (String, String) {
    match selector {
        ModeSelector::Strict(mode) => {
            let c = columns(mode);
            (
                format!(
                    "id, {t}, {s}, '{m}', {sum}, {p}",
                    t = c.transcript,
                    s = c.source,
                    m = mode.as_str(),
                    sum = c.summary,
                    p = c.paragraph
                ),
                format!("{} IS NOT NULL", c.transcript),
            )
        }
        ModeSelector::Any => (
            "id, COALESCE(transcript, transcript_test), \
             CASE WHEN transcript IS NOT NULL THEN transcript_source ELSE transcript_test_source END, \
             CASE WHEN transcript IS NOT NULL THEN 'full' ELSE 'test' END, \
             CASE WHEN transcript IS NOT NULL THEN summary ELSE summary_test END, \
             CASE WHEN transcript IS NOT NULL THEN paragraph_summary ELSE paragraph_summary_test END"
                .to_string(),
            "(transcript IS NOT NULL OR transcript_test IS NOT NULL)".to_string(),
        ),
    }
}

fn row_to_hit(row: &Row<'_>, tier: MatchTier) -> rusqlite::Result<CachedTranscript> {
    let mode: String = row.get(3)?;
    Ok(CachedTranscript {
        record_id: row.get(0)?,
        transcript: row.get(1)?,
        source: row.get(2)?,
        mode: if mode == "test" { Mode::Test } else { Mode::Full },
        summary: row.get(4)?,
        paragraph_summary: row.get(5)?,
        tier,
        degraded: tier.is_degraded(),
    })
}

/// Record counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub records: u64,
    pub full_transcripts: u64,
    pub test_transcripts: u64,
}

/// Read-only connections opened next to the writer for file-backed caches.
const READERS: usize = 4;

/// Transcript cache on SQLite.
///
/// Writes go through one connection behind a mutex, so they are serialized.
/// File-backed caches run in WAL mode and serve reads from a small pool of
/// read-only connections, so readers never wait on the writer. An in-memory
/// cache has no pool and reads through the writer.
pub struct TranscriptCache {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    title_only_match: bool,
}

impl TranscriptCache {
    /// Open or create the cache at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;

        let readers = (0..READERS)
            .map(|_| {
                let reader = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                reader.busy_timeout(BUSY_TIMEOUT)?;
                Ok(Mutex::new(reader))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(readers = readers.len(), "Opened transcript cache at {:?}", path);

        Ok(Self {
            writer: Mutex::new(conn),
            readers,
            next_reader: AtomicUsize::new(0),
            title_only_match: true,
        })
    }

    /// In-memory cache for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            writer: Mutex::new(conn),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
            title_only_match: true,
        })
    }

    /// Enable or disable the title-only (date ignoring) lookup tier.
    pub fn with_title_only_match(mut self, enabled: bool) -> Self {
        self.title_only_match = enabled;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|e| HentError::Cache(format!("Failed to acquire lock: {}", e)))
    }

    /// A free read-only connection, else the next one in turn.
    fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        if self.readers.is_empty() {
            return self.lock();
        }

        let start = self.next_reader.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.readers.len() {
            let slot = &self.readers[(start + offset) % self.readers.len()];
            if let Ok(conn) = slot.try_lock() {
                return Ok(conn);
            }
        }
        self.readers[start % self.readers.len()]
            .lock()
            .map_err(|e| HentError::Cache(format!("Failed to acquire reader: {}", e)))
    }

    fn find_record(conn: &Connection, identity: &EpisodeIdentity) -> Result<Option<i64>> {
        if let Some(guid) = &identity.guid {
            let id = conn
                .query_row("SELECT id FROM episodes WHERE guid = ?1", params![guid], |r| r.get(0))
                .optional()?;
            if id.is_some() {
                return Ok(id);
            }
        }

        let id = conn
            .query_row(
                r#"
                SELECT id FROM episodes
                WHERE podcast = ?1 AND title_key = ?2 AND published_date = ?3
                ORDER BY id LIMIT 1
                "#,
                params![
                    identity.podcast,
                    identity.title_key,
                    identity.date.format("%Y-%m-%d").to_string()
                ],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Upsert a transcript for `episode` under `mode`. Returns the record id.
    ///
    /// Only the columns of `mode` are touched among the per-mode fields.
    /// Episode metadata is refreshed on every write.
    #[instrument(skip(self, episode, entry), fields(podcast = %episode.podcast, title = %episode.title, mode = %mode))]
    pub fn write(&self, episode: &Episode, mode: Mode, entry: &CacheEntry<'_>) -> Result<i64> {
        let conn = self.lock()?;
        let identity = episode.identity();
        let c = columns(mode);
        let now = Utc::now().to_rfc3339();
        let date = identity.date.format("%Y-%m-%d").to_string();

        let id = match Self::find_record(&conn, &identity)? {
            Some(id) => {
                let sql = format!(
                    r#"
                    UPDATE episodes SET
                        title = ?1, title_key = ?2, published = ?3, published_date = ?4,
                        guid = COALESCE(?5, guid),
                        audio_url = COALESCE(?6, audio_url),
                        transcript_url = COALESCE(?7, transcript_url),
                        description = COALESCE(?8, description),
                        link = COALESCE(?9, link),
                        duration = COALESCE(?10, duration),
                        {t} = ?11, {s} = ?12,
                        {sum} = COALESCE(?13, {sum}),
                        {p} = COALESCE(?14, {p}),
                        updated_at = ?15
                    WHERE id = ?16
                    "#,
                    t = c.transcript,
                    s = c.source,
                    sum = c.summary,
                    p = c.paragraph
                );
                conn.execute(
                    &sql,
                    params![
                        episode.title,
                        identity.title_key,
                        episode.published.to_rfc3339(),
                        date,
                        identity.guid,
                        episode.audio_url,
                        episode.transcript_url,
                        episode.description,
                        episode.link,
                        episode.duration,
                        entry.transcript,
                        entry.source,
                        entry.summary,
                        entry.paragraph_summary,
                        now,
                        id,
                    ],
                )?;
                debug!(record_id = id, "Updated cache record");
                id
            }
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO episodes
                    (podcast, title, title_key, published, published_date, guid, audio_url,
                     transcript_url, description, link, duration, {t}, {s}, {sum}, {p},
                     created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
                    "#,
                    t = c.transcript,
                    s = c.source,
                    sum = c.summary,
                    p = c.paragraph
                );
                conn.execute(
                    &sql,
                    params![
                        episode.podcast,
                        episode.title,
                        identity.title_key,
                        episode.published.to_rfc3339(),
                        date,
                        identity.guid,
                        episode.audio_url,
                        episode.transcript_url,
                        episode.description,
                        episode.link,
                        episode.duration,
                        entry.transcript,
                        entry.source,
                        entry.summary,
                        entry.paragraph_summary,
                        now,
                    ],
                )?;
                let id = conn.last_insert_rowid();
                debug!(record_id = id, "Inserted cache record");
                id
            }
        };

        Ok(id)
    }

    /// Store summaries for an existing record under `mode`.
    pub fn update_summary(
        &self,
        record_id: i64,
        mode: Mode,
        summary: &str,
        paragraph_summary: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let c = columns(mode);
        let sql = format!(
            "UPDATE episodes SET {sum} = ?1, {p} = COALESCE(?2, {p}), updated_at = ?3 WHERE id = ?4",
            sum = c.summary,
            p = c.paragraph
        );
        let changed = conn.execute(
            &sql,
            params![summary, paragraph_summary, Utc::now().to_rfc3339(), record_id],
        )?;
        if changed == 0 {
            return Err(HentError::Cache(format!("no cache record with id {}", record_id)));
        }
        Ok(())
    }

    /// Look up a transcript for `identity`.
    ///
    /// Tiers are tried in order: GUID, podcast + title + day, then podcast +
    /// title alone (most recent airing). Each tier only considers rows whose
    /// transcript column for the selected mode is populated.
    #[instrument(skip(self, identity), fields(podcast = %identity.podcast, title = %identity.title))]
    pub fn read(&self, identity: &EpisodeIdentity, selector: ModeSelector) -> Result<CacheLookup> {
        let conn = self.reader()?;
        let (select, filter) = projection(selector);

        if let Some(guid) = &identity.guid {
            let sql = format!("SELECT {} FROM episodes WHERE guid = ?1 AND {} LIMIT 1", select, filter);
            if let Some(hit) = Self::query_tier(&conn, &sql, params![guid], MatchTier::Guid)? {
                return Ok(CacheLookup::Hit(hit));
            }
        }

        let date = identity.date.format("%Y-%m-%d").to_string();
        let sql = format!(
            "SELECT {} FROM episodes WHERE podcast = ?1 AND title_key = ?2 AND published_date = ?3 AND {} LIMIT 1",
            select, filter
        );
        if let Some(hit) = Self::query_tier(
            &conn,
            &sql,
            params![identity.podcast, identity.title_key, date],
            MatchTier::ExactDate,
        )? {
            return Ok(CacheLookup::Hit(hit));
        }

        if self.title_only_match {
            let sql = format!(
                "SELECT {} FROM episodes WHERE podcast = ?1 AND title_key = ?2 AND {} ORDER BY published DESC LIMIT 1",
                select, filter
            );
            if let Some(hit) = Self::query_tier(
                &conn,
                &sql,
                params![identity.podcast, identity.title_key],
                MatchTier::TitleOnly,
            )? {
                warn!(
                    podcast = %identity.podcast,
                    title = %identity.title,
                    date = %identity.date,
                    record_id = hit.record_id,
                    "Degraded cache match on podcast and title only, publication date differs"
                );
                return Ok(CacheLookup::Hit(hit));
            }
        }

        debug!("Cache miss");
        Ok(CacheLookup::Miss)
    }

    fn query_tier(
        conn: &Connection,
        sql: &str,
        args: &[&dyn ToSql],
        tier: MatchTier,
    ) -> Result<Option<CachedTranscript>> {
        let hit = conn
            .query_row(sql, args, |row| row_to_hit(row, tier))
            .optional()?;
        Ok(hit)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.reader()?;
        let stats = conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(transcript IS NOT NULL), 0),
                   COALESCE(SUM(transcript_test IS NOT NULL), 0)
            FROM episodes
            "#,
            [],
            |r| {
                Ok(CacheStats {
                    records: r.get::<_, i64>(0)? as u64,
                    full_transcripts: r.get::<_, i64>(1)? as u64,
                    test_transcripts: r.get::<_, i64>(2)? as u64,
                })
            },
        )?;
        Ok(stats)
    }
}
