use crate::types::{AggregatorError, CandidatePost, PersistedPost, PostFilter, PostPage, Result, SourceStats};
use chrono::{Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

/// Rows per INSERT/SELECT statement, well under SQLite's bind limit.
const CHUNK_SIZE: usize = 500;

pub const MAX_PAGE_SIZE: u32 = 100;

const POST_COLUMNS: &str = "id, title, url, source, published_at, created_at, updated_at";

/// Connection pool for the post store.
///
/// Transactions are handed to callers; every write below only runs on a
/// connection the caller passes in and commits itself.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database. Limited to one connection that never
    /// expires, since every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn setup_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                published_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                search_text TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_source ON posts (source)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_published_at ON posts (published_at DESC)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_source_published_at ON posts (source, published_at DESC)")
            .execute(&self.pool)
            .await?;

        debug!("Post schema ready");
        Ok(())
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Idempotent bulk insert keyed on url.
///
/// Rows that already exist are left untouched. Returns every stored row whose
/// url was submitted, new or pre-existing, in submission order.
pub async fn create_posts(conn: &mut SqliteConnection, posts: &[CandidatePost]) -> Result<Vec<PersistedPost>> {
    if posts.is_empty() {
        return Ok(Vec::new());
    }

    let now = Utc::now();
    let mut inserted = 0u64;

    for chunk in posts.chunks(CHUNK_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO posts (title, url, source, published_at, created_at, updated_at, search_text) ");
        builder.push_values(chunk, |mut row, post| {
            row.push_bind(&post.title)
                .push_bind(&post.url)
                .push_bind(&post.source)
                .push_bind(post.published_at)
                .push_bind(now)
                .push_bind(now)
                .push_bind(search_text(&post.title, &post.url));
        });
        builder.push(" ON CONFLICT(url) DO NOTHING");

        inserted += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    let urls: Vec<&str> = posts.iter().map(|p| p.url.as_str()).collect();
    let mut stored = select_by_urls(conn, &urls).await?;

    let order: HashMap<&str, usize> = urls.iter().enumerate().map(|(i, url)| (*url, i)).rev().collect();
    stored.sort_by_key(|post| order.get(post.url.as_str()).copied().unwrap_or(usize::MAX));

    info!(
        "Stored {} new posts out of {} submitted ({} rows returned)",
        inserted,
        posts.len(),
        stored.len()
    );
    Ok(stored)
}

async fn select_by_urls(conn: &mut SqliteConnection, urls: &[&str]) -> Result<Vec<PersistedPost>> {
    let mut rows = Vec::with_capacity(urls.len());

    for chunk in urls.chunks(CHUNK_SIZE) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {} FROM posts WHERE url IN (", POST_COLUMNS));
        let mut separated = builder.separated(", ");
        for url in chunk {
            separated.push_bind(*url);
        }
        separated.push_unseparated(")");

        let found = builder.build_query_as::<PersistedPost>().fetch_all(&mut *conn).await?;
        rows.extend(found);
    }

    Ok(rows)
}

/// Delete posts published strictly before `now - max_age`. Returns the
/// number of rows removed. An age that reaches past the representable date
/// range is rejected as `InvalidConfig`.
pub async fn delete_older_than(conn: &mut SqliteConnection, max_age: Duration) -> Result<u64> {
    let cutoff = Utc::now()
        .checked_sub_signed(max_age)
        .ok_or_else(|| AggregatorError::InvalidConfig(format!("retention age out of range: {}", max_age)))?;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE published_at < ?")
        .bind(cutoff)
        .fetch_one(&mut *conn)
        .await?;

    if count == 0 {
        return Ok(0);
    }

    let deleted = sqlx::query("DELETE FROM posts WHERE published_at < ?")
        .bind(cutoff)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    info!("Deleted {} posts published before {}", deleted, cutoff);
    Ok(deleted)
}

/// One page of posts, newest first, optionally filtered by source and by a
/// case-insensitive substring of title or url.
pub async fn list_posts(conn: &mut SqliteConnection, page: u32, size: u32, filter: &PostFilter) -> Result<PostPage> {
    let page = page.max(1);
    let size = size.clamp(1, MAX_PAGE_SIZE);
    let offset = i64::from(page - 1) * i64::from(size);

    let mut count_query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM posts");
    push_filter(&mut count_query, filter);
    let total: i64 = count_query.build_query_scalar::<i64>().fetch_one(&mut *conn).await?;

    let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {} FROM posts", POST_COLUMNS));
    push_filter(&mut select, filter);
    select.push(" ORDER BY published_at DESC, id DESC LIMIT ");
    select.push_bind(i64::from(size));
    select.push(" OFFSET ");
    select.push_bind(offset);

    let posts = select.build_query_as::<PersistedPost>().fetch_all(&mut *conn).await?;
    let size_i64 = i64::from(size);

    Ok(PostPage {
        size: posts.len(),
        posts,
        total,
        page,
        pages: (total + size_i64 - 1) / size_i64,
    })
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &PostFilter) {
    let source = filter.source.as_deref().filter(|s| !s.is_empty());
    let search = filter.search.as_deref().filter(|s| !s.is_empty());

    if source.is_none() && search.is_none() {
        return;
    }

    builder.push(" WHERE ");
    if let Some(source) = source {
        builder.push("source = ");
        builder.push_bind(source.to_string());
        if search.is_some() {
            builder.push(" AND ");
        }
    }
    if let Some(search) = search {
        builder.push("search_text LIKE ");
        builder.push_bind(format!("%{}%", search.to_lowercase()));
    }
}

// SQLite only folds ASCII case in LIKE, so both sides are lowercased here.
fn search_text(title: &str, url: &str) -> String {
    format!("{}\n{}", title, url).to_lowercase()
}

pub async fn get_post(conn: &mut SqliteConnection, id: i64) -> Result<Option<PersistedPost>> {
    let post = sqlx::query_as::<_, PersistedPost>(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(post)
}

/// Newest posts for one source; `limit` is clamped to 1..=100.
pub async fn posts_by_source(conn: &mut SqliteConnection, source: &str, limit: u32) -> Result<Vec<PersistedPost>> {
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    let posts = sqlx::query_as::<_, PersistedPost>(&format!(
        "SELECT {} FROM posts WHERE source = ? ORDER BY published_at DESC, id DESC LIMIT ?",
        POST_COLUMNS
    ))
    .bind(source)
    .bind(i64::from(limit))
    .fetch_all(&mut *conn)
    .await?;
    Ok(posts)
}

pub async fn source_stats(conn: &mut SqliteConnection) -> Result<Vec<SourceStats>> {
    let stats = sqlx::query_as::<_, SourceStats>(
        r#"
        SELECT source, COUNT(id) AS total_posts, MAX(published_at) AS latest_post
        FROM posts
        GROUP BY source
        ORDER BY total_posts DESC, source ASC
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(stats)
}
