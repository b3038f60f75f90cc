//! SQLite-backed document cache.
//!
//! The cache mirrors every synchronized document as one row of the `nodes` table, plus the
//! degree centrality of the last graph build in `centrality`. The `vectors` table lives in the
//! same database but is owned by [`crate::vector::VectorIndex`].

use crate::{
    error::RouxError,
    paths::os_path_to_string,
    properties::{
        Centrality, ListFilter, ListOptions, ListResult, Node, ResolveOptions, ResolvedName,
        SourceKind, SourceRef, TagMode,
    },
    query::{self, NodeStore},
};
use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{Migration as SqlxMigration, MigrationSource, MigrationType, Migrator},
    pool::PoolOptions,
    sqlite::{Sqlite, SqliteConnectOptions, SqliteRow},
    ConnectOptions, Pool, QueryBuilder, Row,
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// <https://www.sqlite.org/limits.html#max_variable_number>
pub const SQLITE_LIMIT_VARIABLE_NUMBER: usize = 32766;

const NODE_COLUMNS: &str = "id, title, content, tags, outgoing_links, properties, \
                            source_type, source_path, source_modified";

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

fn migrations() -> MigrationList {
    MigrationList(vec![Migration {
        version: 1,
        description: "create_initial_tables",
        sql: "\
            CREATE TABLE nodes (id TEXT PRIMARY KEY, title TEXT, content TEXT, tags TEXT, \
                outgoing_links TEXT, properties TEXT, source_type TEXT, source_path TEXT, \
                source_modified INTEGER); \
            CREATE INDEX idx_nodes_source_path ON nodes(source_path); \
            CREATE UNIQUE INDEX idx_nodes_source_path_nocase ON nodes(lower(source_path)); \
            CREATE TABLE centrality (node_id TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE, \
                pagerank REAL, in_degree INTEGER, out_degree INTEGER, computed_at INTEGER); \
            CREATE TABLE vectors (id TEXT PRIMARY KEY, model TEXT NOT NULL, vector BLOB NOT NULL);",
        kind: MigrationType::ReversibleUp,
    }])
}

/// Open (creating if missing) the cache database at `db_path` and bring its schema up to date.
pub async fn db_init(db_path: PathBuf) -> Result<Pool<Sqlite>, RouxError> {
    tracing::debug!("Initializing cache db from file: {:?}", db_path);
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .read_only(false)
        .foreign_keys(true)
        .disable_statement_logging()
        .create_if_missing(true);

    let pool = PoolOptions::<Sqlite>::new().connect_with(options).await?;

    let migrator = Migrator::new(migrations()).await?;
    migrator.run(&pool).await?;

    let count_res = sqlx::query("SELECT COUNT(*) FROM nodes;")
        .fetch_one(&pool)
        .await?;
    let vec_res = sqlx::query("SELECT COUNT(*) FROM vectors;")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tCached node count:\t{:?} \n \
         \tStored vector count:\t{:?}",
        count_res.get::<i64, usize>(0),
        vec_res.get::<i64, usize>(0)
    );

    Ok(pool)
}

/// Source path and modification time of a cached row, used for change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSource {
    pub id: String,
    pub modified: i64,
}

#[derive(Debug, Clone)]
pub struct DocumentCache {
    pool: Pool<Sqlite>,
    root: PathBuf,
}

fn decode_json<T: serde::de::DeserializeOwned + Default>(
    raw: Option<String>,
    column: &str,
    id: &str,
) -> Result<T, RouxError> {
    match raw {
        None => Ok(T::default()),
        Some(text) if text.is_empty() => Ok(T::default()),
        Some(text) => serde_json::from_str(&text).map_err(|e| {
            RouxError::Serialization(format!("column {column} of node {id} is not valid JSON: {e}"))
        }),
    }
}

fn row_to_node(row: &SqliteRow) -> Result<Node, RouxError> {
    let id: String = row.try_get("id")?;
    let tags = decode_json(row.try_get("tags")?, "tags", &id)?;
    let outgoing_links = decode_json(row.try_get("outgoing_links")?, "outgoing_links", &id)?;
    let properties = decode_json(row.try_get("properties")?, "properties", &id)?;
    let source_path: Option<String> = row.try_get("source_path")?;
    let source_ref = match source_path {
        Some(path) => {
            let kind: Option<String> = row.try_get("source_type")?;
            let modified: Option<i64> = row.try_get("source_modified")?;
            Some(SourceRef {
                kind: kind
                    .as_deref()
                    .map(str::parse)
                    .transpose()?
                    .unwrap_or_default(),
                path: PathBuf::from(path),
                last_modified: modified.unwrap_or(0),
            })
        }
        None => None,
    };
    Ok(Node {
        title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
        content: row.try_get::<Option<String>, _>("content")?.unwrap_or_default(),
        id,
        tags,
        outgoing_links,
        properties,
        source_ref,
    })
}

impl DocumentCache {
    pub fn new<P: AsRef<Path>>(pool: Pool<Sqlite>, root: P) -> Self {
        DocumentCache {
            pool,
            root: root.as_ref().to_path_buf(),
        }
    }

    pub async fn open<P: AsRef<Path>>(db_path: PathBuf, root: P) -> Result<Self, RouxError> {
        Ok(DocumentCache::new(db_init(db_path).await?, root))
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[tracing::instrument(skip_all, fields(id = %node.id))]
    pub async fn upsert(&self, node: &Node) -> Result<(), RouxError> {
        let (source_type, source_path, source_modified) = match &node.source_ref {
            Some(src) => (
                Some(src.kind.as_str()),
                Some(os_path_to_string(&src.path)),
                Some(src.last_modified),
            ),
            None => (None, None, None),
        };
        sqlx::query(
            "INSERT INTO nodes (id, title, content, tags, outgoing_links, properties, \
                source_type, source_path, source_modified) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                title = excluded.title, content = excluded.content, tags = excluded.tags, \
                outgoing_links = excluded.outgoing_links, properties = excluded.properties, \
                source_type = excluded.source_type, source_path = excluded.source_path, \
                source_modified = excluded.source_modified",
        )
        .bind(&node.id)
        .bind(&node.title)
        .bind(&node.content)
        .bind(serde_json::to_string(&node.tags)?)
        .bind(serde_json::to_string(&node.outgoing_links)?)
        .bind(serde_json::to_string(&node.properties)?)
        .bind(source_type)
        .bind(source_path)
        .bind(source_modified)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Node>, RouxError> {
        let row = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_node).transpose()
    }

    /// Nodes for the given ids in request order. Unknown ids are skipped.
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Node>, RouxError> {
        let mut found = BTreeMap::new();
        for chunk in ids.chunks(SQLITE_LIMIT_VARIABLE_NUMBER) {
            let mut qb =
                QueryBuilder::<Sqlite>::new(format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id IN ("));
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            qb.push(")");
            for row in qb.build().fetch_all(&self.pool).await? {
                let node = row_to_node(&row)?;
                found.insert(node.id.clone(), node);
            }
        }
        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    /// Case-insensitive lookup by absolute source path.
    pub async fn get_by_path<P: AsRef<Path>>(&self, path: P) -> Result<Option<Node>, RouxError> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE lower(source_path) = lower(?)"
        ))
        .bind(os_path_to_string(path.as_ref()))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_node).transpose()
    }

    pub async fn load_all(&self) -> Result<Vec<Node>, RouxError> {
        sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY id"))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_node)
            .collect()
    }

    /// Removes the node; centrality follows through the foreign key.
    pub async fn delete(&self, id: &str) -> Result<bool, RouxError> {
        let res = sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Remove the row tracking `path`, returning the id it carried.
    pub async fn delete_by_path<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<Option<String>, RouxError> {
        let id: Option<String> =
            sqlx::query_scalar("DELETE FROM nodes WHERE lower(source_path) = lower(?) RETURNING id")
                .bind(os_path_to_string(path.as_ref()))
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    /// Tracked source paths with the id and modification time recorded for each.
    pub async fn tracked_sources(&self) -> Result<BTreeMap<String, TrackedSource>, RouxError> {
        let rows = sqlx::query_as::<_, (String, String, Option<i64>)>(
            "SELECT source_path, id, source_modified FROM nodes WHERE source_path IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(path, id, modified)| {
                (
                    path,
                    TrackedSource {
                        id,
                        modified: modified.unwrap_or(0),
                    },
                )
            })
            .collect())
    }

    pub async fn update_outgoing_links(&self, id: &str, links: &[String]) -> Result<(), RouxError> {
        sqlx::query("UPDATE nodes SET outgoing_links = ? WHERE id = ?")
            .bind(serde_json::to_string(links)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace every centrality record with `records`.
    pub async fn store_centrality(
        &self,
        records: &BTreeMap<String, Centrality>,
    ) -> Result<(), RouxError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM centrality").execute(&mut *tx).await?;
        let rows: Vec<_> = records.iter().collect();
        for chunk in rows.chunks(SQLITE_LIMIT_VARIABLE_NUMBER / 5) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO centrality (node_id, pagerank, in_degree, out_degree, computed_at) ",
            );
            qb.push_values(chunk, |mut b, (id, c)| {
                b.push_bind(id.as_str())
                    .push_bind(c.pagerank)
                    .push_bind(c.in_degree as i64)
                    .push_bind(c.out_degree as i64)
                    .push_bind(c.computed_at);
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_centrality(&self, id: &str) -> Result<Option<Centrality>, RouxError> {
        let row = sqlx::query_as::<_, (f64, i64, i64, i64)>(
            "SELECT pagerank, in_degree, out_degree, computed_at FROM centrality WHERE node_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(pagerank, in_degree, out_degree, computed_at)| Centrality {
            in_degree: in_degree as usize,
            out_degree: out_degree as usize,
            pagerank,
            computed_at,
        }))
    }

    pub async fn count(&self) -> Result<usize, RouxError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub async fn search_by_tags(
        &self,
        tags: &[String],
        mode: TagMode,
        limit: Option<usize>,
    ) -> Result<Vec<Node>, RouxError> {
        query::search_by_tags(self, tags, mode, limit).await
    }

    pub async fn list(
        &self,
        filter: &ListFilter,
        options: ListOptions,
    ) -> Result<ListResult, RouxError> {
        query::list_nodes(self, &self.root, filter, options).await
    }

    pub async fn resolve_names(
        &self,
        names: &[String],
        options: ResolveOptions,
    ) -> Result<Vec<ResolvedName>, RouxError> {
        query::resolve_names(self, names, options).await
    }
}

impl NodeStore for DocumentCache {
    async fn load_all(&self) -> Result<Vec<Node>, RouxError> {
        DocumentCache::load_all(self).await
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<Node>, RouxError> {
        DocumentCache::get_many(self, ids).await
    }

    async fn get(&self, id: &str) -> Result<Option<Node>, RouxError> {
        DocumentCache::get(self, id).await
    }

    async fn upsert(&self, node: &Node) -> Result<(), RouxError> {
        DocumentCache::upsert(self, node).await
    }

    async fn delete(&self, id: &str) -> Result<bool, RouxError> {
        DocumentCache::delete(self, id).await
    }
}
