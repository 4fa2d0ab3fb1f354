use anyhow::Result;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::path::Path;
use tracing::info;

pub const MEMORY_DATABASE_URL: &str = "sqlite::memory:";

/// Build the SQLite URL for a cache file, creating its parent directory.
pub fn sqlite_url(cache_path: &str) -> Result<String> {
    if cache_path == ":memory:" || cache_path == MEMORY_DATABASE_URL {
        return Ok(MEMORY_DATABASE_URL.to_string());
    }
    if let Some(parent) = Path::new(cache_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(format!("sqlite://{}?mode=rwc", cache_path))
}

pub async fn get_db_connection(database_url: &str) -> Result<DatabaseConnection> {
    info!("Connecting to candle cache via Sea-ORM at: {}", database_url);
    let mut options = ConnectOptions::new(database_url.to_string());
    // Every pooled connection to `sqlite::memory:` would open its own empty database.
    if database_url.contains(":memory:") {
        options.max_connections(1).min_connections(1);
    } else {
        options.max_connections(4);
    }
    options.sqlx_logging(false);
    let db = Database::connect(options).await?;
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_url_for_memory() {
        assert_eq!(sqlite_url(":memory:").unwrap(), MEMORY_DATABASE_URL);
    }

    #[test]
    fn test_sqlite_url_for_file() {
        let dir = std::env::temp_dir().join("shared-sqlite-url-test");
        let path = dir.join("cache.db");
        let url = sqlite_url(path.to_str().unwrap()).unwrap();
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with("?mode=rwc"));
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_connect_in_memory() {
        let db = get_db_connection(MEMORY_DATABASE_URL).await.unwrap();
        db.ping().await.unwrap();
    }
}
