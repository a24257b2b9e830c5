//! Workspace: the filesystem root under which the SQLite database, the
//! orbit-file archive and the config file live.
//!
//! A [`Workspace`] is constructed once per invocation and passed by
//! reference to the stores; there are no process-wide singletons.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::Result;
use crate::request::Source;

pub const CONFIG_FILE: &str = "space.toml";
pub const DB_FILE: &str = "space.db";
pub const SATDB_DIR: &str = "satdb";

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub satellites: SatellitesConfig,
    pub spacetrack: Option<SpaceTrackCredentials>,
    pub center: CenterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SatellitesConfig {
    /// Source used when a selector has no `@src` field.
    #[serde(rename = "default-orbit-type")]
    pub default_orbit_type: String,
    /// Run a registry sync after every TLE fetch or insert.
    #[serde(rename = "auto-sync-tle")]
    pub auto_sync_tle: bool,
}

impl Default for SatellitesConfig {
    fn default() -> Self {
        Self {
            default_orbit_type: "tle".to_string(),
            auto_sync_tle: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct SpaceTrackCredentials {
    pub identity: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CenterConfig {
    /// Originator field written into CCSDS files.
    pub name: String,
}

impl Default for CenterConfig {
    fn default() -> Self {
        Self {
            name: "N/A".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn default_src(&self) -> Source {
        Source::parse(&self.satellites.default_orbit_type)
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
    pub db: SqlitePool,
}

impl Workspace {
    /// Open (creating if needed) the workspace rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let config = Config::load(&root.join(CONFIG_FILE))?;

        let options = SqliteConnectOptions::new()
            .filename(root.join(DB_FILE))
            .create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        init_schema(&db).await?;

        Ok(Workspace { root, config, db })
    }

    /// `$SPACE_WORKSPACE`, falling back to `~/.space`.
    pub fn default_root() -> PathBuf {
        if let Ok(dir) = std::env::var("SPACE_WORKSPACE") {
            return PathBuf::from(dir);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Path::new(&home).join(".space")
    }

    /// Root of the per-satellite orbit-file archive.
    pub fn satdb_dir(&self) -> PathBuf {
        self.root.join(SATDB_DIR)
    }
}

async fn init_schema(db: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tle (
            norad_id INTEGER NOT NULL,
            cospar_id TEXT NOT NULL,
            name TEXT NOT NULL,
            data TEXT NOT NULL,
            epoch DATETIME NOT NULL,
            src TEXT NOT NULL,
            insert_date DATETIME NOT NULL
        )",
    )
    .execute(db)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS tle_norad_epoch
            ON tle (norad_id DESC, epoch DESC)",
    )
    .execute(db)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sat (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            norad_id INTEGER,
            cospar_id TEXT,
            name TEXT NOT NULL,
            comment TEXT
        )",
    )
    .execute(db)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS alias (
            name TEXT NOT NULL UNIQUE,
            selector TEXT NOT NULL
        )",
    )
    .execute(db)
    .await?;

    // Bootstrap alias so `ISS` works on a fresh workspace.
    let created = sqlx::query("INSERT OR IGNORE INTO alias (name, selector) VALUES (?, ?)")
        .bind("ISS")
        .bind("norad_id=25544")
        .execute(db)
        .await?;
    if created.rows_affected() > 0 {
        debug!("created ISS alias");
    }

    Ok(())
}
