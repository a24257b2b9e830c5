//! Two-line-element records and their append-only time-series store.
//!
//! Field extraction (catalog number, COSPAR id, epoch) is delegated to the
//! `sgp4` crate; this module only scans raw text for line pairs and keeps
//! the records in SQLite, deduplicated by (norad_id, epoch).

use chrono::{Duration, NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::request::{Limit, Selector};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tle {
    pub norad_id: i64,
    pub cospar_id: String,
    pub name: String,
    /// The two element lines, newline separated.
    pub data: String,
    pub epoch: NaiveDateTime,
    pub src: String,
}

impl Tle {
    pub fn from_lines(name: &str, line1: &str, line2: &str, src: &str) -> Result<Self> {
        let elements =
            sgp4::Elements::from_tle(Some(name.to_string()), line1.as_bytes(), line2.as_bytes())
                .map_err(|e| Error::Tle(e.to_string()))?;

        let name = elements
            .object_name
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(Tle {
            norad_id: elements.norad_id as i64,
            cospar_id: elements.international_designator.clone().unwrap_or_default(),
            name,
            data: format!("{line1}\n{line2}"),
            epoch: elements.datetime,
            src: src.to_string(),
        })
    }

    /// Scan a text block for TLEs. A line pair `1 …` / `2 …` forms a
    /// record, optionally preceded by a name line (`0 ` prefix stripped).
    /// Unparseable pairs are skipped with a warning.
    pub fn parse_all(text: &str, src: &str) -> Vec<Tle> {
        let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
        let mut tles = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            if lines[i].starts_with("1 ") && i + 1 < lines.len() && lines[i + 1].starts_with("2 ")
            {
                let name = if i > 0 { name_line(lines[i - 1]) } else { "" };
                match Tle::from_lines(name, lines[i], lines[i + 1], src) {
                    Ok(tle) => tles.push(tle),
                    Err(e) => warn!("skipping invalid TLE: {e}"),
                }
                i += 2;
            } else {
                i += 1;
            }
        }

        tles
    }

    fn lines(&self) -> (&str, &str) {
        self.data.split_once('\n').unwrap_or((&self.data, ""))
    }

    pub fn elements(&self) -> Result<sgp4::Elements> {
        let (line1, line2) = self.lines();
        sgp4::Elements::from_tle(Some(self.name.clone()), line1.as_bytes(), line2.as_bytes())
            .map_err(|e| Error::Tle(e.to_string()))
    }

    /// TEME position [km] and velocity [km/s] at `date`.
    pub fn propagate(&self, date: NaiveDateTime) -> Result<([f64; 3], [f64; 3])> {
        let elements = self.elements()?;
        let constants =
            sgp4::Constants::from_elements(&elements).map_err(|e| Error::Tle(e.to_string()))?;

        let elapsed_ms = date.signed_duration_since(elements.datetime).num_milliseconds();
        let prediction = constants
            .propagate(sgp4::MinutesSinceEpoch(elapsed_ms as f64 / 60_000.0))
            .map_err(|e| Error::Tle(e.to_string()))?;

        Ok((prediction.position, prediction.velocity))
    }

    /// Propagated states over `[start, stop]` at a fixed step.
    pub fn ephemeris(
        &self,
        start: NaiveDateTime,
        stop: NaiveDateTime,
        step: Duration,
    ) -> Result<Vec<(NaiveDateTime, [f64; 3], [f64; 3])>> {
        if step <= Duration::zero() {
            return Err(Error::Parse("ephemeris step must be positive".to_string()));
        }
        let mut states = Vec::new();
        let mut date = start;
        while date <= stop {
            let (position, velocity) = self.propagate(date)?;
            states.push((date, position, velocity));
            date += step;
        }
        Ok(states)
    }
}

fn name_line(line: &str) -> &str {
    if line.starts_with("1 ") || line.starts_with("2 ") {
        return "";
    }
    line.strip_prefix("0 ").unwrap_or(line).trim()
}

#[derive(Debug)]
pub struct TleStats {
    pub objects: i64,
    pub records: i64,
    pub first_insert: Option<NaiveDateTime>,
    pub last_insert: Option<NaiveDateTime>,
}

const COLUMNS: &str = "norad_id, cospar_id, name, data, epoch, src";

/// Latest TLE per object, via a correlated max-epoch subquery.
const LATEST_FILTER: &str =
    "epoch = (SELECT MAX(epoch) FROM tle t2 WHERE t2.norad_id = tle.norad_id)";

/// Append-only store of TLE records, unique per (norad_id, epoch).
#[derive(Debug, Clone)]
pub struct TleStore {
    db: SqlitePool,
}

impl TleStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Parse `text` and insert every record not already present, in one
    /// transaction. Returns (inserted, parsed) counts; re-inserting known
    /// epochs is a silent no-op.
    pub async fn insert(&self, text: &str, src: &str) -> Result<(u64, usize)> {
        let tles = Tle::parse_all(text, src);
        if tles.is_empty() {
            return Err(Error::EmptyInput {
                src: src.to_string(),
            });
        }

        let now = Utc::now().naive_utc();
        let mut tx = self.db.begin().await?;
        let mut inserted = 0u64;
        for tle in &tles {
            let res = sqlx::query(
                "INSERT OR IGNORE INTO tle
                    (norad_id, cospar_id, name, data, epoch, src, insert_date)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(tle.norad_id)
            .bind(&tle.cospar_id)
            .bind(&tle.name)
            .bind(&tle.data)
            .bind(tle.epoch)
            .bind(src)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += res.rows_affected();
        }
        tx.commit().await?;

        info!("{:<20} {:>4}/{}", src, inserted, tles.len());
        Ok((inserted, tles.len()))
    }

    /// Insert several (src, text) batches, accumulating the counts. A
    /// source without any TLE is warned about and skipped; one bad source
    /// does not stop the rest of the batch.
    pub async fn insert_all(&self, batches: &[(String, String)]) -> Result<(u64, usize)> {
        let mut inserted = 0u64;
        let mut parsed = 0usize;
        for (src, text) in batches {
            match self.insert(text, src).await {
                Ok((batch_inserted, batch_parsed)) => {
                    inserted += batch_inserted;
                    parsed += batch_parsed;
                }
                Err(Error::EmptyInput { .. }) => warn!("{src} contains no TLE"),
                Err(e) => return Err(e),
            }
        }
        Ok((inserted, parsed))
    }

    /// Latest record matching the field/value filter.
    pub async fn get(&self, selector: Selector, value: &str) -> Result<Tle> {
        let sql = format!(
            "SELECT {COLUMNS} FROM tle WHERE {} = ? ORDER BY epoch DESC LIMIT 1",
            selector.column()
        );
        sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound {
                field: selector.to_string(),
                value: value.to_string(),
            })
    }

    /// Nearest record before or after a date (inclusive on both sides).
    pub async fn get_dated(&self, selector: Selector, value: &str, limit: Limit) -> Result<Tle> {
        let (cmp, order, date) = match limit {
            Limit::After(date) => (">=", "ASC", date),
            Limit::Before(date) => ("<=", "DESC", date),
            Limit::Any => return self.get(selector, value).await,
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM tle
             WHERE {} = ? AND epoch {cmp} ? ORDER BY epoch {order} LIMIT 1",
            selector.column()
        );
        sqlx::query_as(&sql)
            .bind(value)
            .bind(date)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound {
                field: selector.to_string(),
                value: value.to_string(),
            })
    }

    /// All records of one object, ascending by epoch, optionally bounded by
    /// a [start, stop] window and trimmed to the last `count` entries.
    ///
    /// Fails with `NotFound` only when the object has no record at all; a
    /// window that excludes everything yields an empty vector.
    pub async fn history(
        &self,
        selector: Selector,
        value: &str,
        count: Option<usize>,
        start: Option<NaiveDateTime>,
        stop: Option<NaiveDateTime>,
    ) -> Result<Vec<Tle>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM tle WHERE {} = ? ORDER BY epoch ASC",
            selector.column()
        );
        let all: Vec<Tle> = sqlx::query_as(&sql).bind(value).fetch_all(&self.db).await?;
        if all.is_empty() {
            return Err(Error::NotFound {
                field: selector.to_string(),
                value: value.to_string(),
            });
        }

        let mut windowed: Vec<Tle> = all
            .into_iter()
            .filter(|tle| start.map_or(true, |s| tle.epoch >= s))
            .filter(|tle| stop.map_or(true, |s| tle.epoch <= s))
            .collect();

        if let Some(count) = count {
            if windowed.len() > count {
                windowed.drain(..windowed.len() - count);
            }
        }
        Ok(windowed)
    }

    /// Case-insensitive substring search against name and raw text,
    /// yielding the latest matching record per object.
    pub async fn find(&self, text: &str) -> Result<Vec<Tle>> {
        let pattern = format!("%{text}%");
        let sql = format!(
            "SELECT {COLUMNS} FROM tle
             WHERE (name LIKE ? OR data LIKE ?)
               AND epoch = (SELECT MAX(epoch) FROM tle t2
                            WHERE t2.norad_id = tle.norad_id
                              AND (t2.name LIKE ? OR t2.data LIKE ?))
             ORDER BY norad_id"
        );
        let tles: Vec<Tle> = sqlx::query_as(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .fetch_all(&self.db)
            .await?;
        if tles.is_empty() {
            return Err(Error::NotFound {
                field: "text".to_string(),
                value: text.to_string(),
            });
        }
        Ok(tles)
    }

    /// Every record ordered by (norad_id, epoch), or only the most recent
    /// one per object when `all` is false.
    pub async fn dump(&self, all: bool) -> Result<Vec<Tle>> {
        let sql = if all {
            format!("SELECT {COLUMNS} FROM tle ORDER BY norad_id, epoch")
        } else {
            format!("SELECT {COLUMNS} FROM tle WHERE {LATEST_FILTER} ORDER BY norad_id")
        };
        Ok(sqlx::query_as(&sql).fetch_all(&self.db).await?)
    }

    pub async fn stats(&self) -> Result<TleStats> {
        let objects = sqlx::query_scalar("SELECT COUNT(DISTINCT norad_id) FROM tle")
            .fetch_one(&self.db)
            .await?;
        let records = sqlx::query_scalar("SELECT COUNT(*) FROM tle")
            .fetch_one(&self.db)
            .await?;
        let first_insert = sqlx::query_scalar("SELECT MIN(insert_date) FROM tle")
            .fetch_one(&self.db)
            .await?;
        let last_insert = sqlx::query_scalar("SELECT MAX(insert_date) FROM tle")
            .fetch_one(&self.db)
            .await?;
        Ok(TleStats {
            objects,
            records,
            first_insert,
            last_insert,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISS_2018: &str = "ISS (ZARYA)
1 25544U 98067A   18297.55162980  .00001655  00000-0  32532-4 0  9999
2 25544  51.6407  94.0557 0003791 332.0725 138.3982 15.53858634138630";

    #[test]
    fn parse_named_block() {
        let tles = Tle::parse_all(ISS_2018, "test");
        assert_eq!(tles.len(), 1);
        let tle = &tles[0];
        assert_eq!(tle.norad_id, 25544);
        assert_eq!(tle.cospar_id, "1998-067A");
        assert_eq!(tle.name, "ISS (ZARYA)");
        assert_eq!(
            tle.epoch.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "2018-10-24T13:14:20"
        );
    }

    #[test]
    fn parse_without_name_line() {
        let bare: String = ISS_2018.lines().skip(1).collect::<Vec<_>>().join("\n");
        let tles = Tle::parse_all(&bare, "test");
        assert_eq!(tles.len(), 1);
        assert_eq!(tles[0].name, "");
        assert_eq!(tles[0].norad_id, 25544);
    }

    #[test]
    fn parse_garbage_yields_nothing() {
        assert!(Tle::parse_all("this is not a TLE\nat all", "test").is_empty());
    }

    #[test]
    fn propagate_at_epoch() {
        let tles = Tle::parse_all(ISS_2018, "test");
        let (position, velocity) = tles[0].propagate(tles[0].epoch).unwrap();
        let r = (position[0].powi(2) + position[1].powi(2) + position[2].powi(2)).sqrt();
        let v = (velocity[0].powi(2) + velocity[1].powi(2) + velocity[2].powi(2)).sqrt();
        // LEO sanity: ~400 km altitude, ~7.7 km/s
        assert!((6600.0..6900.0).contains(&r), "radius {r}");
        assert!((7.0..8.5).contains(&v), "speed {v}");
    }
}
