//! Satellite registry and request resolution.
//!
//! The registry bridges the two keyspaces of the stores: the TLE time
//! series reasons by NORAD id while the orbit-file archive reasons by
//! COSPAR id. [`Resolver`] turns a parsed [`Request`] into a concrete
//! satellite plus orbit record by dispatching on the request source.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::ccsds::{self, OrbitData, OrbitKind};
use crate::error::{Error, Result};
use crate::request::{Limit, Overrides, Request, Selector, Source};
use crate::tle::{Tle, TleStore};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Satellite {
    pub id: Option<i64>,
    pub norad_id: Option<i64>,
    pub cospar_id: Option<String>,
    pub name: String,
    pub comment: Option<String>,
}

impl Satellite {
    /// A registry row synthesized from a request key, for objects seen
    /// before any sync.
    fn from_request(req: &Request) -> Self {
        let mut sat = Satellite {
            id: None,
            norad_id: None,
            cospar_id: None,
            name: req.value.clone(),
            comment: None,
        };
        match req.selector {
            Selector::Name => {}
            Selector::CosparId => sat.cospar_id = Some(req.value.clone()),
            Selector::NoradId => sat.norad_id = req.value.parse().ok(),
        }
        sat
    }

    fn from_tle(tle: &Tle) -> Self {
        Satellite {
            id: None,
            norad_id: Some(tle.norad_id),
            cospar_id: Some(tle.cospar_id.clone()),
            name: tle.name.clone(),
            comment: None,
        }
    }
}

/// Orbit record attached to a resolved satellite.
#[derive(Debug, Clone)]
pub enum Orb {
    Tle(Tle),
    Ccsds(OrbitData),
}

/// A resolved request: the registry row, the normalized request, and the
/// orbit record it selected (when asked for).
#[derive(Debug, Clone)]
pub struct Sat {
    pub model: Satellite,
    pub req: Request,
    pub orb: Option<Orb>,
}

impl Sat {
    pub fn name(&self) -> &str {
        &self.model.name
    }

    pub fn norad_id(&self) -> Option<i64> {
        self.model.norad_id
    }

    pub fn cospar_id(&self) -> Option<&str> {
        self.model.cospar_id.as_deref()
    }
}

const SAT_COLUMNS: &str = "id, norad_id, cospar_id, name, comment";

/// Registry store: `sat` and `alias` tables.
#[derive(Debug, Clone)]
pub struct SatStore {
    db: SqlitePool,
}

impl SatStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Parse a selector string, expanding a leading name through the alias
    /// table (`ISS` → `norad_id=25544`). The alias expansion is a single
    /// `key=value` pair and is not re-parsed recursively.
    pub async fn parse_selector(
        &self,
        text: &str,
        overrides: &Overrides,
        default_src: &Source,
    ) -> Result<Request> {
        let mut req = Request::parse(text, overrides, default_src)?;
        if req.selector == Selector::Name && overrides.target.is_none() {
            if let Some(expansion) = self.alias(&req.value).await? {
                let (key, value) = expansion.split_once('=').ok_or_else(|| {
                    Error::Parse(format!("malformed alias expansion '{expansion}'"))
                })?;
                req.selector = Selector::from_key(key)?;
                req.value = value.to_string();
            }
        }
        Ok(req)
    }

    pub async fn alias(&self, name: &str) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT selector FROM alias WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.db)
                .await?,
        )
    }

    pub async fn aliases(&self) -> Result<Vec<(String, String)>> {
        Ok(
            sqlx::query_as("SELECT name, selector FROM alias ORDER BY name")
                .fetch_all(&self.db)
                .await?,
        )
    }

    /// Bind an alias name to a selector expansion. An existing alias fails
    /// unless forced.
    pub async fn set_alias(&self, name: &str, selector: &str, force: bool) -> Result<()> {
        if let Some(existing) = self.alias(name).await? {
            if !force {
                return Err(Error::AliasExists {
                    name: name.to_string(),
                    selector: existing,
                });
            }
            sqlx::query("UPDATE alias SET selector = ? WHERE name = ?")
                .bind(selector)
                .bind(name)
                .execute(&self.db)
                .await?;
        } else {
            sqlx::query("INSERT INTO alias (name, selector) VALUES (?, ?)")
                .bind(name)
                .bind(selector)
                .execute(&self.db)
                .await?;
        }
        info!("alias '{name}' ({selector}) created");
        Ok(())
    }

    pub async fn find(&self, selector: Selector, value: &str) -> Result<Option<Satellite>> {
        let sql = format!(
            "SELECT {SAT_COLUMNS} FROM sat WHERE {} = ? LIMIT 1",
            selector.column()
        );
        Ok(sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?)
    }

    pub async fn all(&self) -> Result<Vec<Satellite>> {
        Ok(
            sqlx::query_as(&format!("SELECT {SAT_COLUMNS} FROM sat ORDER BY id"))
                .fetch_all(&self.db)
                .await?,
        )
    }

    pub async fn save(&self, sat: &Satellite) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO sat (norad_id, cospar_id, name, comment) VALUES (?, ?, ?, ?)",
        )
        .bind(sat.norad_id)
        .bind(&sat.cospar_id)
        .bind(&sat.name)
        .bind(&sat.comment)
        .execute(&self.db)
        .await?;
        Ok(res.last_insert_rowid())
    }

    /// Apply a sync result in one transaction: all or nothing.
    async fn save_batch(&self, new: &[Satellite], updated: &[Satellite]) -> Result<()> {
        let mut tx = self.db.begin().await?;
        for sat in new {
            sqlx::query("INSERT INTO sat (norad_id, cospar_id, name, comment) VALUES (?, ?, ?, ?)")
                .bind(sat.norad_id)
                .bind(&sat.cospar_id)
                .bind(&sat.name)
                .bind(&sat.comment)
                .execute(&mut *tx)
                .await?;
        }
        for sat in updated {
            if let Some(id) = sat.id {
                sqlx::query("UPDATE sat SET norad_id = ?, cospar_id = ?, name = ? WHERE id = ?")
                    .bind(sat.norad_id)
                    .bind(&sat.cospar_id)
                    .bind(&sat.name)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Which stores a sync pass reconciles against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
    All,
    Tle,
    Ephem,
}

impl SyncSource {
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "all" => Ok(SyncSource::All),
            "tle" => Ok(SyncSource::Tle),
            "ephem" => Ok(SyncSource::Ephem),
            _ => Err(Error::Parse(format!("unknown sync source '{token}'"))),
        }
    }
}

/// Reconcile the registry against the TLE store (by NORAD id) and the
/// archive folders (by COSPAR id). Idempotent; safe to run repeatedly.
/// Returns (created, updated) counts.
pub async fn sync(
    sats: &SatStore,
    tles: &TleStore,
    archive: &Archive,
    source: SyncSource,
) -> Result<(usize, usize)> {
    let mut new_sats: Vec<Satellite> = Vec::new();
    let mut updated: Vec<Satellite> = Vec::new();

    let existing = sats.all().await?;

    if matches!(source, SyncSource::All | SyncSource::Tle) {
        let by_norad: HashMap<i64, &Satellite> = existing
            .iter()
            .filter_map(|sat| sat.norad_id.map(|norad| (norad, sat)))
            .collect();

        for tle in tles.dump(false).await? {
            match by_norad.get(&tle.norad_id) {
                None => {
                    debug!(
                        "{} added (name='{}' cospar_id='{}')",
                        tle.norad_id, tle.name, tle.cospar_id
                    );
                    new_sats.push(Satellite::from_tle(&tle));
                }
                Some(sat) => {
                    if sat.name != tle.name
                        || sat.cospar_id.as_deref() != Some(tle.cospar_id.as_str())
                    {
                        debug!(
                            "{} updated. name='{}'->'{}' cospar_id='{:?}'->'{}'",
                            tle.norad_id, sat.name, tle.name, sat.cospar_id, tle.cospar_id
                        );
                        let mut sat = (*sat).clone();
                        sat.name = tle.name.clone();
                        sat.cospar_id = Some(tle.cospar_id.clone());
                        updated.push(sat);
                    }
                }
            }
        }
        debug!("{} new satellites found in the TLE database", new_sats.len());
        debug!("{} satellites to update from the TLE database", updated.len());
    }

    if matches!(source, SyncSource::All | SyncSource::Ephem) {
        let mut known: HashSet<String> = existing.iter().filter_map(|s| s.cospar_id.clone()).collect();
        // Satellites just discovered in the TLE pass are known too.
        known.extend(new_sats.iter().filter_map(|s| s.cospar_id.clone()));

        for (cospar_id, files) in discover_folders(archive)? {
            if known.contains(&cospar_id) {
                continue;
            }
            let name = files
                .first()
                .and_then(|path| ccsds::load(path).ok())
                .map(|orbit| orbit.name().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "UNKNOWN".to_string());
            debug!("new satellite '{name}' ({cospar_id}) found in ephem files");
            new_sats.push(Satellite {
                id: None,
                norad_id: None,
                cospar_id: Some(cospar_id),
                name,
                comment: None,
            });
        }
    }

    sats.save_batch(&new_sats, &updated).await?;
    info!(
        "{} new satellites registered, {} satellites updated",
        new_sats.len(),
        updated.len()
    );
    Ok((new_sats.len(), updated.len()))
}

/// Per-satellite folders under the archive root, with their OEM files
/// sorted by name.
fn discover_folders(archive: &Archive) -> Result<Vec<(String, Vec<PathBuf>)>> {
    let root = archive.root();
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut folders = Vec::new();
    for year in fs::read_dir(root)? {
        let year = year?.path();
        if !year.is_dir() {
            continue;
        }
        let year_name = year.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        for sequence in fs::read_dir(&year)? {
            let sequence = sequence?.path();
            if !sequence.is_dir() {
                continue;
            }
            let seq_name = sequence
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let mut files: Vec<PathBuf> = fs::read_dir(&sequence)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("oem"))
                .collect();
            files.sort();
            folders.push((format!("{year_name}-{seq_name}"), files));
        }
    }
    Ok(folders)
}

fn no_data(req: &Request) -> Error {
    Error::NoData {
        request: req.to_string(),
    }
}

/// Convert a store-level miss into `NoData` (the object itself is known);
/// anything else propagates unchanged.
fn or_no_data(err: Error, req: &Request) -> Error {
    match err {
        Error::NotFound { .. } => no_data(req),
        other => other,
    }
}

/// Dispatches a parsed request to the backing stores.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    pub sats: &'a SatStore,
    pub tles: &'a TleStore,
    pub archive: &'a Archive,
}

impl Resolver<'_> {
    /// Resolve a request to a satellite and (when `with_orb`) its orbit
    /// record. With `create`, an unknown key synthesizes and persists a
    /// registry row instead of failing.
    pub async fn resolve(&self, req: &Request, create: bool, with_orb: bool) -> Result<Sat> {
        let model = match self.sats.find(req.selector, &req.value).await? {
            Some(model) => model,
            None if create => {
                let mut model = Satellite::from_request(req);
                model.id = Some(self.sats.save(&model).await?);
                model
            }
            None => {
                return Err(Error::NotFound {
                    field: req.selector.to_string(),
                    value: req.value.clone(),
                })
            }
        };

        let mut sat = Sat {
            model,
            req: req.clone(),
            orb: None,
        };
        if !with_orb || create {
            return Ok(sat);
        }

        sat.orb = Some(self.lookup_orb(&sat, req).await?);
        Ok(sat)
    }

    async fn lookup_orb(&self, sat: &Sat, req: &Request) -> Result<Orb> {
        match &req.src {
            Source::Tle => match req.limit {
                // The date-limited path wins whenever a date is present.
                Limit::Any => {
                    let mut tles = self
                        .tles
                        .history(req.selector, &req.value, Some(req.offset + 1), None, None)
                        .await
                        .map_err(|e| or_no_data(e, req))?;
                    if tles.len() <= req.offset {
                        return Err(no_data(req));
                    }
                    // Ascending window of offset+1 entries: the oldest one
                    // is the offset-th most recent.
                    Ok(Orb::Tle(tles.remove(0)))
                }
                _ => Ok(Orb::Tle(
                    self.tles
                        .get_dated(req.selector, &req.value, req.limit)
                        .await
                        .map_err(|e| or_no_data(e, req))?,
                )),
            },
            Source::Oem | Source::Opm => {
                let cospar_id = sat.cospar_id().ok_or_else(|| no_data(req))?;
                let folder = self.archive.folder(cospar_id)?;
                if !folder.exists() {
                    return Err(no_data(req));
                }
                let kind = OrbitKind::from_src(&req.src).unwrap_or(OrbitKind::Oem);
                let orbit = match req.limit {
                    Limit::Any => self.archive.get(cospar_id, kind, req.offset),
                    _ => self.archive.get_dated(cospar_id, kind, req.limit),
                }
                .map_err(|e| or_no_data(e, req))?;
                Ok(Orb::Ccsds(orbit))
            }
            Source::Tag(tag) => {
                let cospar_id = sat.cospar_id().ok_or_else(|| no_data(req))?;
                let tags = self.archive.tags(cospar_id, None)?;
                let path = tags.get(tag).ok_or_else(|| no_data(req))?;
                Ok(Orb::Ccsds(ccsds::load(path)?))
            }
        }
    }

    /// Parse and resolve one selector string.
    pub async fn from_selector(
        &self,
        text: &str,
        overrides: &Overrides,
        default_src: &Source,
        with_orb: bool,
    ) -> Result<Sat> {
        let req = self.sats.parse_selector(text, overrides, default_src).await?;
        self.resolve(&req, false, with_orb).await
    }

    /// Parse raw stdin input: a block of TLEs, or a CCSDS document. With
    /// `create`, previously unseen objects gain a registry row.
    pub async fn from_text(&self, text: &str, create: bool) -> Result<Vec<Sat>> {
        let tles = Tle::parse_all(text, "stdin");
        if !tles.is_empty() {
            let mut sats = Vec::with_capacity(tles.len());
            for tle in tles {
                let model = self
                    .model_for(Selector::CosparId, &tle.cospar_id, &tle.name, Some(tle.norad_id), create)
                    .await?;
                sats.push(Sat {
                    model,
                    req: Request {
                        selector: Selector::CosparId,
                        value: tle.cospar_id.clone(),
                        src: Source::Tle,
                        offset: 0,
                        limit: Limit::Any,
                    },
                    orb: Some(Orb::Tle(tle)),
                });
            }
            return Ok(sats);
        }

        let orbits = ccsds::loads(text)
            .map_err(|_| Error::Parse("no valid TLE nor CCSDS data".to_string()))?;
        let mut sats = Vec::with_capacity(orbits.len());
        for orbit in orbits {
            let model = self
                .model_for(Selector::CosparId, orbit.cospar_id(), orbit.name(), None, create)
                .await?;
            sats.push(Sat {
                model,
                req: Request {
                    selector: Selector::CosparId,
                    value: orbit.cospar_id().to_string(),
                    src: match orbit.kind() {
                        OrbitKind::Oem => Source::Oem,
                        OrbitKind::Opm => Source::Opm,
                    },
                    offset: 0,
                    limit: Limit::Any,
                },
                orb: Some(Orb::Ccsds(orbit)),
            });
        }
        Ok(sats)
    }

    /// Archive every document of `kind` found in `text`, registering
    /// previously unseen objects. A filename collision is skipped with a
    /// warning; the rest of the batch still goes in. Returns the paths
    /// actually written.
    pub async fn insert_orbits(
        &self,
        text: &str,
        kind: OrbitKind,
        originator: &str,
        force: bool,
    ) -> Result<Vec<PathBuf>> {
        let mut saved = Vec::new();
        for sat in self.from_text(text, true).await? {
            let Some(Orb::Ccsds(orbit)) = &sat.orb else {
                continue;
            };
            if orbit.kind() != kind {
                warn!(
                    "skipping {} document for {}",
                    orbit.kind().extension(),
                    sat.name()
                );
                continue;
            }
            match self.archive.insert(orbit, originator, force) {
                Ok(path) => saved.push(path),
                Err(Error::FileExists(path)) => {
                    warn!("{} already exists, skipped", path.display());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(saved)
    }

    async fn model_for(
        &self,
        selector: Selector,
        value: &str,
        name: &str,
        norad_id: Option<i64>,
        create: bool,
    ) -> Result<Satellite> {
        if let Some(model) = self.sats.find(selector, value).await? {
            return Ok(model);
        }
        let mut model = Satellite {
            id: None,
            norad_id,
            cospar_id: Some(value.to_string()),
            name: name.to_string(),
            comment: None,
        };
        if create {
            model.id = Some(self.sats.save(&model).await?);
        }
        Ok(model)
    }
}
