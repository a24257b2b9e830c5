//! Filesystem archive of OEM/OPM files, one folder per satellite.
//!
//! Layout: `<root>/<cospar_year>/<cospar_sequence>/<cospar>_<stamp>.<ext>`,
//! where the stamp is the OPM epoch or OEM start time — so lexicographic
//! filename order is chronological order. A `.tags.yml` sidecar per folder
//! maps human-friendly tag names to filenames; tagged files are protected
//! from purge.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::ccsds::{self, OrbitData, OrbitKind};
use crate::error::{Error, Result};
use crate::request::Limit;

const TAG_FILE: &str = ".tags.yml";
const STAMP_FMT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-satellite folder, keyed by COSPAR id (`1998-067A` →
    /// `<root>/1998/067A`).
    pub fn folder(&self, cospar_id: &str) -> Result<PathBuf> {
        let (year, sequence) = cospar_id
            .split_once('-')
            .ok_or_else(|| Error::Parse(format!("invalid COSPAR id '{cospar_id}'")))?;
        Ok(self.root.join(year).join(sequence))
    }

    /// Canonical filename: `<cospar>_<%Y%m%d_%H%M%S>.<ext>`.
    pub fn filename(orbit: &OrbitData) -> String {
        format!(
            "{}_{}.{}",
            orbit.cospar_id(),
            orbit.timestamp().format(STAMP_FMT),
            orbit.kind().extension()
        )
    }

    /// Timestamp encoded in an archive filename.
    pub fn file_timestamp(path: &Path) -> Result<NaiveDateTime> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let stamp = stem
            .split_once('_')
            .map(|(_, stamp)| stamp)
            .unwrap_or_default();
        NaiveDateTime::parse_from_str(stamp, STAMP_FMT)
            .map_err(|_| Error::Parse(format!("unstamped archive file '{}'", path.display())))
    }

    /// Write `orbit` into the satellite's folder, creating it if needed.
    /// An existing file of the same name fails unless `force` is set.
    pub fn insert(&self, orbit: &OrbitData, originator: &str, force: bool) -> Result<PathBuf> {
        let folder = self.folder(orbit.cospar_id())?;
        fs::create_dir_all(&folder)?;

        let path = folder.join(Self::filename(orbit));
        if path.exists() && !force {
            return Err(Error::FileExists(path));
        }

        fs::write(&path, ccsds::dumps(orbit, originator))?;
        info!("{} saved", path.display());
        Ok(path)
    }

    /// Archive files of one kind, sorted by filename. An absent folder is
    /// an empty archive, not an error.
    pub fn files(&self, cospar_id: &str, kind: OrbitKind, newest_first: bool) -> Result<Vec<PathBuf>> {
        let folder = self.folder(cospar_id)?;
        if !folder.is_dir() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&folder)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |ext| ext == kind.extension())
            })
            .collect();
        files.sort();
        if newest_first {
            files.reverse();
        }
        Ok(files)
    }

    /// Parsed orbit objects, annotated with their source filepath.
    pub fn list(
        &self,
        cospar_id: &str,
        kind: OrbitKind,
        newest_first: bool,
    ) -> Result<Vec<OrbitData>> {
        self.files(cospar_id, kind, newest_first)?
            .iter()
            .map(|path| ccsds::load(path))
            .collect()
    }

    /// The `offset`-th most recent file (0 = most recent).
    pub fn get(&self, cospar_id: &str, kind: OrbitKind, offset: usize) -> Result<OrbitData> {
        let files = self.files(cospar_id, kind, true)?;
        match files.get(offset) {
            Some(path) => ccsds::load(path),
            None => Err(Error::NotFound {
                field: kind.extension().to_string(),
                value: cospar_id.to_string(),
            }),
        }
    }

    /// First file satisfying the date comparison: newest-first scan for
    /// `before` (timestamp <= date), oldest-first for `after` (>= date).
    pub fn get_dated(&self, cospar_id: &str, kind: OrbitKind, limit: Limit) -> Result<OrbitData> {
        let (newest_first, date, after) = match limit {
            Limit::Before(date) => (true, date, false),
            Limit::After(date) => (false, date, true),
            Limit::Any => return self.get(cospar_id, kind, 0),
        };

        for path in self.files(cospar_id, kind, newest_first)? {
            let stamp = Self::file_timestamp(&path)?;
            if (after && stamp >= date) || (!after && stamp <= date) {
                return ccsds::load(&path);
            }
        }
        Err(Error::NotFound {
            field: kind.extension().to_string(),
            value: cospar_id.to_string(),
        })
    }

    fn tag_path(&self, cospar_id: &str) -> Result<PathBuf> {
        Ok(self.folder(cospar_id)?.join(TAG_FILE))
    }

    fn raw_tags(&self, cospar_id: &str) -> Result<BTreeMap<String, String>> {
        let path = self.tag_path(cospar_id)?;
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Tag name → filepath, optionally filtered by file kind.
    pub fn tags(
        &self,
        cospar_id: &str,
        kind: Option<OrbitKind>,
    ) -> Result<BTreeMap<String, PathBuf>> {
        let folder = self.folder(cospar_id)?;
        let tags = self
            .raw_tags(cospar_id)?
            .into_iter()
            .map(|(tag, filename)| (tag, folder.join(filename)))
            .filter(|(_, path)| match kind {
                Some(kind) => path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |ext| ext == kind.extension()),
                None => true,
            })
            .collect();
        Ok(tags)
    }

    /// Filepath → tag name. When several tags point at the same file the
    /// later one wins; tags are meant to be one-to-one in practice.
    pub fn rtags(
        &self,
        cospar_id: &str,
        kind: Option<OrbitKind>,
    ) -> Result<HashMap<PathBuf, String>> {
        Ok(self
            .tags(cospar_id, kind)?
            .into_iter()
            .map(|(tag, path)| (path, tag))
            .collect())
    }

    /// Bind `tag` to an archived file. Re-binding to a different file
    /// fails unless forced.
    pub fn tag(&self, cospar_id: &str, path: &Path, tag: &str, force: bool) -> Result<()> {
        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| Error::Parse(format!("invalid file path '{}'", path.display())))?;

        let mut tags = self.raw_tags(cospar_id)?;
        if let Some(existing) = tags.get(tag) {
            if existing == filename {
                return Ok(());
            }
            if !force {
                return Err(Error::TagExists {
                    tag: tag.to_string(),
                    file: existing.clone(),
                });
            }
            warn!("moving tag '{tag}' from {existing} to {filename}");
        }
        tags.insert(tag.to_string(), filename.to_string());

        fs::write(self.tag_path(cospar_id)?, serde_yaml::to_string(&tags)?)?;
        Ok(())
    }

    /// Files strictly older than `until`, newest first. Candidates only;
    /// deletion (and any confirmation) is a separate step.
    pub fn purge_candidates(
        &self,
        cospar_id: &str,
        kind: OrbitKind,
        until: NaiveDateTime,
    ) -> Result<Vec<PathBuf>> {
        let mut old = Vec::new();
        for path in self.files(cospar_id, kind, true)? {
            if Self::file_timestamp(&path)? < until {
                old.push(path);
            }
        }
        Ok(old)
    }

    /// Delete the given files, skipping any file referenced by a tag.
    /// Returns the number actually deleted.
    pub fn purge(&self, cospar_id: &str, files: &[PathBuf]) -> Result<usize> {
        let rtags = self.rtags(cospar_id, None)?;
        let mut deleted = 0;
        for path in files {
            if let Some(tag) = rtags.get(path) {
                warn!(
                    "{} can't be destroyed due to the tag '{tag}'",
                    path.display()
                );
                continue;
            }
            fs::remove_file(path)?;
            debug!("{} destroyed", path.display());
            deleted += 1;
        }
        Ok(deleted)
    }
}
