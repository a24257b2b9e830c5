//! Remote TLE retrieval: Celestrak page downloads and Space-Track queries.
//!
//! Fetched text always lands in [`TleStore::insert`], so re-fetching a page
//! only grows the database by the epochs not already stored. Celestrak
//! responses are also cached as plain files under `<root>/tmp/celestrak`
//! for inspection.

use std::fs;

use futures::future::join_all;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::request::Selector;
use crate::tle::TleStore;
use crate::wspace::Workspace;

const CELESTRAK_URL: &str = "http://celestrak.com/NORAD/elements/";

/// Pages known to exist on the Celestrak elements site.
pub const CELESTRAK_PAGES: &[&str] = &[
    "stations.txt",
    "tle-new.txt",
    "visual.txt",
    "weather.txt",
    "noaa.txt",
    "goes.txt",
    "resource.txt",
    "sarsat.txt",
    "dmc.txt",
    "tdrss.txt",
    "argos.txt",
    "geo.txt",
    "intelsat.txt",
    "ses.txt",
    "iridium.txt",
    "iridium-NEXT.txt",
    "orbcomm.txt",
    "globalstar.txt",
    "amateur.txt",
    "x-comm.txt",
    "other-comm.txt",
    "gps-ops.txt",
    "glo-ops.txt",
    "galileo.txt",
    "beidou.txt",
    "sbas.txt",
    "nnss.txt",
    "musson.txt",
    "science.txt",
    "geodetic.txt",
    "engineering.txt",
    "education.txt",
    "military.txt",
    "radar.txt",
    "cubesat.txt",
    "other.txt",
];

const SPACETRACK_LOGIN_URL: &str = "https://www.space-track.org/ajaxauth/login";

/// Download Celestrak pages (all of them, or the named subset) and insert
/// their TLEs. Returns cumulated (inserted, parsed) counts.
pub async fn fetch_celestrak(
    ws: &Workspace,
    store: &TleStore,
    files: Option<&[String]>,
) -> Result<(u64, usize)> {
    let pages: Vec<&str> = match files {
        None => CELESTRAK_PAGES.to_vec(),
        Some(files) => {
            let mut pages = Vec::new();
            for file in files {
                if CELESTRAK_PAGES.contains(&file.as_str()) {
                    pages.push(file.as_str());
                } else {
                    warn!("unknown celestrak page '{file}'");
                }
            }
            if pages.is_empty() {
                return Err(Error::Fetch("no file to download".to_string()));
            }
            pages
        }
    };

    let cache = ws.root.join("tmp").join("celestrak");
    fs::create_dir_all(&cache)?;

    let client = Client::new();
    let downloads = pages.iter().map(|page| {
        let client = client.clone();
        async move {
            let url = format!("{CELESTRAK_URL}{page}");
            debug!("fetching {url}");
            let text = client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            Ok::<_, reqwest::Error>((*page, text))
        }
    });

    let mut inserted = 0u64;
    let mut parsed = 0usize;
    for result in join_all(downloads).await {
        let (page, text) = result.map_err(|e| Error::Fetch(e.to_string()))?;
        fs::write(cache.join(page), &text)?;
        match store.insert(&text, page).await {
            Ok((page_inserted, page_parsed)) => {
                inserted += page_inserted;
                parsed += page_parsed;
            }
            Err(Error::EmptyInput { .. }) => warn!("{page} contains no TLE"),
            Err(e) => return Err(e),
        }
    }
    Ok((inserted, parsed))
}

/// Query Space-Track for the latest TLE of one object and insert it.
/// Needs `[spacetrack]` credentials in the config file.
pub async fn fetch_spacetrack(
    ws: &Workspace,
    store: &TleStore,
    selector: Selector,
    value: &str,
) -> Result<(u64, usize)> {
    let credentials = ws.config.spacetrack.as_ref().ok_or_else(|| {
        Error::Fetch("no space-track credentials in the config file".to_string())
    })?;

    let client = Client::new();
    let login = client
        .post(SPACETRACK_LOGIN_URL)
        .json(credentials)
        .send()
        .await
        .map_err(|e| Error::Fetch(e.to_string()))?;
    if !login.status().is_success() {
        return Err(Error::Fetch(format!(
            "space-track login failed ({})",
            login.status()
        )));
    }
    let session = login
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Fetch("space-track login returned no session cookie".to_string())
        })?;

    let field = match selector {
        Selector::NoradId => "NORAD_CAT_ID",
        Selector::CosparId => "INTLDES",
        Selector::Name => "OBJECT_NAME",
    };
    let url = format!(
        "https://www.space-track.org/basicspacedata/query/class/tle_latest\
         /ORDINAL/1/{field}/{value}/orderby/ORDINAL%20asc/format/3le"
    );
    debug!("fetching {url}");
    let text = client
        .get(&url)
        .header(COOKIE, session)
        .send()
        .await
        .map_err(|e| Error::Fetch(e.to_string()))?
        .error_for_status()
        .map_err(|e| Error::Fetch(e.to_string()))?
        .text()
        .await
        .map_err(|e| Error::Fetch(e.to_string()))?;

    store.insert(&text, "spacetrack").await
}
