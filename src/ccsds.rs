//! CCSDS OEM/OPM reading and writing (KVN flavor).
//!
//! Only the narrow `loads`/`dumps` boundary the archive needs is covered:
//! single-object state vectors (OPM) and ephemeris segments (OEM), plus the
//! vendor `USER_DEFINED_PROPAGATOR*` block that records which propagator
//! configuration produced an OPM so it survives a round-trip.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};

use crate::error::{Error, Result};
use crate::request::Source;

const DATE_FMT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Which kind of archive file an orbit object maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrbitKind {
    /// Single-epoch state vector.
    Opm,
    /// Time-series ephemeris.
    Oem,
}

impl OrbitKind {
    pub fn extension(&self) -> &'static str {
        match self {
            OrbitKind::Opm => "opm",
            OrbitKind::Oem => "oem",
        }
    }

    pub fn from_src(src: &Source) -> Option<Self> {
        match src {
            Source::Oem => Some(OrbitKind::Oem),
            Source::Opm => Some(OrbitKind::Opm),
            _ => None,
        }
    }
}

/// Propagator configuration recorded in an OPM vendor block.
#[derive(Debug, Clone, PartialEq)]
pub struct Propagator {
    pub name: String,
    pub step_seconds: Option<f64>,
    pub method: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StateVector {
    pub name: String,
    pub cospar_id: String,
    pub frame: String,
    pub epoch: NaiveDateTime,
    /// km
    pub position: [f64; 3],
    /// km/s
    pub velocity: [f64; 3],
    pub propagator: Option<Propagator>,
    pub filepath: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct EphemPoint {
    pub date: NaiveDateTime,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
}

#[derive(Debug, Clone)]
pub struct Ephemeris {
    pub name: String,
    pub cospar_id: String,
    pub frame: String,
    pub start: NaiveDateTime,
    pub stop: NaiveDateTime,
    pub interpolation: String,
    pub degree: Option<u32>,
    pub points: Vec<EphemPoint>,
    pub filepath: Option<PathBuf>,
}

/// A parsed orbit file: snapshot or time series.
#[derive(Debug, Clone)]
pub enum OrbitData {
    State(StateVector),
    Ephem(Ephemeris),
}

impl OrbitData {
    pub fn kind(&self) -> OrbitKind {
        match self {
            OrbitData::State(_) => OrbitKind::Opm,
            OrbitData::Ephem(_) => OrbitKind::Oem,
        }
    }

    /// The sort key encoded into the archive filename: the OPM epoch or
    /// the OEM start time.
    pub fn timestamp(&self) -> NaiveDateTime {
        match self {
            OrbitData::State(state) => state.epoch,
            OrbitData::Ephem(ephem) => ephem.start,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            OrbitData::State(state) => &state.name,
            OrbitData::Ephem(ephem) => &ephem.name,
        }
    }

    pub fn cospar_id(&self) -> &str {
        match self {
            OrbitData::State(state) => &state.cospar_id,
            OrbitData::Ephem(ephem) => &ephem.cospar_id,
        }
    }

    pub fn filepath(&self) -> Option<&Path> {
        match self {
            OrbitData::State(state) => state.filepath.as_deref(),
            OrbitData::Ephem(ephem) => ephem.filepath.as_deref(),
        }
    }

    pub fn set_filepath(&mut self, path: PathBuf) {
        match self {
            OrbitData::State(state) => state.filepath = Some(path),
            OrbitData::Ephem(ephem) => ephem.filepath = Some(path),
        }
    }
}

/// Read a single orbit object from a file. Multi-segment OEM files yield
/// their first segment.
pub fn load(path: &Path) -> Result<OrbitData> {
    let text = fs::read_to_string(path)?;
    let mut orbits = loads(&text)?;
    if orbits.is_empty() {
        return Err(Error::Ccsds(format!("{} holds no segment", path.display())));
    }
    let mut orbit = orbits.swap_remove(0);
    orbit.set_filepath(path.to_path_buf());
    Ok(orbit)
}

/// Parse a CCSDS KVN document: one OPM, or one OEM with any number of
/// segments (one `OrbitData` per segment).
pub fn loads(text: &str) -> Result<Vec<OrbitData>> {
    let first = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default();
    if first.starts_with("CCSDS_OEM_VERS") {
        parse_oem(text)
    } else if first.starts_with("CCSDS_OPM_VERS") {
        parse_opm(text).map(|state| vec![OrbitData::State(state)])
    } else {
        Err(Error::Ccsds("neither an OPM nor an OEM document".to_string()))
    }
}

pub fn dumps(orbit: &OrbitData, originator: &str) -> String {
    match orbit {
        OrbitData::State(state) => dump_opm(state, originator),
        OrbitData::Ephem(ephem) => dump_oem(std::slice::from_ref(ephem), originator),
    }
}

/// Several ephemerides as one multi-segment OEM document.
pub fn dumps_oem(ephems: &[Ephemeris], originator: &str) -> String {
    dump_oem(ephems, originator)
}

fn kv(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Numeric KVN values may carry a unit suffix such as `[km]`.
fn parse_float(value: &str) -> Result<f64> {
    let token = value.split_whitespace().next().unwrap_or_default();
    token
        .parse()
        .map_err(|_| Error::Ccsds(format!("invalid numeric value '{value}'")))
}

fn parse_datetime(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|_| Error::Ccsds(format!("invalid date '{value}'")))
}

fn parse_state_line(line: &str) -> Result<EphemPoint> {
    let mut fields = line.split_whitespace();
    let date = parse_datetime(
        fields
            .next()
            .ok_or_else(|| Error::Ccsds("empty state line".to_string()))?,
    )?;
    let mut values = [0.0; 6];
    for value in values.iter_mut() {
        *value = parse_float(fields.next().ok_or_else(|| {
            Error::Ccsds(format!("truncated state line '{line}'"))
        })?)?;
    }
    Ok(EphemPoint {
        date,
        position: [values[0], values[1], values[2]],
        velocity: [values[3], values[4], values[5]],
    })
}

fn parse_oem(text: &str) -> Result<Vec<OrbitData>> {
    let mut segments = Vec::new();
    let mut meta: Option<Vec<(String, String)>> = None;
    let mut in_meta = false;
    let mut points: Vec<EphemPoint> = Vec::new();

    let mut flush =
        |meta: &mut Option<Vec<(String, String)>>, points: &mut Vec<EphemPoint>| -> Result<()> {
            if let Some(fields) = meta.take() {
                segments.push(build_ephemeris(fields, std::mem::take(points))?);
            }
            Ok(())
        };

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("COMMENT") {
            continue;
        }
        if line == "META_START" {
            flush(&mut meta, &mut points)?;
            meta = Some(Vec::new());
            in_meta = true;
            continue;
        }
        if line == "META_STOP" {
            in_meta = false;
            continue;
        }
        if in_meta {
            if let Some((key, value)) = kv(line) {
                if let Some(fields) = meta.as_mut() {
                    fields.push((key.to_string(), value.to_string()));
                }
            }
            continue;
        }
        if meta.is_some() && !line.contains('=') {
            points.push(parse_state_line(line)?);
        }
    }
    flush(&mut meta, &mut points)?;

    if segments.is_empty() {
        return Err(Error::Ccsds("OEM document holds no segment".to_string()));
    }
    Ok(segments.into_iter().map(OrbitData::Ephem).collect())
}

fn build_ephemeris(fields: Vec<(String, String)>, points: Vec<EphemPoint>) -> Result<Ephemeris> {
    let get = |key: &str| {
        fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    let start = match get("START_TIME") {
        Some(value) => parse_datetime(value)?,
        None => points
            .first()
            .map(|p| p.date)
            .ok_or_else(|| Error::Ccsds("OEM segment holds no state".to_string()))?,
    };
    let stop = match get("STOP_TIME") {
        Some(value) => parse_datetime(value)?,
        None => points
            .last()
            .map(|p| p.date)
            .ok_or_else(|| Error::Ccsds("OEM segment holds no state".to_string()))?,
    };

    Ok(Ephemeris {
        name: get("OBJECT_NAME").unwrap_or_default().to_string(),
        cospar_id: get("OBJECT_ID").unwrap_or_default().to_string(),
        frame: get("REF_FRAME").unwrap_or("TEME").to_string(),
        start,
        stop,
        interpolation: get("INTERPOLATION").unwrap_or("LAGRANGE").to_string(),
        degree: get("INTERPOLATION_DEGREE").and_then(|v| v.parse().ok()),
        points,
        filepath: None,
    })
}

fn parse_opm(text: &str) -> Result<StateVector> {
    let mut name = String::new();
    let mut cospar_id = String::new();
    let mut frame = "TEME".to_string();
    let mut epoch = None;
    let mut position = [None; 3];
    let mut velocity = [None; 3];
    let mut prop_name = None;
    let mut prop_step = None;
    let mut prop_method = None;

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("COMMENT") {
            continue;
        }
        let Some((key, value)) = kv(line) else {
            continue;
        };
        match key {
            "OBJECT_NAME" => name = value.to_string(),
            "OBJECT_ID" => cospar_id = value.to_string(),
            "REF_FRAME" => frame = value.to_string(),
            "EPOCH" => epoch = Some(parse_datetime(value)?),
            "X" => position[0] = Some(parse_float(value)?),
            "Y" => position[1] = Some(parse_float(value)?),
            "Z" => position[2] = Some(parse_float(value)?),
            "X_DOT" => velocity[0] = Some(parse_float(value)?),
            "Y_DOT" => velocity[1] = Some(parse_float(value)?),
            "Z_DOT" => velocity[2] = Some(parse_float(value)?),
            "USER_DEFINED_PROPAGATOR" => prop_name = Some(value.to_string()),
            "USER_DEFINED_PROPAGATOR_STEP_SECONDS" => prop_step = Some(parse_float(value)?),
            "USER_DEFINED_PROPAGATOR_METHOD" => prop_method = Some(value.to_string()),
            _ => {}
        }
    }

    let epoch = epoch.ok_or_else(|| Error::Ccsds("OPM without EPOCH".to_string()))?;
    let unwrap3 = |v: [Option<f64>; 3], what: &str| -> Result<[f64; 3]> {
        match v {
            [Some(a), Some(b), Some(c)] => Ok([a, b, c]),
            _ => Err(Error::Ccsds(format!("OPM with incomplete {what}"))),
        }
    };

    Ok(StateVector {
        name,
        cospar_id,
        frame,
        epoch,
        position: unwrap3(position, "position")?,
        velocity: unwrap3(velocity, "velocity")?,
        propagator: prop_name.map(|name| Propagator {
            name,
            step_seconds: prop_step,
            method: prop_method,
        }),
        filepath: None,
    })
}

fn header(kind: &str, originator: &str) -> String {
    format!(
        "CCSDS_{kind}_VERS = 2.0\nCREATION_DATE = {}\nORIGINATOR = {}\n\n",
        Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S"),
        originator,
    )
}

fn dump_opm(state: &StateVector, originator: &str) -> String {
    let mut out = header("OPM", originator);
    let _ = write!(
        out,
        "OBJECT_NAME          = {}\n\
         OBJECT_ID            = {}\n\
         CENTER_NAME          = EARTH\n\
         REF_FRAME            = {}\n\
         TIME_SYSTEM          = UTC\n\n\
         EPOCH                = {}\n\
         X                    = {:.6} [km]\n\
         Y                    = {:.6} [km]\n\
         Z                    = {:.6} [km]\n\
         X_DOT                = {:.6} [km/s]\n\
         Y_DOT                = {:.6} [km/s]\n\
         Z_DOT                = {:.6} [km/s]\n",
        state.name,
        state.cospar_id,
        state.frame,
        state.epoch.format(DATE_FMT),
        state.position[0],
        state.position[1],
        state.position[2],
        state.velocity[0],
        state.velocity[1],
        state.velocity[2],
    );

    if let Some(prop) = &state.propagator {
        let _ = write!(out, "\nUSER_DEFINED_PROPAGATOR = {}\n", prop.name);
        if let Some(step) = prop.step_seconds {
            let _ = write!(out, "USER_DEFINED_PROPAGATOR_STEP_SECONDS = {step:.3}\n");
        }
        if let Some(method) = &prop.method {
            let _ = write!(out, "USER_DEFINED_PROPAGATOR_METHOD = {method}\n");
        }
    }
    out
}

fn dump_oem(ephems: &[Ephemeris], originator: &str) -> String {
    let mut out = header("OEM", originator);
    for ephem in ephems {
        let _ = write!(
            out,
            "META_START\n\
             OBJECT_NAME          = {}\n\
             OBJECT_ID            = {}\n\
             CENTER_NAME          = EARTH\n\
             REF_FRAME            = {}\n\
             TIME_SYSTEM          = UTC\n\
             START_TIME           = {}\n\
             STOP_TIME            = {}\n\
             INTERPOLATION        = {}\n",
            ephem.name,
            ephem.cospar_id,
            ephem.frame,
            ephem.start.format(DATE_FMT),
            ephem.stop.format(DATE_FMT),
            ephem.interpolation,
        );
        if let Some(degree) = ephem.degree {
            let _ = write!(out, "INTERPOLATION_DEGREE = {degree}\n");
        }
        out.push_str("META_STOP\n\n");

        for point in &ephem.points {
            let _ = write!(
                out,
                "{} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6}\n",
                point.date.format(DATE_FMT),
                point.position[0],
                point.position[1],
                point.position[2],
                point.velocity[0],
                point.velocity[1],
                point.velocity[2],
            );
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    const OEM: &str = "CCSDS_OEM_VERS = 2.0
CREATION_DATE = 2019-07-21T09:16:27
ORIGINATOR = N/A

META_START
OBJECT_NAME          = ISS (ZARYA)
OBJECT_ID            = 1998-067A
CENTER_NAME          = EARTH
REF_FRAME            = TEME
TIME_SYSTEM          = UTC
START_TIME           = 2019-07-21T00:00:00.000000
STOP_TIME            = 2019-07-22T00:00:00.000000
INTERPOLATION        = LAGRANGE
INTERPOLATION_DEGREE = 7
META_STOP

2019-07-21T00:00:00.000000 -4875.590974 -3634.626046  3023.580912   5.153972  -2.780719   4.941938
2019-07-22T00:00:00.000000  4558.774191  3548.133531 -3574.431589  -5.603176   2.722130  -4.457432

META_START
OBJECT_NAME          = ISS (ZARYA)
OBJECT_ID            = 1998-067A
CENTER_NAME          = EARTH
REF_FRAME            = TEME
TIME_SYSTEM          = UTC
START_TIME           = 2019-07-19T00:00:00.000000
STOP_TIME            = 2019-07-20T00:00:00.000000
INTERPOLATION        = LAGRANGE
INTERPOLATION_DEGREE = 7
META_STOP

2019-07-19T00:00:00.000000 -5277.564610 -3867.226652  1829.038578   4.198623  -3.041824   5.641019
2019-07-20T00:00:00.000000  5087.211254  3762.134249 -2469.553745  -4.699560   2.871919  -5.327809
";

    #[test]
    fn oem_segments() {
        let orbits = loads(OEM).unwrap();
        assert_eq!(orbits.len(), 2);

        let OrbitData::Ephem(first) = &orbits[0] else {
            panic!("expected an ephemeris");
        };
        assert_eq!(first.name, "ISS (ZARYA)");
        assert_eq!(first.cospar_id, "1998-067A");
        assert_eq!(first.start, date(2019, 7, 21));
        assert_eq!(first.stop, date(2019, 7, 22));
        assert_eq!(first.points.len(), 2);
        assert_eq!(first.degree, Some(7));

        let OrbitData::Ephem(second) = &orbits[1] else {
            panic!("expected an ephemeris");
        };
        assert_eq!(second.start, date(2019, 7, 19));
        assert_eq!(second.points[1].position[0], 5087.211254);
    }

    #[test]
    fn oem_round_trip() {
        let orbits = loads(OEM).unwrap();
        let text = dumps(&orbits[0], "N/A");
        let again = loads(&text).unwrap();
        let (OrbitData::Ephem(a), OrbitData::Ephem(b)) = (&orbits[0], &again[0]) else {
            panic!("expected ephemerides");
        };
        assert_eq!(a.start, b.start);
        assert_eq!(a.stop, b.stop);
        assert_eq!(a.points.len(), b.points.len());
        assert_eq!(a.points[0].velocity, b.points[0].velocity);
    }

    #[test]
    fn opm_propagator_round_trip() {
        let state = StateVector {
            name: "ISS (ZARYA)".into(),
            cospar_id: "1998-067A".into(),
            frame: "TEME".into(),
            epoch: date(2019, 7, 21),
            position: [-4875.590974, -3634.626046, 3023.580912],
            velocity: [5.153972, -2.780719, 4.941938],
            propagator: Some(Propagator {
                name: "KeplerNum".into(),
                step_seconds: Some(60.0),
                method: Some("rk4".into()),
            }),
            filepath: None,
        };

        let text = dumps(&OrbitData::State(state.clone()), "N/A");
        let orbits = loads(&text).unwrap();
        let OrbitData::State(parsed) = &orbits[0] else {
            panic!("expected a state vector");
        };
        assert_eq!(parsed.epoch, state.epoch);
        assert_eq!(parsed.position, state.position);
        assert_eq!(parsed.propagator, state.propagator);
    }

    #[test]
    fn rejects_foreign_documents() {
        assert!(loads("CCSDS_TDM_VERS = 1.0").is_err());
        assert!(loads("").is_err());
    }
}
