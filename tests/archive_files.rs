mod common;

use chrono::NaiveDateTime;
use space_command::archive::Archive;
use space_command::ccsds::{OrbitData, OrbitKind, StateVector};
use space_command::error::Error;
use space_command::request::{parse_date, Limit};

const COSPAR: &str = "1998-067A";

fn state(epoch: &str) -> OrbitData {
    OrbitData::State(StateVector {
        name: "ISS (ZARYA)".to_string(),
        cospar_id: COSPAR.to_string(),
        frame: "TEME".to_string(),
        epoch: parse_date(epoch).unwrap(),
        position: [-4875.590974, -3634.626046, 3023.580912],
        velocity: [5.153972, -2.780719, 4.941938],
        propagator: None,
        filepath: None,
    })
}

fn epoch_of(orbit: &OrbitData) -> NaiveDateTime {
    orbit.timestamp()
}

#[tokio::test]
async fn files_sort_chronologically_regardless_of_insert_order() {
    let fx = common::workspace().await;
    let archive = fx.archive();

    for epoch in ["2019-07-21", "2019-07-19T12:00:00", "2019-07-19"] {
        archive.insert(&state(epoch), "N/A", false).unwrap();
    }

    let files = archive.files(COSPAR, OrbitKind::Opm, false).unwrap();
    let stamps: Vec<NaiveDateTime> = files
        .iter()
        .map(|path| Archive::file_timestamp(path).unwrap())
        .collect();
    assert_eq!(
        stamps,
        [
            parse_date("2019-07-19").unwrap(),
            parse_date("2019-07-19T12:00:00").unwrap(),
            parse_date("2019-07-21").unwrap(),
        ]
    );

    // Offset 0 is the most recent file.
    let latest = archive.get(COSPAR, OrbitKind::Opm, 0).unwrap();
    assert_eq!(epoch_of(&latest), parse_date("2019-07-21").unwrap());
    let oldest = archive.get(COSPAR, OrbitKind::Opm, 2).unwrap();
    assert_eq!(epoch_of(&oldest), parse_date("2019-07-19").unwrap());
    assert!(matches!(
        archive.get(COSPAR, OrbitKind::Opm, 3),
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn insert_refuses_to_overwrite_without_force() {
    let fx = common::workspace().await;
    let archive = fx.archive();

    let orbit = state("2019-07-19");
    archive.insert(&orbit, "N/A", false).unwrap();
    assert!(matches!(
        archive.insert(&orbit, "N/A", false),
        Err(Error::FileExists(_))
    ));
    archive.insert(&orbit, "N/A", true).unwrap();
}

#[tokio::test]
async fn dated_lookups_are_inclusive() {
    let fx = common::workspace().await;
    let archive = fx.archive();
    for epoch in ["2019-07-19", "2019-07-21"] {
        archive.insert(&state(epoch), "N/A", false).unwrap();
    }

    // A file stamped exactly at the limit date matches.
    let hit = archive
        .get_dated(COSPAR, OrbitKind::Opm, Limit::Before(parse_date("2019-07-19").unwrap()))
        .unwrap();
    assert_eq!(epoch_of(&hit), parse_date("2019-07-19").unwrap());

    let hit = archive
        .get_dated(COSPAR, OrbitKind::Opm, Limit::Before(parse_date("2019-07-20").unwrap()))
        .unwrap();
    assert_eq!(epoch_of(&hit), parse_date("2019-07-19").unwrap());

    let hit = archive
        .get_dated(COSPAR, OrbitKind::Opm, Limit::After(parse_date("2019-07-20").unwrap()))
        .unwrap();
    assert_eq!(epoch_of(&hit), parse_date("2019-07-21").unwrap());

    assert!(matches!(
        archive.get_dated(
            COSPAR,
            OrbitKind::Opm,
            Limit::Before(parse_date("2019-07-18").unwrap())
        ),
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn absent_folder_is_an_empty_archive() {
    let fx = common::workspace().await;
    let archive = fx.archive();
    assert!(archive
        .files("2008-010A", OrbitKind::Oem, false)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn tags_bind_names_to_files() {
    let fx = common::workspace().await;
    let archive = fx.archive();
    let first = archive.insert(&state("2019-07-19"), "N/A", false).unwrap();
    let second = archive.insert(&state("2019-07-21"), "N/A", false).unwrap();

    archive.tag(COSPAR, &first, "blessed", false).unwrap();
    // Re-binding to the same file is a no-op.
    archive.tag(COSPAR, &first, "blessed", false).unwrap();
    // Re-binding to another file needs force.
    assert!(matches!(
        archive.tag(COSPAR, &second, "blessed", false),
        Err(Error::TagExists { .. })
    ));
    archive.tag(COSPAR, &second, "blessed", true).unwrap();

    let tags = archive.tags(COSPAR, Some(OrbitKind::Opm)).unwrap();
    assert_eq!(tags.get("blessed"), Some(&second));
}

#[tokio::test]
async fn purge_keeps_tagged_files() {
    let fx = common::workspace().await;
    let archive = fx.archive();
    let old = archive.insert(&state("2019-07-19"), "N/A", false).unwrap();
    let older = archive.insert(&state("2019-07-17"), "N/A", false).unwrap();
    archive.insert(&state("2019-07-21"), "N/A", false).unwrap();

    archive.tag(COSPAR, &old, "blessed", false).unwrap();

    let candidates = archive
        .purge_candidates(COSPAR, OrbitKind::Opm, parse_date("2019-07-20").unwrap())
        .unwrap();
    assert_eq!(candidates.len(), 2);

    let deleted = archive.purge(COSPAR, &candidates).unwrap();
    assert_eq!(deleted, 1);
    assert!(old.exists());
    assert!(!older.exists());

    let remaining = archive.files(COSPAR, OrbitKind::Opm, false).unwrap();
    assert_eq!(remaining.len(), 2);
}
