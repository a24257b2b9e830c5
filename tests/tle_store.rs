mod common;

use space_command::error::Error;
use space_command::request::{parse_date, Limit, Selector};

#[tokio::test]
async fn insert_is_idempotent() {
    let fx = common::workspace().await;
    let store = fx.tles();

    let (inserted, parsed) = store.insert(&common::iss_all(), "stdin").await.unwrap();
    assert_eq!((inserted, parsed), (3, 3));

    // Same epochs again: nothing new, nothing rejected.
    let (inserted, parsed) = store.insert(&common::iss_all(), "stdin").await.unwrap();
    assert_eq!((inserted, parsed), (0, 3));
}

#[tokio::test]
async fn empty_input_is_an_error() {
    let fx = common::workspace().await;
    let err = fx.tles().insert("no elements here", "stdin").await;
    assert!(matches!(err, Err(Error::EmptyInput { .. })));
}

#[tokio::test]
async fn batch_insert_skips_sources_without_tles() {
    let fx = common::workspace().await;
    let store = fx.tles();

    // A TLE-less source in the middle of a batch must not block the rest.
    let batches = vec![
        ("empty.txt".to_string(), "not a TLE at all".to_string()),
        ("iss.txt".to_string(), common::iss_all()),
    ];
    let (inserted, parsed) = store.insert_all(&batches).await.unwrap();
    assert_eq!((inserted, parsed), (3, 3));
    assert_eq!(store.dump(true).await.unwrap().len(), 3);
}

#[tokio::test]
async fn get_returns_the_latest_epoch() {
    let fx = common::workspace().await;
    let store = fx.tles();
    store.insert(&common::iss_all(), "stdin").await.unwrap();

    let tle = store.get(Selector::NoradId, "25544").await.unwrap();
    assert_eq!(tle.name, "ISS (ZARYA)");
    assert_eq!(tle.cospar_id, "1998-067A");
    assert_eq!(tle.epoch.format("%Y-%m-%d").to_string(), "2018-10-24");

    let err = store.get(Selector::NoradId, "99999").await;
    assert!(matches!(err, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn dated_lookups_are_inclusive() {
    let fx = common::workspace().await;
    let store = fx.tles();
    store.insert(&common::iss_all(), "stdin").await.unwrap();

    let tle = store
        .get_dated(
            Selector::NoradId,
            "25544",
            Limit::Before(parse_date("2018-01-01").unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(tle.epoch.format("%Y-%m-%d").to_string(), "2017-12-09");

    let tle = store
        .get_dated(
            Selector::NoradId,
            "25544",
            Limit::After(parse_date("2017-01-01").unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(tle.epoch.format("%Y-%m-%d").to_string(), "2017-12-09");

    // A limit equal to a stored epoch matches that record.
    let latest = store.get(Selector::NoradId, "25544").await.unwrap();
    let same = store
        .get_dated(Selector::NoradId, "25544", Limit::Before(latest.epoch))
        .await
        .unwrap();
    assert_eq!(same.epoch, latest.epoch);

    let err = store
        .get_dated(
            Selector::NoradId,
            "25544",
            Limit::Before(parse_date("2010-01-01").unwrap()),
        )
        .await;
    assert!(matches!(err, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn history_distinguishes_unknown_from_empty() {
    let fx = common::workspace().await;
    let store = fx.tles();
    store.insert(&common::iss_all(), "stdin").await.unwrap();

    let all = store
        .history(Selector::NoradId, "25544", None, None, None)
        .await
        .unwrap();
    let epochs: Vec<String> = all
        .iter()
        .map(|tle| tle.epoch.format("%Y-%m-%d").to_string())
        .collect();
    assert_eq!(epochs, ["2016-12-08", "2017-12-09", "2018-10-24"]);

    let last_two = store
        .history(Selector::NoradId, "25544", Some(2), None, None)
        .await
        .unwrap();
    assert_eq!(last_two.len(), 2);
    assert_eq!(
        last_two[0].epoch.format("%Y-%m-%d").to_string(),
        "2017-12-09"
    );

    // Known object, window past every epoch: empty, not an error.
    let none = store
        .history(
            Selector::NoradId,
            "25544",
            None,
            Some(parse_date("2030-01-01").unwrap()),
            None,
        )
        .await
        .unwrap();
    assert!(none.is_empty());

    // Unknown object: an error, not an empty list.
    let err = store
        .history(Selector::NoradId, "99999", None, None, None)
        .await;
    assert!(matches!(err, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn find_matches_name_case_insensitively() {
    let fx = common::workspace().await;
    let store = fx.tles();
    store.insert(&common::iss_all(), "stdin").await.unwrap();

    let found = store.find("zarya").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].epoch.format("%Y-%m-%d").to_string(), "2018-10-24");

    assert!(matches!(
        store.find("hubble").await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn stats_count_objects_and_records() {
    let fx = common::workspace().await;
    let store = fx.tles();
    store.insert(&common::iss_all(), "stdin").await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.objects, 1);
    assert_eq!(stats.records, 3);
    assert!(stats.first_insert.is_some());
    assert_eq!(stats.first_insert, stats.last_insert);
}

#[tokio::test]
async fn dump_latest_or_all() {
    let fx = common::workspace().await;
    let store = fx.tles();
    store.insert(&common::iss_all(), "stdin").await.unwrap();

    assert_eq!(store.dump(false).await.unwrap().len(), 1);
    assert_eq!(store.dump(true).await.unwrap().len(), 3);
}
