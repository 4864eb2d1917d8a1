use std::{collections::HashSet, fs};

use bot_arena::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn open() -> (GameStore, TempDir) {
    let tmp = TempDir::new().unwrap();
    (GameStore::open(tmp.path()).unwrap(), tmp)
}

#[test]
fn generated_tokens_never_repeat() {
    let (store, _tmp) = open();
    let mut seen = HashSet::new();
    for _ in 0..200 {
        let school = store.add_school("").unwrap();
        assert_eq!(store.classify(&school).unwrap(), TokenKind::School);
        assert!(seen.insert(school));
    }
    let user = store.add_user(seen.iter().next().unwrap()).unwrap();
    assert_eq!(store.classify(&user).unwrap(), TokenKind::User);
}

#[test]
fn lookalike_tokens_are_not_registered() {
    let (store, _tmp) = open();
    assert!(!store.is_school_token("S0000ABCD"));
    assert!(matches!(
        store.classify("S0000ABCD"),
        Err(StoreError::InvalidToken { .. })
    ));
    assert!(matches!(
        store.classify("../../etc"),
        Err(StoreError::InvalidToken { .. })
    ));
}

#[test]
fn save_then_get_active_code() {
    let (store, _tmp) = open();
    let school = store.add_school("").unwrap();
    let user = store.add_user(&school).unwrap();

    store.save_code(&user, "X", &Options::new(), true).unwrap();

    let active = store.get_active_code(&user).unwrap().unwrap();
    assert_eq!(active.code, "X");
    assert_eq!(active.options, Options::new());
}

#[test]
fn duplicate_submission_changes_nothing() {
    let (store, _tmp) = open();
    let school = store.add_school("").unwrap();
    let user = store.add_user(&school).unwrap();
    let mut options = Options::new();
    options.insert("colour".to_owned(), json!("red"));

    let first = store.save_code(&user, "X", &options, true).unwrap();
    let err = store.save_code(&user, "X", &options, true).unwrap_err();

    assert!(matches!(err, StoreError::DuplicateVersion(ref id) if *id == first));
    assert_eq!(store.get_code_versions(&user).unwrap(), vec![first.clone()]);
    assert_eq!(store.get_active_code(&user).unwrap().unwrap().id, first);

    // same code with other options is another version
    store.save_code(&user, "X", &Options::new(), true).unwrap();
    assert_eq!(store.get_code_versions(&user).unwrap().len(), 2);
}

#[test]
fn legacy_code_is_migrated_on_open() {
    let tmp = TempDir::new().unwrap();
    let user = {
        let store = GameStore::open(tmp.path()).unwrap();
        let school = store.add_school("").unwrap();
        store.add_user(&school).unwrap()
    };
    let user_dir = tmp.path().join("data").join(&user);
    fs::write(user_dir.join("code"), "legacy bot").unwrap();
    fs::write(user_dir.join("options.json"), r#"{"speed": 2}"#).unwrap();

    let store = GameStore::open(tmp.path()).unwrap();

    let active = store.get_active_code(&user).unwrap().unwrap();
    assert_eq!(active.code, "legacy bot");
    assert_eq!(active.options.get("speed"), Some(&json!(2)));
    assert!(!user_dir.join("options.json").exists());
    assert!(user_dir.join("code").is_dir());

    // a second open has nothing left to do
    let store = GameStore::open(tmp.path()).unwrap();
    assert_eq!(store.get_code_versions(&user).unwrap().len(), 1);
}

#[test]
fn delete_game_unlinks_everything() {
    let (store, _tmp) = open();
    let school = store.add_school("").unwrap();
    let players: Vec<_> = (0..2).map(|_| store.add_user(&school).unwrap()).collect();
    let comp = store.add_competition("Cup").unwrap();
    let data = players.iter().map(|p| (p.clone(), json!(null))).collect();

    let game = store.add_game(&[json!("frame")], &data).unwrap();
    store.add_game_to_comp(&comp, &game).unwrap();
    store.delete_game(&game).unwrap();

    assert!(!store.is_game_token(&game));
    assert!(store.get_games_for_token(&comp).unwrap().is_empty());
    for player in &players {
        assert!(store.get_games_for_token(player).unwrap().is_empty());
    }
    assert!(matches!(
        store.delete_game(&game),
        Err(StoreError::UnknownGame(_))
    ));
}

#[test]
fn replace_games_in_comp_with_cleanup() {
    let (store, _tmp) = open();
    let comp = store.add_competition("Cup").unwrap();
    let new_game = || store.add_game(&[], &Default::default()).unwrap();
    let (a, b, c) = (new_game(), new_game(), new_game());
    store.add_game_to_comp(&comp, &a).unwrap();
    store.add_game_to_comp(&comp, &b).unwrap();

    store
        .replace_games_in_comp(&comp, &[b.clone(), c.clone()], true)
        .unwrap();

    let mut expected = vec![b.clone(), c.clone()];
    expected.sort();
    assert_eq!(store.get_games_for_token(&comp).unwrap(), expected);
    assert!(!store.is_game_token(&a));
    assert!(store.is_game_token(&b));
}

#[test]
fn replace_games_in_comp_without_cleanup_keeps_records() {
    let (store, _tmp) = open();
    let comp = store.add_competition("Cup").unwrap();
    let old = store.add_game(&[], &Default::default()).unwrap();
    store.add_game_to_comp(&comp, &old).unwrap();

    store.replace_games_in_comp(&comp, &[], false).unwrap();

    assert!(store.get_games_for_token(&comp).unwrap().is_empty());
    assert!(store.is_game_token(&old));
}

#[test]
fn competition_membership() {
    let (store, _tmp) = open();
    let school = store.add_school("Lycée").unwrap();
    let user = store.add_user(&school).unwrap();
    let comp = store.add_competition("Cup").unwrap();
    store.add_school_to_comp(&comp, &school).unwrap();

    assert_eq!(store.get_schools_in_comp(&comp).unwrap(), vec![school.clone()]);
    assert_eq!(store.get_comps_for_token(&user).unwrap(), vec![comp.clone()]);
    assert_eq!(store.get_school_for_token(&user).unwrap(), Some(school.clone()));
    assert_eq!(store.get_name(&school).unwrap().as_deref(), Some("Lycée"));
}

#[test]
fn www_cache_refresh() {
    let (store, tmp) = open();
    let site = tmp.path().join("site");
    fs::create_dir_all(site.join("static")).unwrap();
    fs::create_dir_all(site.join("templates")).unwrap();
    fs::write(site.join("static").join("app.js"), "run()").unwrap();

    let cache = store.www_cache();
    cache.safe_replace_cache(&site).unwrap();

    assert_eq!(
        fs::read_to_string(cache.static_dir().join("app.js")).unwrap(),
        "run()"
    );
    assert!(cache.template_dir().is_dir());
}
