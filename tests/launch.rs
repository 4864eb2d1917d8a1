use crate::games::{arena, config, school_with};

use std::fs;

use tempfile::TempDir;

mod games;

#[test]
fn launch_arena_with_file_log() {
    let tmp = TempDir::new().unwrap();
    let arena = arena(config(tmp.path()).with_log(true).with_batch_size(2), 4);
    let store = arena.store();
    let (school, users) = school_with(store, &["score:3", "score:9", "does not compile"]);

    let mut scheduler = arena.scheduler().unwrap();
    for pass in 0..3 {
        let report = scheduler.run_pass().unwrap();
        assert_eq!(report.pass, pass);
        assert_eq!(report.games.len(), 2);
        assert_eq!(report.compile_failures, 1);
    }
    assert_eq!(scheduler.get_passes_run(), 3);
    assert_eq!(scheduler.get_ladder(&school).unwrap().len(), 2);
    assert_eq!(store.get_avg_score(&users[1]).unwrap(), Some(9.0));

    let logs = fs::read_dir(tmp.path().join("logs"))
        .unwrap()
        .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].contains("pass done"));
    assert!(logs[0].contains("couldn't compile code"));

    // opening a second arena in the same process cannot install another global logger
    let other = TempDir::new().unwrap();
    let config = config(other.path()).with_log(true);
    let result = bot_arena::arena::Arena::open(
        config,
        std::sync::Arc::new(games::ScriptCompiler),
        std::sync::Arc::new(games::ScriptEngine::new(4)),
    );
    assert!(result.is_err());
}
