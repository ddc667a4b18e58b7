use super::bootstrap::{
    parse_samples_per_turn, replay_path_from_args, PlayerWiring, DEFAULT_SAMPLES_PER_TURN,
};
use super::loop_runner::{play, PlayerError};
use super::replay_file::{parse_replay_json, ReplayLoadError};
use replay_engine::{CanvasInfo, ASSET_ROOT_ENV_VAR};
use serde_json::{json, Value};
use std::ffi::OsString;
use std::fs;
use std::path::Path;

fn wiring(replay_path: &Path, samples_per_turn: u32) -> PlayerWiring {
    PlayerWiring {
        replay_path: replay_path.to_path_buf(),
        samples_per_turn,
        canvas: CanvasInfo::new(1920.0, 1080.0),
    }
}

fn write_replay(dir: &Path, replay: &Value) -> std::path::PathBuf {
    let path = dir.join("replay.json");
    fs::write(&path, replay.to_string()).expect("write replay");
    path
}

fn output_lines(out: &[u8]) -> Vec<Value> {
    String::from_utf8(out.to_vec())
        .expect("utf8 output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

fn asset_root_overridden() -> bool {
    std::env::var_os(ASSET_ROOT_ENV_VAR).is_some()
}

#[test]
fn samples_per_turn_falls_back_on_bad_values() {
    assert_eq!(parse_samples_per_turn(None), DEFAULT_SAMPLES_PER_TURN);
    assert_eq!(parse_samples_per_turn(Some(" 10 ")), 10);
    assert_eq!(parse_samples_per_turn(Some("0")), DEFAULT_SAMPLES_PER_TURN);
    assert_eq!(parse_samples_per_turn(Some("many")), DEFAULT_SAMPLES_PER_TURN);
}

#[test]
fn replay_path_is_the_first_non_empty_argument() {
    let args = vec![OsString::new(), OsString::from("game.json"), OsString::from("extra")];
    assert_eq!(
        replay_path_from_args(args),
        Some(std::path::PathBuf::from("game.json"))
    );
    assert_eq!(replay_path_from_args(Vec::<OsString>::new()), None);
}

#[test]
fn parse_errors_name_the_offending_field() {
    let err = parse_replay_json(r#"{"frames": [{"duration": "slow"}]}"#)
        .expect_err("duration must be a number");
    match err {
        ReplayLoadError::Parse { at, .. } => assert_eq!(at, "frames[0].duration"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn replay_without_frames_is_rejected() {
    let err = parse_replay_json(r#"{"players": []}"#).expect_err("frames are required");
    assert!(matches!(err, ReplayLoadError::Parse { .. }));
}

#[test]
fn optional_sections_default_when_absent() {
    let replay = parse_replay_json(r#"{"frames": [{}]}"#).expect("minimal replay");
    assert!(replay.players.is_empty());
    assert!(replay.assets.images.is_empty());
    assert_eq!(replay.world().width, 1920.0);
    assert_eq!(replay.frames[0].entitymodule, None);
}

#[test]
fn play_prints_one_line_per_sample_then_errors() {
    if asset_root_overridden() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_replay(
        dir.path(),
        &json!({
            "players": [{"name": "Alice", "color": 16711680}],
            "frames": [
                {"duration": 1000, "entitymodule": "C R\nU 1 1 x 100 y 50"},
                {"entitymodule": "C S\nU 2 1 i ghost"}
            ]
        }),
    );

    let mut out = Vec::new();
    let summary = play(&wiring(&path, 2), &mut out).expect("playback succeeds");

    assert_eq!(summary.turns, 2);
    assert_eq!(summary.samples, 4);
    assert_eq!(summary.errors, 1);

    let lines = output_lines(&out);
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0]["turn"], json!(0));
    assert_eq!(lines[0]["progress"], json!(0.5));
    assert_eq!(lines[0]["scene"]["nodes"]["1"]["transform"]["x"], json!(50.0));
    assert_eq!(lines[1]["scene"]["nodes"]["1"]["transform"]["x"], json!(100.0));
    assert_eq!(lines[1]["scene"]["nodes"]["1"]["transform"]["y"], json!(50.0));
    assert_eq!(
        lines[4]["error"],
        json!({"kind": "missing_image", "name": "ghost"})
    );
}

#[test]
fn toggles_from_the_replay_hide_entities() {
    if asset_root_overridden() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_replay(
        dir.path(),
        &json!({
            "modules": {"toggles": {"debug": false}},
            "frames": [{
                "entitymodule": "C R\nU 1 1 x 10",
                "modules": {"toggles": {"1": {"name": "debug", "state": true}}}
            }]
        }),
    );

    let mut out = Vec::new();
    play(&wiring(&path, 1), &mut out).expect("playback succeeds");

    let lines = output_lines(&out);
    assert_eq!(lines.len(), 1);
    assert_eq!(
        lines[0]["scene"]["nodes"]["1"]["transform"]["visible"],
        json!(false)
    );
}

#[test]
fn entities_created_on_later_turns_are_placed_in_the_tree() {
    if asset_root_overridden() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_replay(
        dir.path(),
        &json!({
            "frames": [
                {"entitymodule": "C R\nU 1 1 x 10"},
                {"entitymodule": "C C\nU 2 1 x 5 z -1"}
            ]
        }),
    );

    let mut out = Vec::new();
    play(&wiring(&path, 1), &mut out).expect("playback succeeds");

    let lines = output_lines(&out);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["scene"]["tree"]["roots"], json!([1]));
    assert_eq!(lines[1]["scene"]["tree"]["roots"], json!([2, 1]));
    assert_eq!(lines[1]["scene"]["nodes"]["2"]["transform"]["x"], json!(5.0));
}

#[test]
fn unknown_entity_fails_playback() {
    if asset_root_overridden() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_replay(dir.path(), &json!({"frames": [{"entitymodule": "U 9 1 x 1"}]}));

    let mut out = Vec::new();
    let err = play(&wiring(&path, 1), &mut out).expect_err("entity 9 was never created");
    assert!(matches!(err, PlayerError::Frame(_)));
}

#[test]
fn missing_replay_file_is_a_read_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut out = Vec::new();
    let err = play(&wiring(&dir.path().join("absent.json"), 1), &mut out)
        .expect_err("file does not exist");
    assert!(matches!(err, PlayerError::Load(ReplayLoadError::Read { .. })));
}
