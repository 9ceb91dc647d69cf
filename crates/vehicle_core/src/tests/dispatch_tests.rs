use super::*;
use crate::{actuator::RecordingOutput, config::EscCalibration};

use serde_json::json;

struct Rig {
    dispatcher: Dispatcher,
    steering: RecordingOutput,
    esc: RecordingOutput,
    yaw: RecordingOutput,
    pitch: RecordingOutput,
    mode: RecordingOutput,
}

fn rig() -> Rig {
    let steering = RecordingOutput::new();
    let esc = RecordingOutput::new();
    let yaw = RecordingOutput::new();
    let pitch = RecordingOutput::new();
    let mode = RecordingOutput::new();
    let drive = DriveController::new(
        Box::new(steering.clone()),
        Box::new(esc.clone()),
        EscCalibration::default(),
    );
    let gimbal = GimbalController::new(
        Box::new(yaw.clone()),
        Box::new(pitch.clone()),
        Box::new(mode.clone()),
    );
    let video = VideoSupervisor::new(None, None);
    Rig {
        dispatcher: Dispatcher::new(drive, gimbal, video),
        steering,
        esc,
        yaw,
        pitch,
        mode,
    }
}

fn frame(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).expect("json")
}

#[test]
fn init_envelope_configures_drive_and_gimbal() {
    let mut rig = rig();
    let outcome = rig.dispatcher.handle_frame(&frame(json!({
        "data": { "action": "init", "carSpeed": 70, "degreeOfTurns": 90 }
    })));

    assert!(matches!(outcome, DispatchOutcome::Applied(Action::Init { .. })));
    let state = rig.dispatcher.drive().state();
    assert_eq!(state.car_speed, 70);
    assert_eq!(state.turn_angle_degrees, 90.0);
    assert!(!state.engine_running);
    assert_eq!(rig.esc.last(), Some(1500));
    assert_eq!(rig.steering.last(), Some(1500));
    assert_eq!(rig.mode.last(), Some(2000));
}

#[test]
fn forward_at_full_speed_hits_max_pulse() {
    let mut rig = rig();
    rig.dispatcher.handle_frame(&frame(json!({
        "to": "rc-car-server",
        "data": { "action": "forward", "carSpeed": 100 }
    })));

    assert_eq!(rig.esc.last(), Some(2000));
    assert!(rig.dispatcher.drive().state().engine_running);
}

#[test]
fn pitch_below_range_clamps() {
    let mut rig = rig();
    rig.dispatcher.handle_frame(&frame(json!({
        "data": { "action": "camera-gimbal-set-pitch-angle", "degrees": -100 }
    })));

    assert_eq!(rig.pitch.last(), Some(1000));
    assert_eq!(rig.dispatcher.gimbal().state().pitch_angle_degrees, -90.0);
    assert!(rig.yaw.writes().is_empty());
}

#[test]
fn numeric_strings_are_accepted() {
    let mut rig = rig();
    rig.dispatcher.handle_frame(&frame(json!({
        "data": { "action": "turn-to", "degrees": "45" }
    })));
    assert_eq!(rig.steering.last(), Some(1000));

    rig.dispatcher.handle_frame(&frame(json!({
        "data": { "action": "backward", "carSpeed": " 50km/h" }
    })));
    assert_eq!(rig.esc.last(), Some(1250));
}

#[test]
fn non_numeric_parameters_fall_back_to_defaults() {
    let mut rig = rig();
    rig.dispatcher.handle_frame(&frame(json!({
        "data": { "action": "init", "carSpeed": 60, "degreeOfTurns": 100 }
    })));

    rig.dispatcher.handle_frame(&frame(json!({
        "data": { "action": "forward", "carSpeed": "fast" }
    })));
    // falls back to the initialised speed of 60
    assert_eq!(rig.esc.last(), Some(1800));

    rig.dispatcher.handle_frame(&frame(json!({
        "data": { "action": "change-degree-of-turns", "degreeOfTurns": null }
    })));
    assert_eq!(rig.dispatcher.drive().state().turn_angle_degrees, 100.0);

    rig.dispatcher.handle_frame(&frame(json!({
        "data": { "action": "reset-turns" }
    })));
    assert_eq!(rig.dispatcher.drive().state().turn_angle_degrees, 90.0);

    rig.dispatcher.handle_frame(&frame(json!({
        "data": { "action": "camera-gimbal-turn-to", "degrees": {"x": 1} }
    })));
    assert_eq!(rig.yaw.last(), Some(1500));
}

#[test]
fn reset_turns_honours_explicit_angle() {
    let mut rig = rig();
    rig.dispatcher.handle_frame(&frame(json!({
        "data": { "action": "reset-turns", "degreeOfTurns": 87 }
    })));
    assert_eq!(rig.steering.last(), Some(1467));
}

#[test]
fn unknown_missing_and_malformed_frames_are_dropped() {
    let mut rig = rig();

    assert_eq!(
        rig.dispatcher
            .handle_frame(&frame(json!({ "data": { "action": "launch-rockets" } }))),
        DispatchOutcome::UnknownAction("launch-rockets".into())
    );
    assert_eq!(
        rig.dispatcher
            .handle_frame(&frame(json!({ "message": "Connection Established" }))),
        DispatchOutcome::MissingAction
    );
    assert_eq!(
        rig.dispatcher.handle_frame(b"{\"data\": {\"action\": "),
        DispatchOutcome::Malformed
    );

    for output in [&rig.steering, &rig.esc, &rig.yaw, &rig.pitch, &rig.mode] {
        assert!(output.writes().is_empty());
    }
}

#[test]
fn camera_aliases_decode_to_the_same_action() {
    let params = Map::new();
    assert_eq!(Action::decode("start-camera", &params), Action::StartCamera);
    assert_eq!(Action::decode("run-mediamtx", &params), Action::StartCamera);
    assert_eq!(Action::decode("stop-camera", &params), Action::StopCamera);
    assert_eq!(Action::decode("stop-mediamtx", &params), Action::StopCamera);
}

#[test]
fn every_table_entry_decodes() {
    let params = Map::new();
    for name in [
        "init",
        "stop-car",
        "breaking",
        "reset-turns",
        "change-degree-of-turns",
        "turn-to",
        "forward",
        "backward",
        "set-esc-to-neutral-position",
        "camera-gimbal-turn-to",
        "camera-gimbal-set-pitch-angle",
        "reset-camera-gimbal",
    ] {
        let action = Action::decode(name, &params);
        assert!(!matches!(action, Action::Unknown(_)), "{name}");
        assert_eq!(action.name(), name);
    }
}

#[test]
fn numeric_param_rules() {
    let params = json!({
        "int": 70,
        "float": 12.5,
        "text": "42",
        "prefix": "-30deg",
        "fraction": ".5",
        "sign_only": "-",
        "word": "abc",
        "flag": true,
    });
    let params = params.as_object().expect("object");

    assert_eq!(numeric_param(params, "int"), Some(70.0));
    assert_eq!(numeric_param(params, "float"), Some(12.5));
    assert_eq!(numeric_param(params, "text"), Some(42.0));
    assert_eq!(numeric_param(params, "prefix"), Some(-30.0));
    assert_eq!(numeric_param(params, "fraction"), Some(0.5));
    assert_eq!(numeric_param(params, "sign_only"), None);
    assert_eq!(numeric_param(params, "word"), None);
    assert_eq!(numeric_param(params, "flag"), None);
    assert_eq!(numeric_param(params, "missing"), None);
}

#[tokio::test]
async fn camera_start_failure_does_not_fault_dispatch() {
    let mut rig = rig();
    let outcome = rig
        .dispatcher
        .handle_frame(&frame(json!({ "data": { "action": "start-camera" } })));

    assert_eq!(outcome, DispatchOutcome::Applied(Action::StartCamera));
    assert!(!rig.dispatcher.video().is_running());
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_car_and_settles() {
    let mut rig = rig();
    rig.dispatcher.apply(Action::Move {
        direction: Direction::Forward,
        car_speed: Some(80.0),
    });
    rig.esc.clear();

    rig.dispatcher.shutdown();
    rig.dispatcher.settle().await;

    assert_eq!(rig.esc.pulses(), vec![1500, 1250]);
    assert!(!rig.dispatcher.drive().state().engine_running);
    assert_eq!(rig.dispatcher.next_deadline(), None);
}
