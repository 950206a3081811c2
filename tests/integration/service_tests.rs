//! End-to-end command handling: JSON line → RpcEngine → GpioService →
//! mock ports, including fail-safe reverts driven by `tick`.

use embedded_hal::digital::PinState;
use pinlink::app::events::AppEvent;
use pinlink::rpc::engine::RpcEngine;
use pinlink::update::{BootDecision, ImageState, Slot};
use serde_json::{Value, json};

use crate::mock_hw::{MockNvs, Rig, SystemCall};

fn call(rig: &mut Rig, engine: &mut RpcEngine, now_ms: u64, request: Value) -> Value {
    let line = serde_json::to_vec(&request).unwrap();
    let (service, mut ports) = rig.parts();
    let out = engine.handle_line(&line, now_ms, service, &mut ports);
    assert_eq!(out.last(), Some(&b'\n'), "response must be newline terminated");
    serde_json::from_slice(&out).unwrap()
}

fn tick(rig: &mut Rig, now_ms: u64) -> usize {
    let (service, mut ports) = rig.parts();
    service.tick(now_ms, &mut ports)
}

fn setup_output(rig: &mut Rig, engine: &mut RpcEngine, pin: u8) {
    let res = call(
        rig,
        engine,
        0,
        json!({"action": "setup_pin", "pin": pin, "mode": "output", "value": 0}),
    );
    assert!(res.get("error").is_none(), "setup failed: {res}");
}

fn read(rig: &mut Rig, engine: &mut RpcEngine, now_ms: u64, pin: u8) -> Value {
    call(rig, engine, now_ms, json!({"action": "read_pin", "pin": pin}))["value"].clone()
}

// ── Registry preconditions ───────────────────────────────────

#[test]
fn read_before_setup_is_a_precondition_error() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();

    let res = call(&mut rig, &mut engine, 5, json!({"action": "read_pin", "pin": 4}));
    assert_eq!(res["exception"], "PreconditionError");
    assert_eq!(res["error"], "pin 4 not setup");
    assert_eq!(res["pin"], 4, "failure echoes the request");
    assert!(res.get("time_received").is_none());
    assert!(rig.gpio.calls.is_empty(), "hardware untouched");
}

#[test]
fn write_to_input_is_rejected() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();

    call(&mut rig, &mut engine, 0, json!({"action": "setup_pin", "pin": 5, "mode": "input"}));
    let res = call(&mut rig, &mut engine, 1, json!({"action": "write_pin", "pin": 5, "value": 1}));
    assert_eq!(res["exception"], "PreconditionError");
    assert!(rig.gpio.writes().is_empty());
}

#[test]
fn input_read_reports_external_level() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();

    call(&mut rig, &mut engine, 0, json!({"action": "setup_pin", "pin": 6, "mode": "input"}));
    rig.gpio.set_level(6, PinState::High);

    let res = call(&mut rig, &mut engine, 42, json!({"action": "read_pin", "pin": 6}));
    assert_eq!(res["value"], 1);
    assert_eq!(res["time_received"], 42);
}

#[test]
fn reserved_pin_cannot_be_configured() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();

    let res = call(
        &mut rig,
        &mut engine,
        0,
        json!({"action": "setup_pin", "pin": 19, "mode": "output"}),
    );
    assert_eq!(res["exception"], "PreconditionError");
    assert!(rig.gpio.calls.is_empty());
}

// ── Fail-safe reverts ────────────────────────────────────────

#[test]
fn timed_write_reverts_after_deadline() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();
    setup_output(&mut rig, &mut engine, 4);

    let res = call(
        &mut rig,
        &mut engine,
        1_000,
        json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 2}),
    );
    assert!(res.get("error").is_none());
    assert_eq!(res["timeout"], 2, "echo keeps the request fields");

    assert_eq!(tick(&mut rig, 2_999), 0);
    assert_eq!(read(&mut rig, &mut engine, 2_999, 4), 1);

    assert_eq!(tick(&mut rig, 3_000), 1);
    assert_eq!(read(&mut rig, &mut engine, 3_001, 4), 0);
    assert_eq!(rig.gpio.level(4), Some(PinState::Low));
    assert_eq!(rig.service.failsafe_stats().fired, 1);
    assert_eq!(
        rig.sink
            .count(|e| matches!(e, AppEvent::RevertFired { pin: 4, value: PinState::Low })),
        1
    );
}

#[test]
fn rearm_restores_level_from_before_first_write() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();
    setup_output(&mut rig, &mut engine, 4);

    call(
        &mut rig,
        &mut engine,
        0,
        json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 1}),
    );
    call(
        &mut rig,
        &mut engine,
        500,
        json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 1}),
    );
    assert_eq!(rig.service.scheduler().armed_count(), 1);

    // First deadline has passed, but the timer moved.
    assert_eq!(tick(&mut rig, 1_200), 0);
    assert_eq!(rig.gpio.level(4), Some(PinState::High));

    assert_eq!(tick(&mut rig, 1_500), 1);
    assert_eq!(rig.gpio.level(4), Some(PinState::Low));
    assert_eq!(rig.service.scheduler().armed_count(), 0);
}

#[test]
fn bare_write_leaves_timer_running() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();
    setup_output(&mut rig, &mut engine, 4);

    call(
        &mut rig,
        &mut engine,
        0,
        json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 1}),
    );
    call(&mut rig, &mut engine, 100, json!({"action": "write_pin", "pin": 4, "value": 0}));
    call(&mut rig, &mut engine, 200, json!({"action": "write_pin", "pin": 4, "value": 1}));

    assert_eq!(tick(&mut rig, 1_000), 1);
    assert_eq!(rig.gpio.level(4), Some(PinState::Low));
}

#[test]
fn setup_cancels_outstanding_failsafe() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();
    setup_output(&mut rig, &mut engine, 4);

    call(
        &mut rig,
        &mut engine,
        0,
        json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 1}),
    );
    call(
        &mut rig,
        &mut engine,
        100,
        json!({"action": "setup_pin", "pin": 4, "mode": "output", "value": 1}),
    );
    assert_eq!(rig.service.scheduler().armed_count(), 0);
    assert_eq!(
        rig.sink
            .count(|e| matches!(e, AppEvent::RevertCancelled { pin: 4 })),
        1
    );

    assert_eq!(tick(&mut rig, 5_000), 0);
    assert_eq!(rig.gpio.level(4), Some(PinState::High));
}

#[test]
fn failed_revert_is_counted_not_retried() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();
    setup_output(&mut rig, &mut engine, 4);
    call(
        &mut rig,
        &mut engine,
        0,
        json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 0.5}),
    );

    rig.gpio.fail_writes = Some(0x103);
    assert_eq!(tick(&mut rig, 500), 1);
    assert_eq!(tick(&mut rig, 1_000), 0, "failed restore is not retried");

    let stats = rig.service.failsafe_stats();
    assert_eq!(stats.fired, 0);
    assert_eq!(stats.failed, 1);
    let failure = stats.last_failure.as_ref().unwrap();
    assert_eq!(failure.pin, 4);
    assert_eq!(failure.uptime_ms, 500);
}

#[test]
fn rejected_setup_keeps_failsafe_armed() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();
    setup_output(&mut rig, &mut engine, 4);
    call(
        &mut rig,
        &mut engine,
        0,
        json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 1}),
    );

    rig.gpio.fail_writes = Some(0x103);
    let res = call(
        &mut rig,
        &mut engine,
        10,
        json!({"action": "setup_pin", "pin": 4, "mode": "output", "value": 1}),
    );
    assert_eq!(res["exception"], "HardwareError");
    assert_eq!(rig.service.scheduler().armed_count(), 1);
    assert_eq!(
        rig.sink.count(|e| matches!(e, AppEvent::RevertCancelled { .. })),
        0
    );

    rig.gpio.fail_writes = None;
    assert_eq!(tick(&mut rig, 1_000), 1);
    assert_eq!(rig.gpio.level(4), Some(PinState::Low));
    assert_eq!(rig.service.failsafe_stats().fired, 1);
}

// ── System actions ───────────────────────────────────────────

#[test]
fn reset_runs_after_response_delay() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();

    let res = call(&mut rig, &mut engine, 100, json!({"action": "reset"}));
    assert!(res.get("error").is_none());
    assert!(rig.system.calls.is_empty(), "restart must not run inside dispatch");

    tick(&mut rig, 1_099);
    assert!(rig.system.calls.is_empty());
    tick(&mut rig, 1_100);
    assert_eq!(rig.system.calls, [SystemCall::Restart]);
}

#[test]
fn deep_sleep_refused_while_failsafe_armed() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();
    setup_output(&mut rig, &mut engine, 4);
    call(
        &mut rig,
        &mut engine,
        0,
        json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 10}),
    );

    let res = call(
        &mut rig,
        &mut engine,
        10,
        json!({"action": "sleep", "time_ms": 60000, "deep": true}),
    );
    assert_eq!(res["exception"], "PreconditionError");
    tick(&mut rig, 5_000);
    assert!(rig.system.calls.is_empty());
}

#[test]
fn light_sleep_wakes_for_revert_deadlines() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();
    setup_output(&mut rig, &mut engine, 4);
    call(
        &mut rig,
        &mut engine,
        0,
        json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 1.5}),
    );
    call(
        &mut rig,
        &mut engine,
        0,
        json!({"action": "sleep", "time_ms": 2000, "deep": false}),
    );

    // Sleep starts at t=1000, wakes at the t=1500 deadline, then finishes.
    tick(&mut rig, 1_000);
    assert_eq!(
        rig.system.calls,
        [SystemCall::LightSleep(500), SystemCall::LightSleep(1_500)]
    );
    assert_eq!(rig.gpio.level(4), Some(PinState::Low));
    assert_eq!(rig.service.failsafe_stats().fired, 1);
}

// ── Update ───────────────────────────────────────────────────

#[test]
fn update_without_staged_image_fails() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();

    let res = call(&mut rig, &mut engine, 0, json!({"action": "update"}));
    assert_eq!(res["exception"], "PreconditionError");
    assert_eq!(res["error"], "update: no staged image to boot");
    tick(&mut rig, 10_000);
    assert!(rig.system.calls.is_empty());
}

#[test]
fn update_switches_slot_and_restarts_into_trial() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();
    rig.service
        .update_mut()
        .stage(&mut rig.nvs, "1.1.0")
        .unwrap();

    let res = call(&mut rig, &mut engine, 0, json!({"action": "update"}));
    assert!(res.get("error").is_none(), "{res}");
    tick(&mut rig, 1_000);
    assert_eq!(rig.system.calls, [SystemCall::Restart]);

    // Next boot reads the persisted marker.
    let Rig { nvs, .. } = rig;
    let mut rig = Rig::with_storage(nvs);
    let decision = rig.service.update_mut().on_boot(&mut rig.nvs).unwrap();
    assert_eq!(decision, BootDecision::Trial { attempt: 1 });
    assert_eq!(rig.service.update().marker().active, Slot::B);
    assert_eq!(rig.service.update().active_version(), Some("1.1.0"));

    assert!(rig.service.update_mut().confirm(&mut rig.nvs).unwrap());
    let Rig { nvs, .. } = rig;
    let rig = Rig::with_storage(nvs);
    assert_eq!(rig.service.update().marker().state, ImageState::Confirmed);
}

// ── Introspection ────────────────────────────────────────────

#[test]
fn resource_info_reports_board_and_counters() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();
    setup_output(&mut rig, &mut engine, 4);
    call(
        &mut rig,
        &mut engine,
        0,
        json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 30}),
    );

    let res = call(&mut rig, &mut engine, 7_000, json!({"action": "get_resource_info"}));
    let info = &res["info"];
    assert_eq!(info["board"], "esp32s3");
    assert_eq!(info["uptime_ms"], 7_000);
    assert_eq!(info["pins_configured"], 1);
    assert_eq!(info["commands_handled"], 3);
    assert_eq!(info["failsafe"]["armed"], 1);
    assert!(info["mem_free"].as_u64().unwrap() > 0);
    assert!(info["last_panic"].is_null());
}

#[test]
fn version_and_ping() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();

    let res = call(&mut rig, &mut engine, 3, json!({"action": "get_version"}));
    assert_eq!(res["version"], env!("CARGO_PKG_VERSION"));

    let res = call(&mut rig, &mut engine, 4, json!({"action": "ping", "seq": 9}));
    assert_eq!(res, json!({"action": "ping", "seq": 9, "time_received": 4}));
}

#[test]
fn garbage_gets_parse_error_without_echo() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();

    let (service, mut ports) = rig.parts();
    let out = engine.handle_line(b"{not json", 0, service, &mut ports);
    let res: Value = serde_json::from_slice(&out).unwrap();
    let obj = res.as_object().unwrap();
    assert_eq!(obj.len(), 2);
    assert_eq!(res["exception"], "ParseError");
    assert_eq!(engine.failed(), 1);

    let out = engine.handle_line(b"[1,2]", 0, service, &mut ports);
    let res: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(res["exception"], "ParseError");
}

#[test]
fn missing_fields_are_listed() {
    let mut rig = Rig::new();
    let mut engine = RpcEngine::new();

    let res = call(&mut rig, &mut engine, 0, json!({"action": "setup_pin"}));
    assert_eq!(res["exception"], "ValidationError");
    assert_eq!(res["error"], "incomplete command, missing fields: pin, mode");
}

#[test]
fn storage_survives_fresh_rig() {
    // A board with no marker boots the factory image in slot A.
    let mut rig = Rig::with_storage(MockNvs::new());
    let decision = rig.service.update_mut().on_boot(&mut rig.nvs).unwrap();
    assert_eq!(decision, BootDecision::Normal);
    assert_eq!(rig.service.update().marker().active, Slot::A);
}
