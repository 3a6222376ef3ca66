//! End-to-end registry tests against an in-process stub driver agent.

mod stub_driver;

use std::net::TcpListener;
use std::sync::Arc;
use stub_driver::StubDriver;
use tether_common::TetherError;
use tether_host::{FmqParams, FmqSource, HalTarget, LibTarget, MirrorRegistry};

fn registry_for(stub: &StubDriver) -> MirrorRegistry {
    MirrorRegistry::new("127.0.0.1", stub.port(), None)
}

/// A port with nothing listening on it.
fn dead_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn fmq_registers_under_generated_name() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let queue_id = registry
        .init_fmq(None, FmqParams::default())
        .unwrap()
        .expect("queue should be created")
        .queue_id();

    let name = format!("queue_id_{queue_id}");
    assert!(registry.contains(&name));
    assert_eq!(registry.mirror_count(), 1);
    assert!(registry.fmq(&name).is_some());
}

#[test]
fn fmq_duplicate_name_registers_nothing() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let params = FmqParams {
        queue_name: Some("q".to_string()),
        ..FmqParams::default()
    };
    assert!(registry.init_fmq(None, params.clone()).unwrap().is_some());
    assert!(registry.init_fmq(None, params).unwrap().is_none());
    assert_eq!(registry.mirror_count(), 1);
}

#[test]
fn fmq_write_and_read_reach_the_target() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let params = FmqParams {
        queue_name: Some("q".to_string()),
        ..FmqParams::default()
    };
    registry.init_fmq(None, params).unwrap().unwrap();
    let queue = registry.fmq("q").unwrap();

    assert!(queue.write(&[serde_json::json!(1), serde_json::json!(2)]).unwrap());
    assert_eq!(queue.available_to_read().unwrap(), 2);
    assert!(queue.is_valid().unwrap());

    let items = queue.read(2).unwrap().expect("two elements are readable");
    assert_eq!(items, vec![serde_json::json!(1), serde_json::json!(2)]);

    // The queue is drained now; reading more than is available yields None.
    assert!(queue.read(1).unwrap().is_none());
}

#[test]
fn fmq_creation_failure_yields_no_entry() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let params = FmqParams {
        data_type: "unsupported_t".to_string(),
        ..FmqParams::default()
    };
    assert!(registry.init_fmq(None, params).unwrap().is_none());
    assert_eq!(registry.mirror_count(), 0);
}

#[test]
fn fmq_derive_from_unknown_name_registers_nothing() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let result = registry
        .init_fmq(
            Some(FmqSource::Name("ghost".to_string())),
            FmqParams::default(),
        )
        .unwrap();
    assert!(result.is_none());
    assert_eq!(registry.mirror_count(), 0);
}

#[test]
fn fmq_derive_copies_source_attributes() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let params = FmqParams {
        data_type: "uint32_t".to_string(),
        sync: false,
        queue_name: Some("src".to_string()),
        ..FmqParams::default()
    };
    registry.init_fmq(None, params).unwrap().unwrap();

    let derived_params = FmqParams {
        // Deliberately different; the source's attributes must win.
        data_type: "uint16_t".to_string(),
        sync: true,
        queue_name: Some("derived".to_string()),
        ..FmqParams::default()
    };
    let derived = registry
        .init_fmq(Some(FmqSource::Name("src".to_string())), derived_params)
        .unwrap()
        .expect("derivation from a live queue should succeed");

    assert_eq!(derived.data_type(), "uint32_t");
    assert!(!derived.is_synchronized());
    assert_eq!(registry.mirror_count(), 2);
}

#[test]
fn memory_allocation_failure_yields_no_entry() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    // The stub refuses zero-sized allocations.
    assert!(registry.init_shared_memory(0, None, None).unwrap().is_none());
    assert_eq!(registry.mirror_count(), 0);
}

#[test]
fn memory_bytes_roundtrip_through_the_target() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    registry
        .init_shared_memory(64, Some("m"), None)
        .unwrap()
        .expect("allocation should succeed");
    let region = registry.memory("m").unwrap();

    region.update_bytes(0, b"abc").unwrap();
    assert_eq!(region.read_bytes(0, 3).unwrap(), b"abc".to_vec());
    assert_eq!(region.size(), 64);
}

#[test]
fn file_handle_registers_under_generated_name() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let handle_id = registry
        .init_file_handle("/data/local/tmp/f.txt", "w", &[], None, None)
        .unwrap()
        .expect("handle should be created")
        .handle_id();

    let name = format!("handle_id_{handle_id}");
    assert!(registry.contains(&name));

    let handle = registry.file_handle(&name).unwrap();
    assert_eq!(handle.write_file(b"hi").unwrap(), 2);
    assert_eq!(handle.read_file(2).unwrap(), b"hi".to_vec());
}

#[test]
fn file_handle_creation_failure_yields_no_entry() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let result = registry
        .init_file_handle("/nonexistent/f.txt", "r", &[], None, None)
        .unwrap();
    assert!(result.is_none());
    assert_eq!(registry.mirror_count(), 0);
}

#[test]
fn terminal_launches_a_shell_driver_and_registers() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    registry.invoke_terminal("t1", 64).unwrap();
    assert!(registry.contains("t1"));
    assert!(stub.launched_services().contains(&"shell_t1".to_string()));

    let results = registry.shell("t1").unwrap().execute(&["id".to_string()]).unwrap();
    assert_eq!(results.stdouts, vec!["ran:id".to_string()]);
    assert!(results.succeeded());
}

#[test]
fn terminal_duplicate_name_is_rejected() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    registry.invoke_terminal("t1", 64).unwrap();
    let result = registry.invoke_terminal("t1", 32);
    assert!(matches!(result, Err(TetherError::AlreadyRegistered(_))));
    assert_eq!(registry.mirror_count(), 1);
}

#[test]
fn refused_launch_is_fatal_to_the_terminal() {
    let stub = StubDriver::refusing();
    let mut registry = registry_for(&stub);

    let result = registry.invoke_terminal("t1", 64);
    assert!(matches!(result, Err(TetherError::ComponentLoading(_))));
    assert_eq!(registry.mirror_count(), 0);
}

#[test]
fn bare_execute_creates_the_default_terminal() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let results = registry.execute("echo hi", false).unwrap();
    assert!(results.succeeded());
    assert!(registry.contains("_default"));

    // A failing command is a result, not an error.
    let results = registry.execute("fail hard", false).unwrap();
    assert_eq!(results.exit_codes, vec![1]);
}

#[test]
fn execute_no_except_absorbs_an_unreachable_target() {
    let mut registry = MirrorRegistry::new("127.0.0.1", dead_port(), None);

    let results = registry.execute("id", true).unwrap();
    assert_eq!(results.exit_codes, vec![-1]);
    assert!(!results.stderrs[0].is_empty());

    // Without no_except the connection failure propagates.
    let result = registry.execute("id", false);
    assert!(matches!(result, Err(TetherError::Connection { .. })));
}

#[test]
fn disabled_shell_refuses_to_execute() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    registry.invoke_terminal("t1", 64).unwrap();
    registry.disable_shell();

    let result = registry.shell("t1").unwrap().execute(&["id".to_string()]);
    assert!(matches!(result, Err(TetherError::UserInput(_))));
}

#[test]
fn remove_mirror_releases_and_forgets() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    registry
        .init_shared_memory(64, Some("m"), None)
        .unwrap()
        .unwrap();
    registry.remove_mirror("m").unwrap();
    assert!(!registry.contains("m"));

    let result = registry.remove_mirror("m");
    assert!(matches!(result, Err(TetherError::NotRegistered(_))));
}

#[test]
fn clean_up_is_idempotent_and_stops_the_callback_server() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);
    registry.start_callback_server().unwrap();

    registry
        .init_shared_memory(64, Some("m"), None)
        .unwrap()
        .unwrap();
    registry.invoke_terminal("t1", 64).unwrap();
    assert_eq!(registry.mirror_count(), 2);

    registry.clean_up();
    assert_eq!(registry.mirror_count(), 0);
    assert!(registry.callback_server().is_none());

    // Calling again on an empty registry never raises.
    registry.clean_up();
    assert_eq!(registry.mirror_count(), 0);
}

#[test]
fn hal_mirror_launches_loads_and_calls() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let mut target = HalTarget::new("light");
    target.version = Some(1.0);
    target.package = "android.hardware.light".to_string();
    let mirror = registry.init_hal(target).unwrap();

    assert_eq!(mirror.version().major, 1);
    assert_eq!(mirror.version().minor, 0);
    assert!(stub.launched_services().contains(&"hal_light".to_string()));

    let payload = registry
        .hal("light")
        .unwrap()
        .call("setLight", vec![serde_json::json!(7)])
        .unwrap();
    assert_eq!(payload, Some(serde_json::json!("setLight:ok")));
}

#[test]
fn hal_announces_the_callback_port_when_a_server_runs() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);
    let (_, port) = registry.start_callback_server().unwrap();

    let mut target = HalTarget::new("light");
    target.version_major = Some(1);
    target.version_minor = Some(0);
    registry.init_hal(target).unwrap();

    assert_eq!(stub.announced_callback_ports(), vec![port]);
}

#[test]
fn hal_duplicate_handler_name_is_rejected() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let mut target = HalTarget::new("light");
    target.version = Some(1.0);
    registry.init_hal(target.clone()).unwrap();

    let result = registry.init_hal(target);
    assert!(matches!(result, Err(TetherError::AlreadyRegistered(_))));
    assert_eq!(registry.mirror_count(), 1);
}

#[test]
fn hal_load_failure_is_component_loading() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    // The stub launches the driver but cannot load this service.
    let mut target = HalTarget::new("broken");
    target.version = Some(1.0);
    let result = registry.init_hal(target);
    assert!(matches!(result, Err(TetherError::ComponentLoading(_))));
    assert_eq!(registry.mirror_count(), 0);
}

#[test]
fn shared_lib_mirror_loads_and_calls() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    let mut target = LibTarget::new("bionic_libm");
    target.version_major = Some(1);
    target.version_minor = Some(0);
    target.file_name = "libm.so".to_string();
    registry.init_shared_lib(target).unwrap();

    assert!(stub.launched_services().contains(&"lib_bionic_libm".to_string()));

    let payload = registry
        .shared_lib("bionic_libm")
        .unwrap()
        .call("sqrt", vec![serde_json::json!(4.0)])
        .unwrap();
    assert_eq!(payload, Some(serde_json::json!("sqrt:ok")));

    // Library sessions never announce a callback port.
    assert!(stub.announced_callback_ports().is_empty());
}

#[test]
fn get_channel_allows_session_reuse() {
    let stub = StubDriver::spawn();
    let mut registry = registry_for(&stub);

    registry
        .init_shared_memory(64, Some("m"), None)
        .unwrap()
        .unwrap();
    let channel = registry.get_channel("m").expect("mirror is registered");

    let params = FmqParams {
        queue_name: Some("q".to_string()),
        client: Some(channel.clone()),
        ..FmqParams::default()
    };
    registry.init_fmq(None, params).unwrap().unwrap();

    let queue_channel = registry.get_channel("q").unwrap();
    assert!(Arc::ptr_eq(&channel, &queue_channel));
}
