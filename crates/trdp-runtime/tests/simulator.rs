//! Simulator built from a JSON configuration over SimEngine.

mod common;

use std::time::Duration;

use common::*;
use trdp_runtime::{
    parse_config, EndpointId, PdDirection, RuntimeError, SessionId, Simulator,
};

const CONFIG: &str = r#"{
    "interfaces": [
        {
            "name": "eth0",
            "networkId": 1,
            "hostIp": "127.0.0.1",
            "leaderIp": "",
            "telegrams": [
                { "comId": 1000, "datasetId": 1, "exchangeType": "source+sink", "cycleTimeUs": 20000 },
                {
                    "comId": 2000, "datasetId": 2,
                    "sources": [{ "uriHost": "127.0.0.1" }],
                    "destinations": [{ "uriHost": "127.0.0.2" }]
                }
            ]
        },
        {
            "name": "eth1",
            "networkId": 2,
            "hostIp": "127.0.0.2",
            "telegrams": [
                {
                    "comId": 2000, "datasetId": 2,
                    "sources": [{ "uriHost": "127.0.0.1" }],
                    "destinations": [{ "uriHost": "127.0.0.2" }]
                }
            ]
        },
        {
            "name": "broken",
            "hostIp": "not-an-address",
            "telegrams": [{ "comId": 3000, "exchangeType": "source" }]
        }
    ],
    "datasets": [
        { "id": 1, "name": "counter", "elements": [{ "type": "UINT64" }] },
        { "id": 2, "name": "doors", "elements": [{ "name": "open", "type": "BOOL8", "arraySize": 4 }] }
    ],
    "comIdDatasetMappings": [{ "comId": 1000, "datasetId": 1 }]
}"#;

fn simulator() -> Simulator {
    let loaded = parse_config(CONFIG).unwrap();
    assert!(loaded.has_errors(), "broken interface must be reported");
    let (_engine, stack) = sim_stack();
    Simulator::start(&loaded.config, stack)
}

#[test]
fn start_skips_interfaces_that_fail_to_open() {
    init_tracing();
    let sim = simulator();
    assert_eq!(sim.sessions().len(), 2);
    assert_eq!(sim.endpoints().len(), 3);
    assert_eq!(sim.stack().session_count(), 2);

    let directions: Vec<_> = sim.endpoints().iter().map(|ep| ep.direction()).collect();
    assert_eq!(
        directions,
        vec![PdDirection::Loopback, PdDirection::Outgoing, PdDirection::Incoming]
    );
    assert_eq!(sim.endpoint(EndpointId(2)).unwrap().session_id(), SessionId(1));
    assert_eq!(sim.session(SessionId(1)).unwrap().name(), "eth1");
    assert_eq!(sim.dataset_for(2000).map(|d| d.name.as_str()), Some("doors"));
}

#[test]
fn start_all_runs_transmit_capable_endpoints() {
    init_tracing();
    let sim = simulator();
    assert_eq!(sim.start_all(Duration::from_millis(20)), 2);

    let receiver = sim.endpoint(EndpointId(2)).unwrap();
    assert!(!receiver.is_publishing());
    assert!(wait_until(Duration::from_millis(500), || receiver.receive_count() >= 3));
    assert!(wait_until(Duration::from_millis(500), || {
        sim.endpoint(EndpointId(0)).unwrap().receive_count() >= 3
    }));

    let log = sim.subscriber_log();
    assert!(log.iter().any(|entry| entry.contains("eth1 comId 2000: 8 bytes")));

    let rows = sim.status();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].interface, "eth1");
    assert!(rows[0].endpoint.running);
    assert!(rows[1].endpoint.receive_count.is_none());
    assert!(rows[2].endpoint.receive_count.unwrap() >= 3);
}

#[test]
fn control_by_id() {
    init_tracing();
    let sim = simulator();
    let id = EndpointId(1);
    sim.set_tx_payload(id, vec![1, 2]).unwrap();
    sim.set_fixed_payload(id, vec![3]).unwrap();
    assert_eq!(sim.endpoint(id).unwrap().fixed_payload_size(), Some(1));
    sim.clear_fixed_payload(id).unwrap();
    assert_eq!(sim.endpoint(id).unwrap().tx_payload(), vec![1, 2]);

    sim.start_publishing(id, Duration::from_millis(20)).unwrap();
    assert!(sim.endpoint(id).unwrap().is_publishing());
    sim.stop_publishing(id).unwrap();
    assert!(!sim.endpoint(id).unwrap().is_publishing());

    let bad = EndpointId(42);
    assert!(matches!(
        sim.start_publishing(bad, Duration::from_millis(20)),
        Err(RuntimeError::UnknownEndpoint(42))
    ));
    assert!(matches!(sim.set_tx_payload(bad, vec![]), Err(RuntimeError::UnknownEndpoint(42))));
    assert!(matches!(sim.stop_publishing(bad), Err(RuntimeError::UnknownEndpoint(42))));
}

#[test]
fn shutdown_stops_publishers_then_closes_sessions() {
    init_tracing();
    let loaded = parse_config(CONFIG).unwrap();
    let (engine, stack) = sim_stack();
    let sim = Simulator::start(&loaded.config, stack.clone());
    sim.start_all(Duration::from_millis(20));
    assert_eq!(engine.publication_count(), 2);

    sim.shutdown();
    assert!(sim.endpoints().iter().all(|ep| !ep.is_publishing()));
    assert!(sim.sessions().iter().all(|s| !s.is_open()));
    assert_eq!(engine.publication_count(), 0);
    assert_eq!(stack.session_count(), 0);
    assert!(!engine.is_initialized());

    sim.shutdown();
    drop(sim);
    assert_eq!(stack.session_count(), 0);
}

#[test]
fn bundled_demo_config_is_clean() {
    init_tracing();
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/loopback.json");
    let loaded = trdp_runtime::load_config(path).unwrap();
    assert!(!loaded.has_errors(), "{:?}", loaded.errors);
    assert_eq!(loaded.config.telegram_count(), 3);
}
