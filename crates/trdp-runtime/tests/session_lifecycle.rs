//! Session open/close, stack reference counting and subscriber registry.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use trdp_engine::EngineError;
use trdp_runtime::{
    EndpointRuntime, ExchangeType, RuntimeError, Session, SessionConfig, SessionId, StackContext,
};

#[test]
fn close_is_idempotent() {
    init_tracing();
    let (engine, stack) = sim_stack();
    let never_opened = Session::new(SessionConfig::new(HOST_B), stack.clone());
    never_opened.close();
    never_opened.close();

    let session = Session::new(SessionConfig::new(HOST_A), stack.clone());
    session.open().unwrap();
    assert!(session.is_open());
    assert_eq!(stack.session_count(), 1);

    session.close();
    assert!(!session.is_open());
    assert_eq!(stack.session_count(), 0);
    assert_eq!(engine.session_count(), 0);

    session.close();
    assert_eq!(stack.session_count(), 0);
}

#[test]
fn open_twice_is_a_noop() {
    init_tracing();
    let (engine, stack) = sim_stack();
    let session = Session::new(SessionConfig::new(HOST_A).name("eth0"), stack.clone());
    session.open().unwrap();
    session.open().unwrap();
    assert_eq!(stack.session_count(), 1);
    assert_eq!(engine.session_count(), 1);
    assert_eq!(session.name(), "eth0");
    assert_eq!(session.host_address(), HOST_A.parse::<std::net::Ipv4Addr>().unwrap());
}

#[test]
fn last_close_terminates_and_reopen_reinitializes() {
    init_tracing();
    let (engine, stack) = sim_stack();
    let a = Session::new(SessionConfig::new(HOST_A), stack.clone());
    let b = Session::new(SessionConfig::new(HOST_B).leader_ip("127.0.0.9"), stack.clone());
    a.open().unwrap();
    b.open().unwrap();
    assert_eq!(b.leader_address(), "127.0.0.9".parse::<std::net::Ipv4Addr>().unwrap());

    a.close();
    assert!(engine.is_initialized());
    b.close();
    assert!(!engine.is_initialized());
    assert!(!stack.is_initialized());

    a.open().unwrap();
    assert!(engine.is_initialized());
    assert_eq!(stack.session_count(), 1);
}

#[test]
fn invalid_host_fails_without_counting() {
    init_tracing();
    let (_engine, stack) = sim_stack();
    let session = Session::new(SessionConfig::new("10.0.0"), stack.clone());
    assert!(matches!(session.open(), Err(RuntimeError::InvalidAddress(_))));
    assert!(!session.is_open());
    assert_eq!(stack.session_count(), 0);
}

#[test]
fn register_requires_open_session() {
    init_tracing();
    let (_engine, stack) = sim_stack();
    let session = Session::new(SessionConfig::new(HOST_A), stack);
    let result = session.register_pd_subscriber(100, |_| {});
    assert!(matches!(result, Err(RuntimeError::NotOpen)));
    assert_eq!(session.callback_count(100), 0);
}

#[test]
fn callbacks_share_one_engine_subscription() {
    init_tracing();
    let (engine, stack) = sim_stack();
    let session = Session::new(SessionConfig::new(HOST_A), stack);
    session.open().unwrap();

    let first = session.subscribe_channel(5000).unwrap();
    let second = session.subscribe_channel(5000).unwrap();
    assert_eq!(session.callback_count(5000), 2);
    assert_eq!(session.subscribed_com_ids(), vec![5000]);
    assert_eq!(engine.subscription_count(), 1);

    let publisher = EndpointRuntime::new(
        telegram(5000, ExchangeType::Source),
        SessionId(0),
        HOST_A,
    );
    publisher.set_tx_payload(vec![5]);
    publisher.start_publishing(&session, Duration::from_millis(20)).unwrap();

    let a = first.recv_timeout(Duration::from_millis(500)).unwrap();
    let b = second.recv_timeout(Duration::from_millis(500)).unwrap();
    assert_eq!(a.payload, vec![5]);
    assert_eq!(a, b);
    assert_eq!(a.com_id, 5000);
    assert_eq!(a.dest_addr.to_string(), HOST_A);

    publisher.stop_publishing();
    session.close();
    assert_eq!(engine.subscription_count(), 0);
    assert_eq!(session.callback_count(5000), 0);
}

#[test]
fn init_failure_is_cached_for_every_session() {
    init_tracing();
    let engine = FaultEngine::new();
    FaultEngine::fail(&engine.faults.init, Some(EngineError::Init("no memory".into())));
    let stack = Arc::new(StackContext::new(engine.clone()));

    for host in [HOST_A, HOST_B] {
        let session = Session::new(SessionConfig::new(host), stack.clone());
        let err = session.open().unwrap_err();
        assert_eq!(err.engine_code(), Some(-2));
        assert!(!session.is_open());
    }

    // Clearing the fault does not help: the outcome is cached.
    FaultEngine::fail(&engine.faults.init, None);
    let session = Session::new(SessionConfig::new(HOST_A), stack.clone());
    assert!(session.open().is_err());
    assert_eq!(engine.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stack.session_count(), 0);
}

#[test]
fn failed_subscribe_keeps_the_callback() {
    init_tracing();
    let engine = FaultEngine::new();
    let stack = Arc::new(StackContext::new(engine.clone()));
    let session = Session::new(SessionConfig::new(HOST_A), stack);
    session.open().unwrap();

    FaultEngine::fail(&engine.faults.subscribe, Some(EngineError::Mem("pool".into())));
    session.register_pd_subscriber(600, |_| {}).unwrap();
    assert_eq!(session.callback_count(600), 1);
    assert!(session.subscribed_com_ids().is_empty());

    FaultEngine::fail(&engine.faults.subscribe, None);
    session.register_pd_subscriber(600, |_| {}).unwrap();
    assert_eq!(session.subscribed_com_ids(), vec![600]);
}

#[test]
fn unsubscribe_failure_does_not_block_close() {
    init_tracing();
    let engine = FaultEngine::new();
    let stack = Arc::new(StackContext::new(engine.clone()));
    let session = Session::new(SessionConfig::new(HOST_A), stack.clone());
    session.open().unwrap();
    session.register_pd_subscriber(700, |_| {}).unwrap();

    FaultEngine::fail(&engine.faults.unsubscribe, Some(EngineError::Timeout));
    session.close();
    assert!(!session.is_open());
    assert_eq!(stack.session_count(), 0);
    assert!(!engine.inner.is_initialized());
}

#[test]
fn process_errors_do_not_stop_the_loop() {
    init_tracing();
    let engine = FaultEngine::new();
    let stack = Arc::new(StackContext::new(engine.clone()));
    let session = Session::new(SessionConfig::new(HOST_A), stack);
    session.open().unwrap();
    let rx = session.subscribe_channel(800).unwrap();

    engine.faults.fail_process.store(true, Ordering::SeqCst);
    let before = engine.process_calls.load(Ordering::SeqCst);
    assert!(wait_until(Duration::from_millis(500), || {
        engine.process_calls.load(Ordering::SeqCst) >= before + 5
    }));
    engine.faults.fail_process.store(false, Ordering::SeqCst);

    let publisher = EndpointRuntime::new(telegram(800, ExchangeType::Source), SessionId(0), HOST_A);
    publisher.start_publishing(&session, Duration::from_millis(20)).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_ok());
}

#[test]
fn drop_closes_the_session() {
    init_tracing();
    let (engine, stack) = sim_stack();
    {
        let session = Session::new(SessionConfig::new(HOST_A), stack.clone());
        session.open().unwrap();
        assert_eq!(engine.session_count(), 1);
    }
    assert_eq!(engine.session_count(), 0);
    assert_eq!(stack.session_count(), 0);
}
