//! Connection pool tests for unitfleet
//!
//! Session sharing under concurrency, replacement of dead sessions and
//! recovery after a command breaks its channel.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use futures::future::join_all;
use unitfleet::connection::{
    ConnectionError, ConnectionPool, Session, SessionFactory, SessionTarget,
};
use unitfleet::systemd::ControlAction;

fn pool_over(hosts: &Arc<FakeFleet>) -> ConnectionPool {
    ConnectionPool::new(Arc::clone(hosts) as Arc<dyn SessionFactory>)
}

#[tokio::test]
async fn test_concurrent_acquires_share_one_session() {
    let hosts = Arc::new(FakeFleet::with_delay(Duration::from_millis(50)));
    let remote = hosts.add(FakeHost::new("web-1"));
    let pool = pool_over(&hosts);
    let target = SessionTarget::new("web-1", 22, "deploy");

    let sessions = join_all((0..8).map(|_| pool.acquire(&target))).await;
    assert!(sessions.iter().all(Result::is_ok));

    assert_eq!(hosts.connects(), 1);
    let stats = pool.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.reused, 7);
    assert_eq!(pool.cached_sessions().await, 1);

    assert_eq!(remote.commands_matching("connection_test").len(), 1);
    assert_eq!(remote.commands_matching("ping").len(), 7);
}

#[tokio::test]
async fn test_sessions_are_keyed_by_user_and_port() {
    let hosts = Arc::new(FakeFleet::new());
    hosts.add(FakeHost::new("web-1"));
    let pool = pool_over(&hosts);

    for target in [
        SessionTarget::new("web-1", 22, "deploy"),
        SessionTarget::new("web-1", 22, "root"),
        SessionTarget::new("web-1", 2222, "deploy"),
        SessionTarget::new("web-1", 22, "deploy"),
    ] {
        pool.acquire(&target).await.unwrap();
    }

    assert_eq!(hosts.connects(), 3);
    assert_eq!(pool.cached_sessions().await, 3);
}

#[tokio::test]
async fn test_dead_session_is_replaced() {
    let hosts = Arc::new(FakeFleet::new());
    hosts.add(FakeHost::new("web-1"));
    let pool = pool_over(&hosts);
    let target = SessionTarget::new("web-1", 22, "deploy");

    let first = pool.acquire(&target).await.unwrap();
    first.close().await.unwrap();

    let second = pool.acquire(&target).await.unwrap();
    assert!(second.execute("echo alive").await.is_ok());
    assert_eq!(hosts.connects(), 2);
    let stats = pool.stats();
    assert_eq!((stats.created, stats.reused, stats.discarded), (2, 0, 1));
}

#[tokio::test]
async fn test_failed_connect_is_not_cached() {
    let hosts = Arc::new(FakeFleet::new());
    hosts.add(FakeHost::new("web-1"));
    hosts.set_unreachable("web-1");
    let pool = pool_over(&hosts);
    let target = SessionTarget::new("web-1", 22, "deploy");

    let err = pool.acquire(&target).await.err().unwrap();
    assert!(matches!(err, ConnectionError::Unreachable(_)));
    assert_eq!(pool.cached_sessions().await, 0);

    hosts.set_reachable("web-1");
    assert!(pool.acquire(&target).await.is_ok());
    assert_eq!(hosts.connects(), 2);
}

#[tokio::test]
async fn test_close_all_closes_sessions() {
    let hosts = Arc::new(FakeFleet::new());
    hosts.add(FakeHost::new("web-1"));
    hosts.add(FakeHost::new("db-1"));
    let pool = pool_over(&hosts);

    let web = pool.acquire(&SessionTarget::new("web-1", 22, "deploy")).await.unwrap();
    pool.acquire(&SessionTarget::new("db-1", 22, "deploy")).await.unwrap();
    assert_eq!(pool.cached_sessions().await, 2);

    pool.close_all().await;
    pool.close_all().await;
    assert_eq!(pool.cached_sessions().await, 0);
    assert!(web.execute("echo hello").await.is_err());
}

#[tokio::test]
async fn test_interrupted_command_drops_pooled_session() {
    let hosts = Arc::new(FakeFleet::new());
    let remote = hosts.add(
        FakeHost::new("web-1").with_unit("nginx.service", FakeUnit::running("nginx")),
    );
    let fleet = fleet_with(&hosts);
    let host = register(&fleet, "web-1").await;
    fleet.discover_units(host.id, false).await.unwrap();
    let nginx = unit_named(&fleet, host.id, "nginx").await;
    assert_eq!(hosts.connects(), 1);

    remote.interrupt_on("systemctl restart");
    let outcome = fleet.control_unit(nginx.id, ControlAction::Restart).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Failed to restart nginx.service"), "{}", outcome.message);
    assert_eq!(fleet.pool().cached_sessions().await, 0);

    remote.clear_faults();
    let outcome = fleet.control_unit(nginx.id, ControlAction::Restart).await.unwrap();
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(hosts.connects(), 2);
}
