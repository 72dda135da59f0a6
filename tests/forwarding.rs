//! End-to-end forwarding against mock upstream resolvers.

use std::net::SocketAddr;
use std::time::Duration;

use dns_forward::dns::Rcode;
use dns_forward::upstream::HealthState;
use dns_forward::{ForwardError, Forwarder};

mod common;
use common::{config, query, start_mock_upstream, Reply};

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[tokio::test]
async fn test_forward_over_udp() {
    let upstream = start_mock_upstream(addr(28301), Reply::Rcode(Rcode::NXDOMAIN)).await;
    let fwd = Forwarder::from_config(&config(&[upstream.addr.to_string()], "")).unwrap();

    let response = fwd.forward(&query(0x1234)).await.unwrap();
    assert_eq!(response.id(), 0x1234);
    assert_eq!(response.rcode(), Rcode::NXDOMAIN);
    assert_eq!(upstream.udp_queries(), 1);
    assert_eq!(upstream.tcp_queries(), 0);
}

#[tokio::test]
async fn test_forward_over_tcp_reuses_connection() {
    let upstream = start_mock_upstream(addr(28302), Reply::Rcode(Rcode::NOERROR)).await;
    let fwd = Forwarder::from_config(&config(&[format!("tcp://{}", upstream.addr)], "")).unwrap();

    for id in 1..=3 {
        let response = fwd.forward(&query(id)).await.unwrap();
        assert_eq!(response.id(), id);
    }
    assert_eq!(upstream.tcp_queries(), 3);
    assert_eq!(upstream.tcp_connections(), 1);
    assert_eq!(upstream.udp_queries(), 0);
}

#[tokio::test]
async fn test_force_tcp() {
    let upstream = start_mock_upstream(addr(28303), Reply::Rcode(Rcode::NOERROR)).await;
    let cfg = config(&[upstream.addr.to_string()], "[transport]\nforce_tcp = true\n");
    let fwd = Forwarder::from_config(&cfg).unwrap();

    fwd.forward(&query(9)).await.unwrap();
    assert_eq!(upstream.tcp_queries(), 1);
    assert_eq!(upstream.udp_queries(), 0);
}

#[tokio::test]
async fn test_truncated_reply_retried_over_tcp() {
    let upstream = start_mock_upstream(addr(28304), Reply::Truncated).await;
    let fwd = Forwarder::from_config(&config(&[upstream.addr.to_string()], "")).unwrap();

    let response = fwd.forward(&query(5)).await.unwrap();
    assert!(!response.is_truncated());
    assert_eq!(upstream.udp_queries(), 1);
    assert_eq!(upstream.tcp_queries(), 1);
}

#[tokio::test]
async fn test_failover_from_silent_upstream() {
    let silent = start_mock_upstream(addr(28305), Reply::Silent).await;
    let live = start_mock_upstream(addr(28306), Reply::Rcode(Rcode::NOERROR)).await;
    let cfg = config(
        &[silent.addr.to_string(), live.addr.to_string()],
        r#"
        policy = "sequential"
        [timeouts]
        attempt_ms = 200
        [health_check]
        enabled = false
        max_fails = 1
        "#,
    );
    let fwd = Forwarder::from_config(&cfg).unwrap();

    let response = fwd.forward(&query(1)).await.unwrap();
    assert_eq!(response.rcode(), Rcode::NOERROR);

    let snapshots = fwd.snapshots();
    assert_eq!(snapshots[0].state, HealthState::Unhealthy);
    assert_eq!(snapshots[0].failed_attempts, 1);
    assert_eq!(snapshots[1].state, HealthState::Healthy);

    // the silent upstream is skipped while down
    fwd.forward(&query(2)).await.unwrap();
    assert_eq!(silent.udp_queries(), 1);
    assert_eq!(live.udp_queries(), 2);
}

#[tokio::test]
async fn test_exhausted_when_every_upstream_is_silent() {
    let a = start_mock_upstream(addr(28307), Reply::Silent).await;
    let b = start_mock_upstream(addr(28308), Reply::Silent).await;
    let cfg = config(
        &[a.addr.to_string(), b.addr.to_string()],
        "[timeouts]\nattempt_ms = 100\n[health_check]\nenabled = false\n",
    );
    let fwd = Forwarder::from_config(&cfg).unwrap();

    match fwd.forward(&query(1)).await.unwrap_err() {
        ForwardError::Exhausted { attempts, last_error } => {
            assert_eq!(attempts, 2);
            assert!(last_error.contains("timed out"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_health_monitor_restores_upstream() {
    let upstream = start_mock_upstream(addr(28309), Reply::Silent).await;
    let cfg = config(
        &[upstream.addr.to_string()],
        r#"
        [timeouts]
        attempt_ms = 100
        [health_check]
        interval_ms = 100
        timeout_ms = 50
        max_fails = 1
        "#,
    );
    let fwd = Forwarder::from_config(&cfg).unwrap();
    assert!(fwd.start_health_monitor());

    fwd.forward(&query(1)).await.unwrap_err();
    assert_eq!(fwd.snapshots()[0].state, HealthState::Unhealthy);

    upstream.set(Reply::Rcode(Rcode::NOERROR));
    tokio::time::sleep(Duration::from_millis(400)).await;

    let snapshot = &fwd.snapshots()[0];
    assert_eq!(snapshot.state, HealthState::Healthy);
    assert_eq!(snapshot.consecutive_failures, 0);
    assert!(snapshot.probes >= 1);

    fwd.close();
}

#[tokio::test]
async fn test_failover_rcode_reaches_next_upstream() {
    let broken = start_mock_upstream(addr(28310), Reply::Rcode(Rcode::SERVFAIL)).await;
    let live = start_mock_upstream(addr(28311), Reply::Rcode(Rcode::NOERROR)).await;
    let cfg = config(
        &[broken.addr.to_string(), live.addr.to_string()],
        "policy = \"sequential\"\nfailover_rcodes = [\"SERVFAIL\"]\n",
    );
    let fwd = Forwarder::from_config(&cfg).unwrap();

    let response = fwd.forward(&query(3)).await.unwrap();
    assert_eq!(response.rcode(), Rcode::NOERROR);
    assert_eq!(broken.udp_queries(), 1);
    assert_eq!(fwd.snapshots()[0].consecutive_failures, 0);
}
