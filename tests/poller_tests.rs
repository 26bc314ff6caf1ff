use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use uponor_x265::{
    CycleOutcome, Error, MessageLogMode, PollOutcome, PollPhase, Poller, PollerConfig,
    ReadingsDiff, SensorReading, SensorValue, TransportError,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn jnap_body(vars: &[(&str, &str)]) -> Value {
    let vars: Vec<Value> = vars
        .iter()
        .map(|(name, value)| json!({"waspVarName": name, "waspVarValue": value}))
        .collect();
    json!({"result": "OK", "output": {"vars": vars}})
}

fn two_rooms() -> Value {
    jnap_body(&[
        ("C1_T1_room_temperature", "215"),
        ("C1_T1_stat_demand_led", "1"),
        ("C1_T2_room_temperature", "200"),
        ("C1_T2_stat_demand_led", "0"),
        ("C1_supply_temperature", "350"),
        ("sys_pump_management", "1"),
    ])
}

fn one_room() -> Value {
    jnap_body(&[
        ("C1_T1_room_temperature", "215"),
        ("C1_T1_stat_demand_led", "1"),
        ("C1_supply_temperature", "350"),
        ("sys_pump_management", "1"),
    ])
}

fn config_for(server: &MockServer) -> PollerConfig {
    let addr = server.address();
    PollerConfig::new(addr.ip().to_string())
        .port(addr.port())
        .backoff(Duration::from_millis(10), Duration::from_millis(50))
}

async fn mount_body(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/JNAP/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn find<'a>(readings: &'a [SensorReading], id: &str) -> &'a SensorReading {
    readings
        .iter()
        .find(|r| r.id == id)
        .unwrap_or_else(|| panic!("no reading {id}"))
}

#[tokio::test]
async fn successful_poll_publishes_snapshot_and_readings() {
    let server = MockServer::start().await;
    mount_body(&server, two_rooms()).await;

    let poller = Poller::new(config_for(&server)).unwrap();
    let outcome = poller.request_immediate_poll().await.unwrap();
    assert_eq!(outcome, PollOutcome::Updated { sequence: 1 });

    let snapshot = poller.current_snapshot().expect("snapshot published");
    assert_eq!(snapshot.sequence(), 1);
    assert_eq!(snapshot.len(), 6);

    let readings = poller.current_readings();
    assert_eq!(
        find(&readings, "c1_t1.room_temperature").value,
        Some(SensorValue::Temperature(uponor_x265::Temperature::from_celsius(21.5)))
    );
    assert_eq!(find(&readings, "c1_t1.demand").value, Some(SensorValue::Boolean(true)));
    assert_eq!(find(&readings, "c1_t2.demand").value, Some(SensorValue::Boolean(false)));
    assert_eq!(
        find(&readings, "c1.controller_demand").value,
        Some(SensorValue::Boolean(true))
    );
    assert!(!find(&readings, "c1_t1.humidity").available);

    let status = poller.status();
    assert_eq!(status.phase, PollPhase::Idle);
    assert_eq!(status.last_outcome, Some(CycleOutcome::Succeeded));
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.sequence, Some(1));
    assert!(!status.stale);
}

#[tokio::test]
async fn sequence_and_capture_time_increase() {
    let server = MockServer::start().await;
    mount_body(&server, two_rooms()).await;

    let poller = Poller::new(config_for(&server)).unwrap();
    poller.request_immediate_poll().await.unwrap();
    let first = poller.current_snapshot().unwrap();
    poller.request_immediate_poll().await.unwrap();
    let second = poller.current_snapshot().unwrap();

    assert_eq!(second.sequence(), first.sequence() + 1);
    assert!(second.taken_at() > first.taken_at());
}

#[tokio::test]
async fn concurrent_requests_coalesce_into_one_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(two_rooms())
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let poller = Poller::new(config_for(&server)).unwrap();
    let (a, b) = tokio::join!(
        poller.request_immediate_poll(),
        poller.request_immediate_poll()
    );
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, PollOutcome::Coalesced));
    assert_eq!(
        outcomes,
        vec![PollOutcome::Updated { sequence: 1 }, PollOutcome::Coalesced]
    );
}

#[tokio::test]
async fn removed_thermostat_readings_disappear() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(two_rooms()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_body(&server, one_room()).await;

    let diffs: Arc<Mutex<Vec<ReadingsDiff>>> = Arc::new(Mutex::new(vec![]));
    let diffs_clone = diffs.clone();
    let poller = Poller::builder(config_for(&server))
        .on_readings_changed(move |diff, _| diffs_clone.lock().unwrap().push(diff.clone()))
        .build()
        .unwrap();

    poller.request_immediate_poll().await.unwrap();
    assert!(poller.current_readings().iter().any(|r| r.id.starts_with("c1_t2.")));

    poller.request_immediate_poll().await.unwrap();
    let readings = poller.current_readings();
    assert!(!readings.iter().any(|r| r.id.starts_with("c1_t2.")));
    assert!(readings.iter().any(|r| r.id.starts_with("c1_t1.")));

    let diffs = diffs.lock().unwrap();
    assert_eq!(diffs.len(), 2);
    assert!(diffs[1].removed.contains(&"c1_t2.room_temperature".to_string()));
    assert!(diffs[1].added.is_empty());
    // average over the remaining room only
    assert!(diffs[1].changed.iter().any(|r| r.id == "system.average_room_temperature"));
}

#[tokio::test]
async fn failed_poll_keeps_previous_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(two_rooms()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let poller = Poller::new(config_for(&server)).unwrap();
    poller.request_immediate_poll().await.unwrap();

    let err = poller.request_immediate_poll().await.unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::HttpStatus(500))));

    assert_eq!(poller.current_snapshot().unwrap().sequence(), 1);
    let status = poller.status();
    assert_eq!(status.consecutive_failures, 1);
    assert!(matches!(status.last_outcome, Some(CycleOutcome::Failed(_))));
    assert!(status.last_success.is_some());
}

#[tokio::test]
async fn rejected_envelope_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ErrorUnknownAction"})))
        .expect(1)
        .mount(&server)
        .await;

    let poller = Poller::new(config_for(&server)).unwrap();
    let err = poller.request_immediate_poll().await.unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::MalformedBody(_))), "{err:?}");
    assert!(poller.current_snapshot().is_none());
}

#[tokio::test]
async fn timeouts_retry_with_growing_delays_then_give_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(two_rooms())
                .set_delay(Duration::from_secs(2)),
        )
        .expect(4)
        .mount(&server)
        .await;

    let config = config_for(&server)
        .request_timeout(Duration::from_millis(100))
        .max_attempts(4)
        .backoff(Duration::from_millis(20), Duration::from_millis(60));
    let poller = Poller::new(config).unwrap();

    let err = poller.request_immediate_poll().await.unwrap_err();
    let give_up = match err {
        Error::GiveUp(give_up) => give_up,
        other => panic!("expected give-up, got {other:?}"),
    };
    assert_eq!(give_up.attempts, 4);
    assert_eq!(give_up.last, TransportError::Timeout);
    assert_eq!(give_up.delays.len(), 3);
    assert!(give_up.delays.windows(2).all(|w| w[0] <= w[1]), "{:?}", give_up.delays);
    assert!(give_up.delays.iter().all(|d| *d <= Duration::from_millis(60)));
}

#[tokio::test]
async fn readings_go_unavailable_when_snapshot_is_stale() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(two_rooms()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let latest: Arc<Mutex<Vec<SensorReading>>> = Arc::new(Mutex::new(vec![]));
    let latest_clone = latest.clone();
    let config = config_for(&server)
        .poll_interval(Duration::from_millis(50))
        .stale_after(Duration::from_millis(150));
    let poller = Poller::builder(config)
        .on_readings_changed(move |_, readings| *latest_clone.lock().unwrap() = readings.to_vec())
        .build()
        .unwrap();

    poller.request_immediate_poll().await.unwrap();
    assert!(poller.current_readings().iter().any(|r| r.available));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(poller.request_immediate_poll().await.is_err());

    assert!(poller.current_snapshot().is_some());
    assert!(poller.status().stale);
    assert!(poller.current_readings().iter().all(|r| !r.available));
    // the failed cycle pushed the availability flip to subscribers
    let delivered = latest.lock().unwrap();
    assert!(!delivered.is_empty());
    assert!(delivered.iter().all(|r| !r.available));
}

#[tokio::test]
async fn snapshot_callbacks_and_subscribers_see_each_update() {
    let server = MockServer::start().await;
    mount_body(&server, one_room()).await;

    let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(vec![]));
    let readings_calls = Arc::new(Mutex::new(0u32));
    let seen_clone = seen.clone();
    let calls_clone = readings_calls.clone();
    let poller = Poller::builder(config_for(&server))
        .on_snapshot_updated(move |snap| seen_clone.lock().unwrap().push(snap.sequence()))
        .on_readings_changed(move |_, _| *calls_clone.lock().unwrap() += 1)
        .build()
        .unwrap();

    let mut rx = poller.subscribe();
    assert!(rx.borrow().is_none());

    poller.request_immediate_poll().await.unwrap();
    poller.request_immediate_poll().await.unwrap();

    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().as_ref().unwrap().sequence(), 2);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    // identical data on the second poll produces no reading diff
    assert_eq!(*readings_calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn spawned_loop_polls_until_shutdown() {
    let server = MockServer::start().await;
    mount_body(&server, one_room()).await;

    let config = config_for(&server).poll_interval(Duration::from_millis(50));
    let poller = Poller::new(config).unwrap();
    let mut rx = poller.subscribe();
    let handle = poller.spawn();

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            rx.changed().await.unwrap();
            if rx.borrow().as_ref().is_some_and(|s| s.sequence() >= 3) {
                break;
            }
        }
    })
    .await
    .expect("loop should keep polling");

    poller.shutdown();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop should stop")
        .unwrap();
    assert!(poller.is_shut_down());
    assert_eq!(poller.status().phase, PollPhase::Idle);
}

#[tokio::test]
async fn shutdown_abandons_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(one_room())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let poller = Poller::new(config_for(&server)).unwrap();
    let handle = poller.spawn();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(poller.status().phase, PollPhase::Polling);

    poller.shutdown();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("shutdown should not wait for the response")
        .unwrap();
    assert_eq!(poller.status().phase, PollPhase::Idle);
    assert!(poller.current_snapshot().is_none());
}

#[tokio::test]
async fn message_log_records_requests_and_snapshots() {
    let server = MockServer::start().await;
    mount_body(&server, one_room()).await;

    let tmp = tempfile::NamedTempFile::new().unwrap();
    let poller = Poller::builder(config_for(&server))
        .message_log(MessageLogMode::Diffed, tmp.path())
        .build()
        .unwrap();
    poller.request_immediate_poll().await.unwrap();
    poller.request_immediate_poll().await.unwrap();

    let lines: Vec<Value> = std::fs::read_to_string(tmp.path())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let dirs: Vec<&str> = lines.iter().map(|l| l["dir"].as_str().unwrap()).collect();
    assert_eq!(dirs, vec!["req", "snapshot", "req", "snapshot"]);
    assert_eq!(lines[1]["full"], true);
    assert_eq!(lines[3]["changes"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn client_error_status_is_attempted_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let poller = Poller::new(config_for(&server).max_attempts(4)).unwrap();
    let err = poller.request_immediate_poll().await.unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::HttpStatus(404))), "{err:?}");
    assert_eq!(poller.status().consecutive_failures, 1);
}

#[tokio::test]
async fn shutdown_cancels_pending_backoff() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = PollerConfig::new("127.0.0.1")
        .port(port)
        .max_attempts(3)
        .backoff(Duration::from_secs(5), Duration::from_secs(10));
    let poller = Poller::new(config).unwrap();

    let started = std::time::Instant::now();
    let (result, _) = tokio::join!(poller.request_immediate_poll(), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        poller.shutdown();
    });

    assert!(matches!(result, Err(Error::Cancelled)), "{result:?}");
    assert!(started.elapsed() < Duration::from_secs(2), "waited out the backoff");
    let status = poller.status();
    assert_eq!(status.phase, PollPhase::Idle);
    assert_eq!(status.consecutive_failures, 0);
    assert!(poller.current_snapshot().is_none());
}

#[tokio::test]
async fn readers_share_the_published_snapshot() {
    let server = MockServer::start().await;
    mount_body(&server, one_room()).await;

    let poller = Poller::new(config_for(&server)).unwrap();
    let rx = poller.subscribe();
    poller.request_immediate_poll().await.unwrap();

    let loaded = poller.current_snapshot().unwrap();
    let notified = rx.borrow().clone().unwrap();
    assert!(Arc::ptr_eq(&loaded, &notified));
    assert!(Arc::ptr_eq(&loaded, &poller.clone().current_snapshot().unwrap()));
}
