//! Fakes shared by the unit tests of this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tapvault_core::sync::{
    reconcile_offline_earnings, GameSnapshot, ReconciliationReceipt, SnapshotConsumer,
    SnapshotProvider,
};
use tokio::sync::Semaphore;

use crate::error::{Result, SyncError, TransportError};
use crate::platform::PlatformLogin;
use crate::scheduler::SyncNotifier;
use crate::transport::Transport;
use crate::types::{TransportRequest, LOGIN_PATH};

pub(crate) type Reply = std::result::Result<serde_json::Value, TransportError>;

/// Holds requests until released.
#[derive(Clone)]
pub(crate) struct Gate(Arc<Semaphore>);

impl Gate {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    pub(crate) fn release(&self, count: usize) {
        self.0.add_permits(count);
    }

    async fn wait(&self) {
        if let Ok(permit) = self.0.acquire().await {
            permit.forget();
        }
    }
}

pub(crate) enum Step {
    Now(Reply),
    After(Gate, Reply),
}

impl Step {
    pub(crate) fn now(reply: Reply) -> Self {
        Self::Now(reply)
    }

    pub(crate) fn after(gate: &Gate, reply: Reply) -> Self {
        Self::After(gate.clone(), reply)
    }
}

type Responder = Box<dyn Fn(&TransportRequest) -> Step + Send + Sync>;

/// Transport that records every request and answers from a closure.
pub(crate) struct ScriptedTransport {
    requests: Mutex<Vec<TransportRequest>>,
    responder: Responder,
}

impl ScriptedTransport {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&TransportRequest) -> Step + Send + Sync + 'static,
    {
        Self {
            requests: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }

    pub(crate) fn login_count(&self) -> usize {
        self.requests_to(LOGIN_PATH).len()
    }

    pub(crate) async fn wait_for_requests(&self, path: &str, count: usize) {
        for _ in 0..1000 {
            if self.requests_to(path).len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {} requests to {}", count, path);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Reply {
        let step = (self.responder)(&request);
        self.requests.lock().expect("requests lock").push(request);
        match step {
            Step::Now(reply) => reply,
            Step::After(gate, reply) => {
                gate.wait().await;
                reply
            }
        }
    }
}

pub(crate) fn ok_with(data: serde_json::Value) -> Reply {
    Ok(serde_json::json!({ "code": 200, "data": data }))
}

pub(crate) fn login_ok(token: &str) -> Reply {
    ok_with(serde_json::json!({ "token": token }))
}

pub(crate) fn body_unauthorized() -> Reply {
    Ok(serde_json::json!({ "code": 401, "message": "token expired" }))
}

pub(crate) fn http_unauthorized() -> Reply {
    Err(TransportError::Status {
        status: 401,
        body: None,
    })
}

pub(crate) fn server_error() -> Reply {
    Ok(serde_json::json!({ "code": 500, "message": "database unavailable" }))
}

/// Receipt for a session with no saved game, so nothing is owed.
pub(crate) fn settled_receipt() -> ReconciliationReceipt {
    match reconcile_offline_earnings(None, Utc::now(), 0.0).into_receipt() {
        Ok(receipt) => receipt,
        Err(pending) => panic!("expected nothing owed, got {:?}", pending),
    }
}

/// Platform login that hands out numbered codes, or fails.
#[derive(Default)]
pub(crate) struct FakePlatform {
    calls: AtomicUsize,
    fail: bool,
}

impl FakePlatform {
    pub(crate) fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformLogin for FakePlatform {
    async fn obtain_exchange_code(&self) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(SyncError::exchange_failed("platform login denied"));
        }
        Ok(format!("code-{}", call))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UiEvent {
    CircuitOpen,
    RetryState(String, bool),
    CircuitClosed,
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingNotifier {
    pub(crate) fn events(&self) -> Vec<UiEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub(crate) fn count(&self, event: &UiEvent) -> usize {
        self.events().iter().filter(|seen| *seen == event).count()
    }
}

impl SyncNotifier for RecordingNotifier {
    fn on_circuit_open(&self) {
        self.events.lock().expect("events lock").push(UiEvent::CircuitOpen);
    }

    fn on_retry_state_changed(&self, label: &str, enabled: bool) {
        self.events
            .lock()
            .expect("events lock")
            .push(UiEvent::RetryState(label.to_string(), enabled));
    }

    fn on_circuit_closed(&self) {
        self.events
            .lock()
            .expect("events lock")
            .push(UiEvent::CircuitClosed);
    }
}

/// Provider whose snapshot the test can change between ticks.
#[derive(Default)]
pub(crate) struct MutableProvider {
    current: Mutex<Option<GameSnapshot>>,
    reads: AtomicUsize,
}

impl MutableProvider {
    pub(crate) fn set_money(&self, money: f64) {
        let mut snapshot = GameSnapshot::default();
        snapshot.player_info.money = money;
        *self.current.lock().expect("provider lock") = Some(snapshot);
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl SnapshotProvider for MutableProvider {
    fn snapshot(&self) -> Option<GameSnapshot> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.current.lock().expect("provider lock").clone()
    }
}

#[derive(Default)]
pub(crate) struct RecordingConsumer {
    pub(crate) applied: Mutex<Vec<GameSnapshot>>,
    pub(crate) rewards: Mutex<Vec<u64>>,
}

impl SnapshotConsumer for RecordingConsumer {
    fn apply_snapshot(&self, snapshot: &GameSnapshot) {
        self.applied
            .lock()
            .expect("applied lock")
            .push(snapshot.clone());
    }

    fn apply_offline_reward(&self, amount: u64) {
        self.rewards.lock().expect("rewards lock").push(amount);
    }
}

/// Money field of a recorded save request body.
pub(crate) fn saved_money(request: &TransportRequest) -> f64 {
    request
        .body
        .as_ref()
        .and_then(|body| body["playerInfo"]["money"].as_f64())
        .expect("save body carries playerInfo.money")
}
