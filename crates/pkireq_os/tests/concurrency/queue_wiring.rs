#![forbid(unsafe_code)]

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pkireq_engines::notifier::RecordingNotifier;
use pkireq_engines::policy::{AcceptAllPolicy, AgentApprovalPolicy};
use pkireq_engines::service::NoopService;
use pkireq_kernel_contracts::capability::{CapabilityError, Service, ServiceResult};
use pkireq_kernel_contracts::{Request, RequestId, RequestStatus};
use pkireq_os::{QueueError, RequestQueue};
use pkireq_storage::repo::RequestRepository;
use pkireq_storage::store::InMemoryRequestStore;

/// Returns `Pending` and hands the id to whoever completes it out of band.
struct CallbackService {
    tx: Mutex<mpsc::Sender<RequestId>>,
}

impl Service for CallbackService {
    fn service_request(&self, request: &mut Request) -> Result<ServiceResult, CapabilityError> {
        self.tx
            .lock()
            .send(request.id().clone())
            .map_err(|e| CapabilityError::new("callback_service", e.to_string()))?;
        Ok(ServiceResult::Pending)
    }
}

/// Parks the service call for `held` until the test releases it; every other
/// id completes straight away.
struct GateService {
    held: RequestId,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Service for GateService {
    fn service_request(&self, request: &mut Request) -> Result<ServiceResult, CapabilityError> {
        if request.id() != &self.held {
            return Ok(ServiceResult::Done);
        }
        let gate_err = |e: String| CapabilityError::new("gate_service", e);
        self.entered.lock().send(()).map_err(|e| gate_err(e.to_string()))?;
        self.release.lock().recv().map_err(|e| gate_err(e.to_string()))?;
        Ok(ServiceResult::Done)
    }
}

#[test]
fn at_concurrency_01_concurrent_approvals_lose_no_update() {
    let store = Arc::new(InMemoryRequestStore::new_in_memory());
    let queue = Arc::new(
        RequestQueue::new(
            store.clone(),
            Arc::new(AgentApprovalPolicy),
            Arc::new(NoopService),
            Arc::new(RecordingNotifier::new()),
        )
        .with_approval_threshold(|_: &str| 100u32),
    );
    let mut r = queue.new_request("enrollment").unwrap();
    queue.process_request(&mut r).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let queue = Arc::clone(&queue);
            let id = r.id().clone();
            thread::spawn(move || queue.approve(&id, &format!("agent{i}")).unwrap())
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let stored = store.read(r.id()).unwrap();
    assert_eq!(stored.status(), RequestStatus::Pending);
    assert_eq!(stored.approvals().len(), 16);
    assert_eq!(queue.in_flight(), 0);
}

#[test]
fn at_concurrency_02_threshold_crossing_happens_exactly_once() {
    let store = Arc::new(InMemoryRequestStore::new_in_memory());
    let notifier = Arc::new(RecordingNotifier::new());
    let queue = Arc::new(
        RequestQueue::new(
            store.clone(),
            Arc::new(AgentApprovalPolicy),
            Arc::new(NoopService),
            notifier.clone(),
        )
        .with_approval_threshold(|_: &str| 3u32),
    );
    let mut r = queue.new_request("enrollment").unwrap();
    queue.process_request(&mut r).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let queue = Arc::clone(&queue);
            let id = r.id().clone();
            thread::spawn(move || queue.approve(&id, &format!("agent{i}")))
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let late = outcomes
        .iter()
        .filter(|o| matches!(o, Err(QueueError::InvalidTransition { .. })))
        .count();
    assert_eq!(late, 5);
    let stored = store.read(r.id()).unwrap();
    assert_eq!(stored.status(), RequestStatus::Complete);
    assert_eq!(stored.approvals().len(), 3);
    assert_eq!(notifier.count_for(r.id()), 1);
}

#[test]
fn at_concurrency_03_out_of_band_completion_waits_for_processing() {
    let (tx, rx) = mpsc::channel();
    let store = Arc::new(InMemoryRequestStore::new_in_memory());
    let notifier = Arc::new(RecordingNotifier::new());
    let queue = Arc::new(RequestQueue::new(
        store.clone(),
        Arc::new(AcceptAllPolicy),
        Arc::new(CallbackService { tx: Mutex::new(tx) }),
        notifier.clone(),
    ));

    let completer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let id: RequestId = rx.recv().unwrap();
            queue.service_complete(&id)
        })
    };

    let mut r = queue.new_request("enrollment").unwrap();
    queue.process_request(&mut r).unwrap();
    assert_eq!(r.status(), RequestStatus::SvcPending);

    let done = completer.join().unwrap().unwrap();
    assert_eq!(done.status(), RequestStatus::Complete);
    assert_eq!(store.read(r.id()).unwrap().status(), RequestStatus::Complete);
    assert_eq!(notifier.count_for(r.id()), 1);
}

#[test]
fn at_concurrency_04_distinct_ids_process_in_parallel() {
    let store = Arc::new(InMemoryRequestStore::new_in_memory());
    let notifier = Arc::new(RecordingNotifier::new());
    let queue = Arc::new(RequestQueue::new(
        store.clone(),
        Arc::new(AcceptAllPolicy),
        Arc::new(NoopService),
        notifier.clone(),
    ));
    let handles: Vec<_> = (0..12)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut r = queue.new_request("renewal").unwrap();
                queue.process_request(&mut r).unwrap();
                r
            })
        })
        .collect();
    let done: Vec<Request> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut ids: Vec<_> = done.iter().map(|r| r.id().clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 12);
    assert!(done.iter().all(|r| r.status() == RequestStatus::Complete));
    assert_eq!(notifier.notifications().len(), 12);
    assert_eq!(queue.in_flight(), 0);
}

#[test]
fn at_concurrency_05_blocked_request_does_not_hold_up_other_ids() {
    let store = Arc::new(InMemoryRequestStore::new_in_memory());
    let notifier = Arc::new(RecordingNotifier::new());
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let held_id = RequestId::from(1u64);
    let queue = Arc::new(RequestQueue::new(
        store.clone(),
        Arc::new(AcceptAllPolicy),
        Arc::new(GateService {
            held: held_id.clone(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        }),
        notifier.clone(),
    ));

    let mut held = queue.new_request("enrollment").unwrap();
    assert_eq!(held.id(), &held_id);
    let mut other = queue.new_request("enrollment").unwrap();

    let held_worker = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            queue.process_request(&mut held).unwrap();
            held
        })
    };
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("held request never reached the service");
    assert_eq!(queue.in_flight(), 1);

    let (done_tx, done_rx) = mpsc::channel();
    let other_worker = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            queue.process_request(&mut other).unwrap();
            done_tx.send(other.status()).unwrap();
        })
    };
    let other_status = done_rx.recv_timeout(Duration::from_secs(5));
    // The held request is still inside its service call at this point.
    assert_eq!(
        store.read(&held_id).unwrap().status(),
        RequestStatus::Approved
    );
    release_tx.send(()).unwrap();

    assert_eq!(other_status, Ok(RequestStatus::Complete));
    other_worker.join().unwrap();
    let held = held_worker.join().unwrap();
    assert_eq!(held.status(), RequestStatus::Complete);
    assert_eq!(notifier.notifications().len(), 2);
    assert_eq!(queue.in_flight(), 0);
}
