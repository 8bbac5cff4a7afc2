//! Per-request lifecycle state.
//!
//! A [`RequestContext`] is created by the client at send time, mutated by
//! the receiving instance or proxy and by timeout logic, and discarded
//! after telemetry emission. Its invariants:
//!
//! - exactly one terminal status is ever assigned (first settlement wins)
//! - timestamps, where set, are non-decreasing in lifecycle order
//! - once `failed_at` is set the server promise is rejected and no further
//!   success fields are written

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use gridsim_kernel::{Kernel, Promise, SimTime};

use crate::error::{SimFault, StatusCode};

/// A request or response payload. Contents are opaque to the core; the
/// size feeds network delay models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    /// Free-form payload marker, useful when tracing a request through logs.
    #[serde(default)]
    pub attachment: Option<String>,
    /// Payload size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// The promise settled with the outcome of a full request exchange.
pub type ExchangePromise = Promise<Message, SimFault>;

/// Shared handle to one request's lifecycle state.
pub type RequestRef = Rc<RequestContext>;

/// Lifecycle record for one logical request.
///
/// The embedded server promise lets the serving side signal completion
/// independently of network simulation: the client awaits it between the
/// outbound and return transmissions.
pub struct RequestContext {
    request: Message,
    response: RefCell<Option<Message>>,
    host_name: RefCell<Option<String>>,
    endpoint_name: RefCell<Option<String>>,
    instance_name: RefCell<Option<String>>,
    status: Cell<Option<StatusCode>>,
    sent: Cell<Option<SimTime>>,
    arrived: Cell<Option<SimTime>>,
    proc_started: Cell<Option<SimTime>>,
    proc_completed: Cell<Option<SimTime>>,
    resp_arrived: Cell<Option<SimTime>>,
    failed_at: Cell<Option<SimTime>>,
    is_timeout: Cell<bool>,
    recorded: Cell<bool>,
    server_promise: Promise<Message, SimFault>,
}

impl RequestContext {
    pub fn new(kernel: &Kernel, request: Message) -> RequestRef {
        Rc::new(RequestContext {
            request,
            response: RefCell::new(None),
            host_name: RefCell::new(None),
            endpoint_name: RefCell::new(None),
            instance_name: RefCell::new(None),
            status: Cell::new(None),
            sent: Cell::new(None),
            arrived: Cell::new(None),
            proc_started: Cell::new(None),
            proc_completed: Cell::new(None),
            resp_arrived: Cell::new(None),
            failed_at: Cell::new(None),
            is_timeout: Cell::new(false),
            recorded: Cell::new(false),
            server_promise: Promise::new(kernel),
        })
    }

    /// Settle as failed. First terminal settlement wins; the server promise
    /// is rejected either way so waiters always observe the failure.
    pub fn fail(&self, at: SimTime, code: StatusCode) {
        if self.status.get().is_none() {
            self.failed_at.set(Some(at));
            self.status.set(Some(code));
        }
        self.server_promise.reject(SimFault::Status(code));
    }

    /// Settle as succeeded. A no-op once a terminal status exists — a
    /// failed (e.g. timed-out) request never gains success fields.
    pub fn complete(&self, at: SimTime, response: Message) {
        if self.status.get().is_some() {
            return;
        }
        self.proc_completed.set(Some(at));
        self.status.set(Some(StatusCode::Succeed));
        *self.response.borrow_mut() = Some(response.clone());
        self.server_promise.resolve(response);
    }

    /// The serving side's completion promise.
    pub fn server_promise(&self) -> &Promise<Message, SimFault> {
        &self.server_promise
    }

    /// Latch telemetry emission; true exactly once.
    pub fn mark_recorded(&self) -> bool {
        !self.recorded.replace(true)
    }

    // ── Field access ────────────────────────────────────────────────

    pub fn request(&self) -> &Message {
        &self.request
    }

    pub fn response(&self) -> Option<Message> {
        self.response.borrow().clone()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status.get()
    }

    pub fn host_name(&self) -> Option<String> {
        self.host_name.borrow().clone()
    }

    pub fn set_host_name(&self, name: &str) {
        *self.host_name.borrow_mut() = Some(name.to_string());
    }

    pub fn endpoint_name(&self) -> Option<String> {
        self.endpoint_name.borrow().clone()
    }

    pub fn set_endpoint_name(&self, name: &str) {
        *self.endpoint_name.borrow_mut() = Some(name.to_string());
    }

    pub fn instance_name(&self) -> Option<String> {
        self.instance_name.borrow().clone()
    }

    pub fn set_instance_name(&self, name: &str) {
        *self.instance_name.borrow_mut() = Some(name.to_string());
    }

    pub fn sent(&self) -> Option<SimTime> {
        self.sent.get()
    }

    pub fn set_sent(&self, at: SimTime) {
        self.sent.set(Some(at));
    }

    pub fn arrived(&self) -> Option<SimTime> {
        self.arrived.get()
    }

    pub fn set_arrived(&self, at: SimTime) {
        self.arrived.set(Some(at));
    }

    pub fn proc_started(&self) -> Option<SimTime> {
        self.proc_started.get()
    }

    pub fn set_proc_started(&self, at: SimTime) {
        self.proc_started.set(Some(at));
    }

    pub fn proc_completed(&self) -> Option<SimTime> {
        self.proc_completed.get()
    }

    pub fn resp_arrived(&self) -> Option<SimTime> {
        self.resp_arrived.get()
    }

    pub fn set_resp_arrived(&self, at: SimTime) {
        self.resp_arrived.set(Some(at));
    }

    pub fn failed_at(&self) -> Option<SimTime> {
        self.failed_at.get()
    }

    pub fn is_timeout(&self) -> bool {
        self.is_timeout.get()
    }

    pub fn set_timeout(&self) {
        self.is_timeout.set(true);
    }
}
