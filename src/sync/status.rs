use crate::api::{ApiError, ApiErrorKind};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug)]
struct Inner {
    in_flight: Cell<usize>,
    pending: Cell<usize>,
    backend_online: Cell<bool>,
    last_error: RefCell<Option<String>>,
    /// While offline, the earliest time the next probe request may go out.
    offline_next_probe_ms: Cell<i64>,
}

/// Observable sync state for the "saving" indicator. Clones share state.
#[derive(Clone, Debug)]
pub struct SyncStatus {
    inner: Rc<Inner>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatus {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                in_flight: Cell::new(0),
                pending: Cell::new(0),
                backend_online: Cell::new(true),
                last_error: RefCell::new(None),
                offline_next_probe_ms: Cell::new(0),
            }),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.get()
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.get()
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight() > 0 || self.pending() > 0
    }

    pub fn is_backend_online(&self) -> bool {
        self.inner.backend_online.get()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.borrow().clone()
    }

    pub(crate) fn set_pending(&self, n: usize) {
        self.inner.pending.set(n);
    }

    pub(crate) fn begin_request(&self) {
        self.inner.in_flight.set(self.in_flight() + 1);
    }

    pub(crate) fn end_request(&self) {
        self.inner.in_flight.set(self.in_flight().saturating_sub(1));
    }

    pub(crate) fn mark_backend_online(&self) {
        self.inner.backend_online.set(true);
        self.inner.last_error.replace(None);
        self.inner.offline_next_probe_ms.set(0);
    }

    /// Only transport failures flip the backend offline; every failure is
    /// remembered as the last error.
    pub(crate) fn mark_backend_error(&self, e: &ApiError) {
        if e.kind == ApiErrorKind::Network {
            self.inner.backend_online.set(false);
        }
        self.inner.last_error.replace(Some(e.to_string()));
    }

    pub(crate) fn should_probe_offline(&self, now_ms: i64) -> bool {
        if self.is_backend_online() {
            return true;
        }
        let next = self.inner.offline_next_probe_ms.get();
        next == 0 || now_ms >= next
    }

    pub(crate) fn schedule_next_offline_probe(&self, now_ms: i64, interval_ms: i64) {
        self.inner.offline_next_probe_ms.set(now_ms + interval_ms);
    }
}
