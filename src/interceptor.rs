use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ReqflowResult;
use crate::request::RequestDescriptor;
use crate::response::ResponseEnvelope;
use crate::util::lock_unpoisoned;

/// A transform applied to every outgoing descriptor. Returning an error
/// aborts the dispatch before any network attempt.
pub trait RequestInterceptor: Send + Sync {
    fn on_request(&self, request: RequestDescriptor) -> ReqflowResult<RequestDescriptor>;
}

impl<F> RequestInterceptor for F
where
    F: Fn(RequestDescriptor) -> ReqflowResult<RequestDescriptor> + Send + Sync,
{
    fn on_request(&self, request: RequestDescriptor) -> ReqflowResult<RequestDescriptor> {
        (self)(request)
    }
}

/// A transform applied to every attempt outcome. The chain also receives
/// faults, so a step may recover by returning an envelope.
pub trait ResponseInterceptor: Send + Sync {
    fn on_response(&self, outcome: ReqflowResult<ResponseEnvelope>)
    -> ReqflowResult<ResponseEnvelope>;
}

impl<F> ResponseInterceptor for F
where
    F: Fn(ReqflowResult<ResponseEnvelope>) -> ReqflowResult<ResponseEnvelope> + Send + Sync,
{
    fn on_response(
        &self,
        outcome: ReqflowResult<ResponseEnvelope>,
    ) -> ReqflowResult<ResponseEnvelope> {
        (self)(outcome)
    }
}

/// Identifies a registered step for later ejection. Ids are drawn from one
/// process-wide counter, so a handle passed to a chain that never issued it
/// matches nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InterceptorHandle(u64);

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(0);

fn next_handle() -> InterceptorHandle {
    InterceptorHandle(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
}

/// Ordered, mutable list of transform steps.
///
/// `run` captures a snapshot of the registered steps before executing, so a
/// concurrent `eject` never affects a run already in flight.
pub struct InterceptorChain<S: ?Sized> {
    steps: Mutex<Vec<(InterceptorHandle, Arc<S>)>>,
}

impl<S: ?Sized> InterceptorChain<S> {
    pub(crate) fn new() -> Self {
        Self {
            steps: Mutex::new(Vec::new()),
        }
    }

    /// Appends a step in registration order.
    pub fn register(&self, step: Arc<S>) -> InterceptorHandle {
        let handle = next_handle();
        lock_unpoisoned(&self.steps).push((handle, step));
        handle
    }

    /// Inserts a step at `position`, clamped to the current length.
    pub fn register_at(&self, step: Arc<S>, position: usize) -> InterceptorHandle {
        let handle = next_handle();
        let mut steps = lock_unpoisoned(&self.steps);
        let position = position.min(steps.len());
        steps.insert(position, (handle, step));
        handle
    }

    /// Removes a step; returns whether the handle was still registered.
    pub fn eject(&self, handle: InterceptorHandle) -> bool {
        let mut steps = lock_unpoisoned(&self.steps);
        let before = steps.len();
        steps.retain(|(registered, _)| *registered != handle);
        steps.len() != before
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.steps).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<S>> {
        lock_unpoisoned(&self.steps)
            .iter()
            .map(|(_, step)| step.clone())
            .collect()
    }
}

impl InterceptorChain<dyn RequestInterceptor> {
    /// Runs the descriptor through every step in registration order; the
    /// first error short-circuits the rest.
    pub fn run(&self, request: RequestDescriptor) -> ReqflowResult<RequestDescriptor> {
        let mut current = request;
        for step in self.snapshot() {
            current = step.on_request(current)?;
        }
        Ok(current)
    }

    pub fn register_fn<F>(&self, step: F) -> InterceptorHandle
    where
        F: Fn(RequestDescriptor) -> ReqflowResult<RequestDescriptor> + Send + Sync + 'static,
    {
        self.register(Arc::new(step))
    }
}

impl InterceptorChain<dyn ResponseInterceptor> {
    /// Runs the outcome through every step in registration order. A step that
    /// recovers an upstream fault ends the run: the remaining steps are
    /// skipped and the recovered envelope is returned.
    pub fn run(
        &self,
        outcome: ReqflowResult<ResponseEnvelope>,
    ) -> ReqflowResult<ResponseEnvelope> {
        let mut current = outcome;
        for step in self.snapshot() {
            let had_fault = current.is_err();
            current = step.on_response(current);
            if had_fault && current.is_ok() {
                break;
            }
        }
        current
    }

    pub fn register_fn<F>(&self, step: F) -> InterceptorHandle
    where
        F: Fn(ReqflowResult<ResponseEnvelope>) -> ReqflowResult<ResponseEnvelope>
            + Send
            + Sync
            + 'static,
    {
        self.register(Arc::new(step))
    }
}
