//! Middleware pipeline engine.
//!
//! Gates are registered per named stage and run sequentially in
//! registration order. Each gate is handed the stage's request record and
//! a [`Continuation`] it must resolve exactly once, mirroring the
//! continuation-passing gates of the system this engine generalizes --
//! modeled here with a one-shot channel instead of a raw callback so a
//! second resolution is detectable and turned into a warning rather than
//! undefined behavior.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Handshake,
    Emit,
    Subscribe,
    PublishIn,
    PublishOut,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Handshake => "handshake",
            Stage::Emit => "emit",
            Stage::Subscribe => "subscribe",
            Stage::PublishIn => "publishIn",
            Stage::PublishOut => "publishOut",
        };
        f.write_str(s)
    }
}

pub const ALL_STAGES: [Stage; 5] = [
    Stage::Handshake,
    Stage::Emit,
    Stage::Subscribe,
    Stage::PublishIn,
    Stage::PublishOut,
];

/// The request record a gate sees, shaped per stage.
#[derive(Debug, Clone)]
pub enum StageRequest {
    Handshake {
        origin: Option<String>,
        path: String,
    },
    Emit {
        session_id: String,
        event: String,
        data: Value,
        auth_token_expired_error: Option<Arc<CoreError>>,
    },
    Subscribe {
        session_id: String,
        channel: String,
        auth_token_expired_error: Option<Arc<CoreError>>,
    },
    PublishIn {
        session_id: String,
        channel: String,
        data: Value,
        auth_token_expired_error: Option<Arc<CoreError>>,
    },
    PublishOut {
        channel: String,
        data: Value,
    },
}

/// What a gate decided, once resolved.
#[derive(Debug, Clone)]
pub enum Decision {
    Accept,
    /// Accept externally but suppress the side effect -- no warning emitted.
    SilentBlock,
    Reject(Arc<CoreError>),
}

/// A single-shot handle a gate resolves at most once.
pub struct Continuation {
    tx: parking_lot::Mutex<Option<oneshot::Sender<Decision>>>,
    fired: AtomicBool,
    stage: Stage,
    warnings: mpsc::UnboundedSender<CoreError>,
}

impl Continuation {
    fn resolve(&self, decision: Decision) {
        if self.fired.swap(true, Ordering::SeqCst) {
            let _ = self
                .warnings
                .send(CoreError::MiddlewareDoubleCallback { stage: self.stage });
            return;
        }
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(decision);
        }
    }

    /// Accept the request, running its side effect.
    pub fn accept(&self) {
        self.resolve(Decision::Accept);
    }

    /// Accept the request but suppress its side effect and any warning.
    pub fn silent_block(&self) {
        self.resolve(Decision::SilentBlock);
    }

    /// Reject the request with a descriptive error.
    pub fn reject(&self, err: CoreError) {
        self.resolve(Decision::Reject(Arc::new(err)));
    }
}

pub type GateFn = Arc<dyn Fn(StageRequest, Arc<Continuation>) + Send + Sync>;

/// A boxed async gate, for the common case where the check itself is
/// naturally expressed as a future rather than a raw callback.
pub fn async_gate<F, Fut>(f: F) -> GateFn
where
    F: Fn(StageRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Decision> + Send + 'static,
{
    Arc::new(move |req, cont| {
        let fut: Pin<Box<dyn Future<Output = Decision> + Send>> = Box::pin(f(req));
        tokio::spawn(async move {
            let decision = fut.await;
            cont.resolve_pub(decision);
        });
    })
}

impl Continuation {
    /// Exposed for [`async_gate`] -- direct users should prefer
    /// `accept` / `silent_block` / `reject`.
    fn resolve_pub(&self, decision: Decision) {
        self.resolve(decision);
    }
}

#[derive(Default)]
pub struct MiddlewarePipeline {
    stages: RwLock<HashMap<Stage, Vec<GateFn>>>,
    warnings: parking_lot::Mutex<Option<mpsc::UnboundedSender<CoreError>>>,
    emit_warnings: AtomicBool,
}

impl MiddlewarePipeline {
    pub fn new(emit_warnings: bool) -> Self {
        Self {
            stages: RwLock::new(HashMap::new()),
            warnings: parking_lot::Mutex::new(None),
            emit_warnings: AtomicBool::new(emit_warnings),
        }
    }

    /// Wire a channel that receives every warning the pipeline produces
    /// (rejections when `middlewareEmitWarnings` is set, and any
    /// double-callback violation regardless of that setting).
    pub fn set_warning_sink(&self, tx: mpsc::UnboundedSender<CoreError>) {
        *self.warnings.lock() = Some(tx);
    }

    pub fn add_middleware(&self, stage: Stage, gate: GateFn) {
        self.stages.write().entry(stage).or_default().push(gate);
    }

    /// Remove the first gate with matching pointer identity.
    pub fn remove_middleware(&self, stage: Stage, gate: &GateFn) {
        if let Some(list) = self.stages.write().get_mut(&stage) {
            if let Some(idx) = list.iter().position(|g| Arc::ptr_eq(g, gate)) {
                list.remove(idx);
            }
        }
    }

    /// Run every gate registered for `stage`, in registration order,
    /// short-circuiting on the first non-accept decision.
    pub async fn run(&self, stage: Stage, req: StageRequest) -> Decision {
        // Snapshot so concurrent add/removeMiddleware calls never affect
        // an in-flight run.
        let gates = self
            .stages
            .read()
            .get(&stage)
            .cloned()
            .unwrap_or_default();

        for gate in gates {
            let (tx, rx) = oneshot::channel();
            let warnings = self
                .warnings
                .lock()
                .clone()
                .unwrap_or_else(|| mpsc::unbounded_channel().0);
            let cont = Arc::new(Continuation {
                tx: parking_lot::Mutex::new(Some(tx)),
                fired: AtomicBool::new(false),
                stage,
                warnings,
            });
            gate(req.clone(), cont);

            let decision = match rx.await {
                Ok(decision) => decision,
                Err(_) => Decision::Reject(Arc::new(CoreError::Internal(
                    "gate dropped its continuation without resolving it".into(),
                ))),
            };

            match decision {
                Decision::Accept => continue,
                Decision::SilentBlock => return Decision::SilentBlock,
                Decision::Reject(err) => {
                    self.maybe_warn(stage, &err);
                    return Decision::Reject(err);
                }
            }
        }

        Decision::Accept
    }

    fn maybe_warn(&self, _stage: Stage, err: &CoreError) {
        if matches!(err, CoreError::SilentMiddlewareBlocked { .. }) {
            return;
        }
        if !self.emit_warnings.load(Ordering::Relaxed) {
            return;
        }
        if let Some(tx) = self.warnings.lock().as_ref() {
            let _ = tx.send(CoreError::MiddlewareRejected {
                stage: _stage,
                message: err.to_string(),
            });
        }
    }
}
