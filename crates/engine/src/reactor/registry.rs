//! Runtime kinds and running reactors

use std::collections::BTreeMap;
use std::sync::Arc;

use apogy_core::{Context, Document, Error, Result, Value};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use super::builtin::{Immutable, IMMUTABLE_ID};
use super::{Reactor, ReactorRuntime};
use crate::config::ReconcileConfig;
use crate::retry::{backoff, RetryConfig};

/// Registered runtime kinds and the reactors currently running
///
/// Reactor ids are document ids of `Reactor` documents, plus the built-in
/// `Immutable`, which is always running and cannot be replaced.
pub struct ReactorRegistry {
    runtimes: RwLock<FxHashMap<String, Arc<dyn ReactorRuntime>>>,
    running: RwLock<FxHashMap<String, Arc<dyn Reactor>>>,
}

impl std::fmt::Debug for ReactorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut runtimes: Vec<String> = self.runtimes.read().keys().cloned().collect();
        let mut running: Vec<String> = self.running.read().keys().cloned().collect();
        runtimes.sort();
        running.sort();
        f.debug_struct("ReactorRegistry")
            .field("runtimes", &runtimes)
            .field("running", &running)
            .finish()
    }
}

impl Default for ReactorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactorRegistry {
    /// A registry with the built-in reactors running and no runtime kinds
    pub fn new() -> Self {
        let mut running: FxHashMap<String, Arc<dyn Reactor>> = FxHashMap::default();
        running.insert(IMMUTABLE_ID.to_string(), Arc::new(Immutable));
        Self {
            runtimes: RwLock::new(FxHashMap::default()),
            running: RwLock::new(running),
        }
    }

    fn is_builtin(id: &str) -> bool {
        id == IMMUTABLE_ID
    }

    /// Register a runtime kind, replacing any previous one of the same name
    pub fn register_runtime(&self, runtime: Arc<dyn ReactorRuntime>) {
        let kind = runtime.kind().to_string();
        debug!(kind = %kind, "registered reactor runtime");
        self.runtimes.write().insert(kind, runtime);
    }

    /// True if a runtime kind is registered
    pub fn has_runtime(&self, kind: &str) -> bool {
        self.runtimes.read().contains_key(kind)
    }

    /// Start a reactor from its document without installing it
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `val.runtime` is missing or unknown, if the id
    /// is a built-in reactor, or if the runtime rejects the configuration.
    pub fn prepare(&self, doc: &Document) -> Result<Arc<dyn Reactor>> {
        if Self::is_builtin(&doc.id) {
            return Err(Error::validation(format!(
                "invalid reactor: {} is built in",
                doc.id
            )));
        }
        let kind = match doc.val.get("runtime") {
            Some(Value::String(kind)) if !kind.is_empty() => kind,
            Some(_) => {
                return Err(Error::validation(
                    "invalid reactor: val.runtime must be string",
                ))
            }
            None => {
                return Err(Error::validation(
                    "invalid reactor: val.runtime is required",
                ))
            }
        };
        let runtime = self.runtimes.read().get(kind).cloned().ok_or_else(|| {
            Error::validation(format!("invalid reactor: runtime {} not supported", kind))
        })?;
        runtime.start(doc).map_err(|e| match e {
            Error::Validation(_) => e,
            other => Error::validation(format!("invalid reactor {}: {}", doc.id, other)),
        })
    }

    /// Install a started reactor, stopping the instance it replaces
    pub fn install(&self, id: &str, reactor: Arc<dyn Reactor>) {
        let previous = self.running.write().insert(id.to_string(), reactor);
        info!(id, replaced = previous.is_some(), "reactor started");
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    /// Stop and remove a reactor; built-ins are never removed
    pub fn remove(&self, id: &str) -> bool {
        if Self::is_builtin(id) {
            return false;
        }
        let removed = self.running.write().remove(id);
        match removed {
            Some(reactor) => {
                info!(id, "stopping reactor");
                reactor.stop();
                true
            }
            None => false,
        }
    }

    /// A running reactor
    pub fn get(&self, id: &str) -> Option<Arc<dyn Reactor>> {
        self.running.read().get(id).cloned()
    }

    /// True if a reactor with this id is running
    pub fn is_running(&self, id: &str) -> bool {
        self.running.read().contains_key(id)
    }

    /// Check that every listed reactor is running
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the first missing reactor.
    pub fn ensure_running(&self, ids: &[String]) -> Result<()> {
        let running = self.running.read();
        match ids.iter().find(|id| !running.contains_key(id.as_str())) {
            Some(missing) => Err(Error::validation(format!(
                "validation error: reactor does not exist: {}",
                missing
            ))),
            None => Ok(()),
        }
    }

    /// `status` value reported on reactor documents
    pub fn status(&self, id: &str) -> Value {
        let mut reactor = BTreeMap::new();
        reactor.insert("running".to_string(), Value::Bool(self.is_running(id)));
        let mut status = BTreeMap::new();
        status.insert("reactor".to_string(), Value::Object(reactor));
        Value::Object(status)
    }

    /// Run `validate` of each listed reactor in order
    ///
    /// Listed reactors that are not running are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Validation` (`reactor X rejected change: ...`) for the first
    /// rejection; cancellation errors pass through unchanged.
    pub fn validate(
        &self,
        ctx: &Context,
        reactors: &[String],
        old: Option<&Document>,
        mut new: Option<Document>,
    ) -> Result<Option<Document>> {
        for id in reactors {
            let Some(reactor) = self.get(id) else {
                warn!(reactor = %id, "reactor listed by model is not running, skipping validate");
                continue;
            };
            new = reactor.validate(ctx, old, new).map_err(|e| {
                if e.is_cancelled() {
                    e
                } else {
                    Error::validation(format!("reactor {} rejected change: {}", id, e))
                }
            })?;
        }
        Ok(new)
    }

    /// Run `reconcile` of each listed reactor, retrying failures with backoff
    ///
    /// Every reactor gets its attempts even if an earlier one gave up.
    ///
    /// # Errors
    ///
    /// Returns the last failure after all reactors ran, or the context error
    /// if the context ends while waiting to retry.
    pub fn reconcile(
        &self,
        ctx: &Context,
        reactors: &[String],
        old: Option<&Document>,
        new: Option<&Document>,
        config: &ReconcileConfig,
    ) -> Result<()> {
        let policy = RetryConfig::new()
            .with_max_retries(config.max_attempts.saturating_sub(1))
            .with_base_delay_ms(config.base_delay_ms)
            .with_max_delay_ms(config.max_delay_ms);
        let mut outcome = Ok(());

        for id in reactors {
            let Some(reactor) = self.get(id) else {
                continue;
            };
            let mut attempt = 0;
            loop {
                match reactor.reconcile(ctx, old, new) {
                    Ok(()) => break,
                    Err(e) if attempt < policy.max_retries && !e.is_cancelled() => {
                        warn!(reactor = %id, attempt, error = %e, "reconcile failed, retrying");
                        backoff(ctx, policy.calculate_delay(attempt))?;
                        attempt += 1;
                    }
                    Err(e) => {
                        warn!(reactor = %id, attempts = attempt + 1, error = %e, "reconcile gave up");
                        outcome = Err(e);
                        break;
                    }
                }
            }
        }
        outcome
    }

    /// Stop every non-built-in reactor
    pub fn stop_all(&self) {
        let stopped: Vec<(String, Arc<dyn Reactor>)> = {
            let mut running = self.running.write();
            let ids: Vec<String> = running
                .keys()
                .filter(|id| !Self::is_builtin(id))
                .cloned()
                .collect();
            ids.into_iter()
                .filter_map(|id| running.remove(&id).map(|r| (id, r)))
                .collect()
        };
        for (id, reactor) in stopped {
            debug!(id = %id, "stopping reactor");
            reactor.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Probe {
        stops: AtomicUsize,
        reconciles: AtomicUsize,
        fail_first: usize,
    }

    impl Reactor for Probe {
        fn validate(&self, _: &Context, _: Option<&Document>, new: Option<Document>) -> Result<Option<Document>> {
            Ok(new.map(|mut d| {
                if let Value::Object(map) = &mut d.val {
                    map.insert("probed".to_string(), Value::Bool(true));
                }
                d
            }))
        }

        fn reconcile(&self, _: &Context, _: Option<&Document>, _: Option<&Document>) -> Result<()> {
            let n = self.reconciles.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(Error::internal("not yet"));
            }
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ProbeRuntime;

    impl ReactorRuntime for ProbeRuntime {
        fn kind(&self) -> &str {
            "probe"
        }

        fn start(&self, reactor: &Document) -> Result<Arc<dyn Reactor>> {
            if reactor.val.get("broken").is_some() {
                return Err(Error::internal("cannot start"));
            }
            Ok(Arc::new(Probe::default()))
        }
    }

    fn reactor_doc(id: &str, val: serde_json::Value) -> Document {
        Document::new("Reactor", id, Value::from(val))
    }

    fn fast() -> ReconcileConfig {
        ReconcileConfig {
            base_delay_ms: 1,
            max_delay_ms: 1,
            max_attempts: 3,
            ..ReconcileConfig::default()
        }
    }

    #[test]
    fn test_builtin_immutable_is_running() {
        let registry = ReactorRegistry::new();
        assert!(registry.is_running("Immutable"));
        assert!(!registry.remove("Immutable"));
        assert!(registry.ensure_running(&["Immutable".to_string()]).is_ok());
        let err = registry.ensure_running(&["com.ex.Nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("reactor does not exist: com.ex.Nope"));
    }

    #[test]
    fn test_prepare_errors() {
        let registry = ReactorRegistry::new();
        registry.register_runtime(Arc::new(ProbeRuntime));
        assert!(registry.prepare(&reactor_doc("r", json!({}))).is_err());
        assert!(registry.prepare(&reactor_doc("r", json!({"runtime": 3}))).is_err());
        let err = registry
            .prepare(&reactor_doc("r", json!({"runtime": "wasm"})))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "invalid reactor: runtime wasm not supported");
        let err = registry
            .prepare(&reactor_doc("r", json!({"runtime": "probe", "broken": true})))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Validation(_)));
        assert!(registry
            .prepare(&reactor_doc("Immutable", json!({"runtime": "probe"})))
            .is_err());
    }

    #[test]
    fn test_install_replaces_and_stops_previous() {
        let registry = ReactorRegistry::new();
        let first = Arc::new(Probe::default());
        registry.install("r", first.clone());
        registry.install("r", Arc::new(Probe::default()));
        assert_eq!(first.stops.load(Ordering::SeqCst), 1);
        assert!(registry.remove("r"));
        assert!(!registry.is_running("r"));
    }

    #[test]
    fn test_status_shape() {
        let registry = ReactorRegistry::new();
        assert_eq!(
            registry.status("Immutable"),
            Value::from(json!({"reactor": {"running": true}}))
        );
        assert_eq!(
            registry.status("r"),
            Value::from(json!({"reactor": {"running": false}}))
        );
    }

    #[test]
    fn test_validate_chains_and_wraps_rejections() {
        let registry = ReactorRegistry::new();
        registry.install("probe", Arc::new(Probe::default()));
        let ctx = Context::background();
        let doc = Document::new("com.ex.Log", "l1", Value::from(json!({})));

        let out = registry
            .validate(&ctx, &["probe".to_string(), "missing".to_string()], None, Some(doc.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(out.val.get("probed"), Some(&Value::Bool(true)));

        let err = registry
            .validate(&ctx, &["Immutable".to_string()], Some(&doc), Some(doc.clone()))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "reactor Immutable rejected change: Document is immutable"
        );
    }

    #[test]
    fn test_reconcile_retries_until_success() {
        let registry = ReactorRegistry::new();
        let probe = Arc::new(Probe {
            fail_first: 2,
            ..Probe::default()
        });
        registry.install("probe", probe.clone());
        let ctx = Context::background();
        registry
            .reconcile(&ctx, &["probe".to_string()], None, None, &fast())
            .unwrap();
        assert_eq!(probe.reconciles.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reconcile_gives_up_after_max_attempts() {
        let registry = ReactorRegistry::new();
        let probe = Arc::new(Probe {
            fail_first: 100,
            ..Probe::default()
        });
        registry.install("probe", probe.clone());
        let ctx = Context::background();
        assert!(registry
            .reconcile(&ctx, &["probe".to_string()], None, None, &fast())
            .is_err());
        assert_eq!(probe.reconciles.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stop_all_keeps_builtins() {
        let registry = ReactorRegistry::new();
        let probe = Arc::new(Probe::default());
        registry.install("probe", probe.clone());
        registry.stop_all();
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
        assert!(registry.is_running("Immutable"));
        assert!(!registry.is_running("probe"));
    }
}
