//! Post-commit reconcile task

use std::sync::Arc;
use std::time::Duration;

use apogy_core::{Context, Document};
use tracing::{debug, warn};

use crate::bus::{reconcile_lock_key, Bus, RECONCILE_TOPIC};
use crate::config::ReconcileConfig;
use crate::model::Model;
use crate::reactor::ReactorRegistry;

/// One committed change to hand to the model's reactors
pub(crate) struct ReconcileTask {
    pub(crate) reactors: Arc<ReactorRegistry>,
    pub(crate) bus: Option<Arc<dyn Bus>>,
    pub(crate) model: Arc<Model>,
    pub(crate) old: Option<Document>,
    pub(crate) new: Option<Document>,
    pub(crate) config: ReconcileConfig,
}

impl ReconcileTask {
    fn subject(&self) -> Option<&Document> {
        self.new.as_ref().or(self.old.as_ref())
    }

    /// Run the reactors; failures are logged, never returned
    pub(crate) fn run(self) {
        let Some(subject) = self.subject() else {
            return;
        };
        let (model, id) = (subject.model.clone(), subject.id.clone());
        let ctx = Context::with_timeout(Duration::from_millis(self.config.timeout_ms));

        let mut lock = match &self.bus {
            Some(bus) => {
                let key = reconcile_lock_key(&model, &id);
                match bus.lock(&ctx, &key, Duration::from_millis(self.config.lock_lease_ms)) {
                    Ok(lock) => Some(lock),
                    Err(e) => {
                        warn!(model = %model, id = %id, error = %e, "reconcile lock not acquired, skipping");
                        return;
                    }
                }
            }
            None => None,
        };

        let outcome = self.reactors.reconcile(
            &ctx,
            &self.model.reactors,
            self.old.as_ref(),
            self.new.as_ref(),
            &self.config,
        );
        match &outcome {
            Ok(()) => debug!(model = %model, id = %id, "reconciled"),
            Err(e) => warn!(model = %model, id = %id, error = %e, "reconcile failed"),
        }

        if let (Some(bus), Some(held)) = (&self.bus, lock.as_mut()) {
            if let Err(e) = held.keep_alive() {
                warn!(model = %model, id = %id, error = %e, "reconcile lease lost");
            }
            if outcome.is_ok() {
                let path = format!("{}/{}", model, id);
                if let Err(e) = bus.send(RECONCILE_TOPIC, path.into_bytes()) {
                    warn!(model = %model, id = %id, error = %e, "reconcile notification failed");
                }
            }
            held.unlock();
        }
    }
}
