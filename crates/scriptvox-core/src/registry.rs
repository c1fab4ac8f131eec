//! Model registry: owns the active speech backend and swaps it atomically.
//!
//! Readers take an [`Arc`] snapshot of the active handle with
//! [`ModelRegistry::get_active`] and keep using it for as long as they like.
//! [`ModelRegistry::set_active`] loads the replacement completely before it
//! publishes it, so no caller can ever observe a half-built backend. The
//! previous handle is freed once its last in-flight user drops the snapshot.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::backend::{BackendDescriptor, BackendLoader, SpeechBackend};
use crate::benchmark::Recommendation;
use crate::error::{ScriptvoxError, ScriptvoxResult};

/// A loaded backend together with the catalogue entry it came from
#[derive(Debug)]
pub struct ActiveBackend {
    descriptor: BackendDescriptor,
    backend: Arc<dyn SpeechBackend>,
}

impl ActiveBackend {
    /// Pair a loaded backend with its descriptor
    pub fn new(descriptor: BackendDescriptor, backend: Arc<dyn SpeechBackend>) -> Self {
        Self {
            descriptor,
            backend,
        }
    }

    /// Catalogue id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Catalogue entry
    #[must_use]
    pub const fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    /// The backend itself
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn SpeechBackend> {
        &self.backend
    }
}

impl Drop for ActiveBackend {
    fn drop(&mut self) {
        tracing::debug!(backend = %self.descriptor.id, "Released backend handle");
    }
}

/// Holds exactly one active backend
#[derive(Debug)]
pub struct ModelRegistry {
    catalog: Vec<BackendDescriptor>,
    loader: Arc<dyn BackendLoader>,
    active: RwLock<Arc<ActiveBackend>>,
    switch_lock: Mutex<()>,
    recommendation: RwLock<Option<Recommendation>>,
}

impl ModelRegistry {
    /// Load `initial_id` from the catalogue and make it active.
    ///
    /// # Errors
    ///
    /// Returns a model load error when the id is not catalogued or the
    /// backend cannot be loaded. Callers treat this as fatal at startup.
    pub async fn initialize(
        catalog: Vec<BackendDescriptor>,
        loader: Arc<dyn BackendLoader>,
        initial_id: &str,
    ) -> ScriptvoxResult<Self> {
        let descriptor = find(&catalog, initial_id)?.clone();
        let active = load_validated(Arc::clone(&loader), descriptor).await?;
        tracing::info!(backend = %active.id(), "Initial backend active");

        Ok(Self::with_active(catalog, loader, active))
    }

    /// Build a registry around an already loaded backend
    pub fn with_active(
        catalog: Vec<BackendDescriptor>,
        loader: Arc<dyn BackendLoader>,
        active: ActiveBackend,
    ) -> Self {
        Self {
            catalog,
            loader,
            active: RwLock::new(Arc::new(active)),
            switch_lock: Mutex::new(()),
            recommendation: RwLock::new(None),
        }
    }

    /// Snapshot of the active backend
    #[must_use]
    pub fn get_active(&self) -> Arc<ActiveBackend> {
        Arc::clone(&self.active.read())
    }

    /// Id of the active backend
    #[must_use]
    pub fn active_id(&self) -> String {
        self.active.read().id().to_string()
    }

    /// Load the backend `id` and make it active.
    ///
    /// Switches are serialized. Requests already holding a snapshot finish on
    /// the old backend; requests starting after this returns see the new one.
    /// Selecting the backend that is already active is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a model load error if `id` is unknown or fails to load; the
    /// active backend is left untouched in that case.
    pub async fn set_active(&self, id: &str) -> ScriptvoxResult<()> {
        let _guard = self.switch_lock.lock().await;

        if self.active.read().id() == id {
            tracing::debug!(backend = id, "Backend already active");
            return Ok(());
        }

        let descriptor = find(&self.catalog, id)?.clone();
        let replacement = Arc::new(load_validated(Arc::clone(&self.loader), descriptor).await?);

        let previous = std::mem::replace(&mut *self.active.write(), replacement);
        tracing::info!(
            from = %previous.id(),
            to = id,
            in_flight = Arc::strong_count(&previous) - 1,
            "Switched active backend"
        );
        Ok(())
    }

    /// Every catalogued backend, in declaration order
    #[must_use]
    pub fn catalog(&self) -> &[BackendDescriptor] {
        &self.catalog
    }

    /// Catalogue entry by id
    #[must_use]
    pub fn descriptor(&self, id: &str) -> Option<&BackendDescriptor> {
        self.catalog.iter().find(|d| d.id == id)
    }

    /// Loader used for switches and benchmark runs
    #[must_use]
    pub fn loader(&self) -> Arc<dyn BackendLoader> {
        Arc::clone(&self.loader)
    }

    /// Remember the outcome of the latest benchmark run
    pub fn record_recommendation(&self, recommendation: Recommendation) {
        *self.recommendation.write() = Some(recommendation);
    }

    /// Recommendation of the latest benchmark run, if any
    #[must_use]
    pub fn last_recommendation(&self) -> Option<Recommendation> {
        self.recommendation.read().clone()
    }
}

fn find<'a>(catalog: &'a [BackendDescriptor], id: &str) -> ScriptvoxResult<&'a BackendDescriptor> {
    catalog
        .iter()
        .find(|d| d.id == id)
        .ok_or_else(|| ScriptvoxError::backend_not_found(id))
}

async fn load_validated(
    loader: Arc<dyn BackendLoader>,
    descriptor: BackendDescriptor,
) -> ScriptvoxResult<ActiveBackend> {
    tracing::info!(backend = %descriptor.id, file = %descriptor.filename, "Loading backend");
    let (descriptor, backend) = tokio::task::spawn_blocking(move || {
        let backend = loader.load(&descriptor);
        (descriptor, backend)
    })
    .await?;
    let backend = backend?;

    if backend.known_voices().is_empty() {
        return Err(ScriptvoxError::model_load(
            &descriptor.id,
            "backend exposes no voices",
        ));
    }
    Ok(ActiveBackend::new(descriptor, backend))
}
