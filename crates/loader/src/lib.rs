//! On-demand loading of code units.
//!
//! The loader tracks which units are available, loading, or evaluated,
//! resolves shallow dependencies, persists fetched bodies under
//! version-tagged keys, and retries failed fetches on a shared sweep timer.
//!
//! Dependency handling is a best effort that assumes shallow, acyclic
//! graphs: a unit waiting on more than one simultaneously-unresolved
//! prerequisite chain is not a guaranteed-correct path. Activators must not
//! call back into the loader synchronously; a load triggered from
//! activation should be spawned.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use deferred::{Deferred, Failure};
use shared::domain::{UnitName, ViewName};
use storage::{StoreError, UnitStore};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, warn};

mod catalog;

pub use catalog::{UnitCatalog, UnitManifest};

pub const RETRY_INTERVAL: Duration = Duration::from_millis(3142);
pub const MAX_RETRIES: u32 = 9;

/// Issues a fetch for a unit's resource. Fire-and-forget: completion is
/// reported back through [`CodeUnitLoader::notify_fetched`] or
/// [`CodeUnitLoader::mark_failed`]; an unanswered fetch is re-issued by the
/// retry sweep.
pub trait UnitFetcher: Send + Sync {
    fn begin_fetch(&self, name: &UnitName, locator: &str);
}

pub struct MissingFetcher;

impl UnitFetcher for MissingFetcher {
    fn begin_fetch(&self, name: &UnitName, locator: &str) {
        warn!(unit = %name, locator, "no fetcher wired; fetch will never complete");
    }
}

/// Turns a fetched unit body into runnable functionality. How that happens
/// (script evaluation, plugin registration, ...) is the embedding's concern.
pub trait UnitActivator: Send + Sync {
    fn activate(&self, name: &UnitName, body: &str) -> Result<()>;
}

pub struct MissingActivator;

impl UnitActivator for MissingActivator {
    fn activate(&self, name: &UnitName, _body: &str) -> Result<()> {
        Err(anyhow!("no activator available for unit {name}"))
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unit {0} is not configured")]
    UnknownUnit(UnitName),
    #[error("unit {unit} has no resource for locale {locale}")]
    MissingLocaleResource { unit: UnitName, locale: String },
}

/// Raised once when an essential unit fails terminally. There is no
/// recovery strategy for this, so it escalates outside the deferred
/// protocol to the embedding application.
#[derive(Debug, Clone)]
pub struct FatalFailure {
    pub unit: UnitName,
    pub message: String,
}

#[derive(Default)]
struct LoadRequest {
    retries: u32,
    /// Units to evaluate immediately after this one, keeping dependents
    /// in-order even when bodies arrive out-of-order.
    chains: Vec<UnitName>,
}

struct PendingWait {
    remaining: HashSet<UnitName>,
    deferred: Deferred<()>,
}

enum Settlement {
    Fulfill(Deferred<()>),
    Fail(Deferred<()>, Failure),
}

#[derive(Default)]
struct LoaderState {
    locator_base: String,
    locale: String,
    catalog: UnitCatalog,
    configured: bool,
    /// Bodies delivered before `configure`, cached once it runs.
    pending_cacheables: HashMap<UnitName, String>,
    loading: HashMap<UnitName, LoadRequest>,
    /// Fetched but not yet activated bodies.
    available: HashMap<UnitName, String>,
    evaluated: HashSet<UnitName>,
    /// Terminal failures; cleared when the unit is requested again.
    recent_failures: HashMap<UnitName, Failure>,
    waits: Vec<PendingWait>,
    /// Deferred settlements queued while the state lock is held; applied
    /// only after it is released so handlers can re-enter the loader.
    settlements: Vec<Settlement>,
    sweep_running: bool,
}

pub struct CodeUnitLoader {
    fetcher: Arc<dyn UnitFetcher>,
    activator: Arc<dyn UnitActivator>,
    store: Option<Arc<dyn UnitStore>>,
    fatal: broadcast::Sender<FatalFailure>,
    retry_interval: Duration,
    max_retries: u32,
    inner: Mutex<LoaderState>,
}

impl CodeUnitLoader {
    pub fn new(
        fetcher: Arc<dyn UnitFetcher>,
        activator: Arc<dyn UnitActivator>,
        store: Option<Arc<dyn UnitStore>>,
    ) -> Arc<Self> {
        Self::with_tuning(fetcher, activator, store, RETRY_INTERVAL, MAX_RETRIES)
    }

    pub fn with_tuning(
        fetcher: Arc<dyn UnitFetcher>,
        activator: Arc<dyn UnitActivator>,
        store: Option<Arc<dyn UnitStore>>,
        retry_interval: Duration,
        max_retries: u32,
    ) -> Arc<Self> {
        let (fatal, _) = broadcast::channel(8);
        Arc::new(Self {
            fetcher,
            activator,
            store,
            fatal,
            retry_interval,
            max_retries,
            inner: Mutex::new(LoaderState::default()),
        })
    }

    pub fn subscribe_fatal(&self) -> broadcast::Receiver<FatalFailure> {
        self.fatal.subscribe()
    }

    /// Installs the unit catalog for the current deployment and purges any
    /// persistently cached body whose version tag no longer matches it, so
    /// stale code is never executed after a deployment.
    pub async fn configure(
        &self,
        locator_base: impl Into<String>,
        locale: impl Into<String>,
        catalog: UnitCatalog,
    ) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.locator_base = locator_base.into();
        state.locale = locale.into();
        state.catalog = catalog;
        state.configured = true;

        if let Some(store) = self.store.as_ref() {
            for (name, manifest) in &state.catalog {
                let unit_key = unit_key(name);
                let stored = match store.get(&unit_key).await {
                    Ok(value) => value,
                    Err(err) => return Err(err.into()),
                };
                let Some(stored_content_key) = stored else {
                    continue;
                };
                let expected = manifest
                    .resources
                    .get(&state.locale)
                    .map(|resource| content_key(resource));
                if expected.as_deref() != Some(stored_content_key.as_str()) {
                    debug!(unit = %name, "purging outdated cached unit");
                    store.remove(&stored_content_key).await?;
                    store.remove(&unit_key).await?;
                }
            }
        }

        let pending: Vec<(UnitName, String)> = state.pending_cacheables.drain().collect();
        for (name, body) in pending {
            self.cache_unit(&mut state, &name, &body).await?;
        }
        Ok(())
    }

    /// Loads one or more units.
    ///
    /// Units already evaluated are skipped; available or persistently
    /// cached bodies are activated immediately; everything else is fetched.
    /// Names already in flight join the existing request, so concurrent
    /// overlapping loads issue at most one fetch per unit. If nothing is
    /// left to wait for, the returned deferred is already fulfilled.
    pub async fn load(self: &Arc<Self>, names: &[UnitName]) -> Deferred<()> {
        let (deferred, settlements) = {
            let mut state = self.inner.lock().await;

            let mut requested: Vec<UnitName> = Vec::new();
            for name in names {
                if !requested.contains(name) {
                    requested.push(name.clone());
                }
            }

            for name in &requested {
                self.request_unit(&mut state, name.clone()).await;
            }

            let unresolved: HashSet<UnitName> = requested
                .iter()
                .filter(|name| !state.evaluated.contains(*name))
                .cloned()
                .collect();

            let deferred = if unresolved.is_empty() {
                Deferred::fulfilled(())
            } else {
                let deferred = Deferred::new();
                let failed_now = unresolved
                    .iter()
                    .find_map(|name| state.recent_failures.get(name).cloned());
                match failed_now {
                    Some(failure) => state
                        .settlements
                        .push(Settlement::Fail(deferred.clone(), failure)),
                    None => state.waits.push(PendingWait {
                        remaining: unresolved,
                        deferred: deferred.clone(),
                    }),
                }
                deferred
            };
            (deferred, std::mem::take(&mut state.settlements))
        };
        apply_settlements(settlements);
        deferred
    }

    pub async fn load_one(self: &Arc<Self>, name: impl Into<UnitName>) -> Deferred<()> {
        self.load(&[name.into()]).await
    }

    /// Reports a fetched unit body. If the unit was awaited it is activated
    /// (once its dependencies are evaluated), and the body is written to
    /// the persistent cache. A cache-capacity overflow is tolerated; other
    /// storage errors are returned.
    pub async fn notify_fetched(self: &Arc<Self>, name: &UnitName, body: &str) -> Result<()> {
        let (cache_result, settlements) = {
            let mut state = self.inner.lock().await;
            state.available.insert(name.clone(), body.to_string());
            if state.loading.contains_key(name) {
                self.evaluate_unit(&mut state, name.clone()).await;
            }
            let cache_result = self.cache_unit(&mut state, name, body).await;
            (cache_result, std::mem::take(&mut state.settlements))
        };
        apply_settlements(settlements);
        cache_result
    }

    /// Marks a unit as failed. For an essential unit this is fatal for the
    /// whole application; otherwise only the waits covering the unit are
    /// rejected and a later `load` may start over.
    pub async fn mark_failed(self: &Arc<Self>, name: &UnitName, error: anyhow::Error) {
        let settlements = {
            let mut state = self.inner.lock().await;
            self.fail_unit(&mut state, name, Arc::new(error));
            std::mem::take(&mut state.settlements)
        };
        apply_settlements(settlements);
    }

    pub async fn is_evaluated(&self, name: &UnitName) -> bool {
        self.inner.lock().await.evaluated.contains(name)
    }

    /// Number of fetches currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.inner.lock().await.loading.len()
    }

    pub async fn current_locale(&self) -> String {
        self.inner.lock().await.locale.clone()
    }

    /// Locator for a static resource shipped with a unit.
    pub async fn static_url(&self, unit: &UnitName, resource: &str) -> Option<String> {
        let state = self.inner.lock().await;
        let locator = state.catalog.get(unit)?.statics.get(resource)?;
        Some(format!("{}/{}", state.locator_base, locator))
    }

    /// The unit that provides a view, per the catalog.
    pub async fn unit_for_view(&self, view: &ViewName) -> Option<UnitName> {
        let state = self.inner.lock().await;
        state
            .catalog
            .iter()
            .find(|(_, manifest)| manifest.views.contains(view))
            .map(|(name, _)| name.clone())
    }

    /// Brings one unit into the load pipeline: evaluates it when its body
    /// is at hand (in memory or persistently cached), otherwise enqueues a
    /// fetch unless one is already in flight.
    fn request_unit<'a>(
        self: &'a Arc<Self>,
        state: &'a mut LoaderState,
        name: UnitName,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if state.evaluated.contains(&name) || state.loading.contains_key(&name) {
                return;
            }

            if state.available.contains_key(&name) {
                self.evaluate_unit(state, name).await;
                return;
            }

            if let Some(body) = self.cached_body(state, &name).await {
                debug!(unit = %name, "unit cache hit");
                state.available.insert(name.clone(), body);
                self.evaluate_unit(state, name).await;
                return;
            }

            state.recent_failures.remove(&name);
            let locator = match self.resource_locator(state, &name) {
                Ok(locator) => locator,
                Err(err) => {
                    self.fail_unit(state, &name, Arc::new(err.into()));
                    return;
                }
            };

            debug!(unit = %name, locator = %locator, "enqueueing fetch");
            self.fetcher.begin_fetch(&name, &locator);
            state.loading.insert(name, LoadRequest::default());
            self.ensure_sweep_task(state);
        })
    }

    /// Activates an available unit once every dependency is evaluated. A
    /// dependency still in flight registers this unit on its chain; one not
    /// even requested yet gets a best-effort fire-and-forget load.
    fn evaluate_unit<'a>(
        self: &'a Arc<Self>,
        state: &'a mut LoaderState,
        name: UnitName,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if state.evaluated.contains(&name) {
                return;
            }
            if !state.available.contains_key(&name) {
                self.fail_unit(state, &name, Arc::new(anyhow!("unit {name} is not available")));
                return;
            }

            let dependencies = match state.catalog.get(&name) {
                Some(manifest) => manifest.dependencies.clone(),
                None => {
                    self.fail_unit(
                        state,
                        &name,
                        Arc::new(CatalogError::UnknownUnit(name.clone()).into()),
                    );
                    return;
                }
            };

            let mut prerequisites_ready = true;
            for dependency in &dependencies {
                if state.evaluated.contains(dependency) {
                    continue;
                }
                if !state.loading.contains_key(dependency) {
                    // Best effort only; a failure here is not surfaced.
                    self.request_unit(state, dependency.clone()).await;
                }
                if let Some(request) = state.loading.get_mut(dependency) {
                    if !request.chains.contains(&name) {
                        request.chains.push(name.clone());
                    }
                    prerequisites_ready = false;
                } else if !state.evaluated.contains(dependency) {
                    // The prerequisite failed terminally; this unit stays
                    // available until somebody retries it.
                    prerequisites_ready = false;
                }
            }
            if !prerequisites_ready {
                return;
            }

            // A chained re-entry may have evaluated this unit meanwhile.
            let Some(body) = state.available.remove(&name) else {
                return;
            };
            match self.activator.activate(&name, &body) {
                Ok(()) => {
                    debug!(unit = %name, "unit activated");
                    self.enable_unit(state, name).await;
                }
                Err(err) => self.fail_unit(state, &name, Arc::new(err)),
            }
        })
    }

    /// Marks a unit evaluated, completes its chained dependents, and
    /// settles the waits whose unresolved set just emptied.
    fn enable_unit<'a>(
        self: &'a Arc<Self>,
        state: &'a mut LoaderState,
        name: UnitName,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            state.evaluated.insert(name.clone());

            let chained = state
                .loading
                .remove(&name)
                .map(|request| request.chains)
                .unwrap_or_default();
            for dependent in chained {
                self.evaluate_unit(state, dependent).await;
            }

            let mut index = 0;
            while index < state.waits.len() {
                state.waits[index].remaining.remove(&name);
                if state.waits[index].remaining.is_empty() {
                    let wait = state.waits.remove(index);
                    state.settlements.push(Settlement::Fulfill(wait.deferred));
                } else {
                    index += 1;
                }
            }
        })
    }

    fn fail_unit(&self, state: &mut LoaderState, name: &UnitName, failure: Failure) {
        let essential = state
            .catalog
            .get(name)
            .map(|manifest| manifest.essential)
            .unwrap_or(false);

        if essential {
            error!(unit = %name, error = %failure, "essential unit failed; giving up");
            state.loading.clear();
            let _ = self.fatal.send(FatalFailure {
                unit: name.clone(),
                message: failure.to_string(),
            });
            return;
        }

        warn!(unit = %name, error = %failure, "unit failed");
        state.loading.remove(name);
        state.available.remove(name);
        state.recent_failures.insert(name.clone(), failure.clone());

        let mut index = 0;
        while index < state.waits.len() {
            if state.waits[index].remaining.contains(name) {
                let wait = state.waits.remove(index);
                state
                    .settlements
                    .push(Settlement::Fail(wait.deferred, failure.clone()));
            } else {
                index += 1;
            }
        }
    }

    async fn cached_body(&self, state: &LoaderState, name: &UnitName) -> Option<String> {
        let store = self.store.as_ref()?;
        let content_key = match store.get(&unit_key(name)).await {
            Ok(value) => value?,
            Err(err) => {
                warn!(unit = %name, error = %err, "unit cache read failed");
                return None;
            }
        };
        match store.get(&content_key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(unit = %name, error = %err, "unit cache read failed");
                None
            }
        }
    }

    async fn cache_unit(&self, state: &mut LoaderState, name: &UnitName, body: &str) -> Result<()> {
        if !state.configured {
            state.pending_cacheables.insert(name.clone(), body.to_string());
            return Ok(());
        }
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        let Some(resource) = state
            .catalog
            .get(name)
            .and_then(|manifest| manifest.resources.get(&state.locale))
            .cloned()
        else {
            return Ok(());
        };

        let content_key = content_key(&resource);
        let write = async {
            store.set(&unit_key(name), &content_key).await?;
            store.set(&content_key, body).await?;
            Ok::<(), StoreError>(())
        };
        match write.await {
            Ok(()) => Ok(()),
            Err(StoreError::CapacityExceeded) => {
                debug!(unit = %name, "unit cache full, body not persisted");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn resource_locator(
        &self,
        state: &LoaderState,
        name: &UnitName,
    ) -> Result<String, CatalogError> {
        let Some(manifest) = state.catalog.get(name) else {
            return Err(CatalogError::UnknownUnit(name.clone()));
        };
        let Some(resource) = manifest.resources.get(&state.locale) else {
            return Err(CatalogError::MissingLocaleResource {
                unit: name.clone(),
                locale: state.locale.clone(),
            });
        };
        Ok(format!("{}/{}", state.locator_base, resource))
    }

    fn ensure_sweep_task(self: &Arc<Self>, state: &mut LoaderState) {
        if state.sweep_running {
            return;
        }
        state.sweep_running = true;

        let loader = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(loader.retry_interval);
            ticker.tick().await; // the first tick completes immediately

            loop {
                ticker.tick().await;
                let (settlements, done) = {
                    let mut state = loader.inner.lock().await;
                    loader.sweep_loading(&mut state);
                    let done = state.loading.is_empty();
                    if done {
                        state.sweep_running = false;
                    }
                    (std::mem::take(&mut state.settlements), done)
                };
                apply_settlements(settlements);
                if done {
                    debug!("retry sweep stopped");
                    break;
                }
            }
        });
    }

    /// Re-issues the fetch for every unit still loading, failing those that
    /// exhausted their attempts.
    fn sweep_loading(&self, state: &mut LoaderState) {
        let names: Vec<UnitName> = state.loading.keys().cloned().collect();
        for name in names {
            let Some(retries) = state.loading.get(&name).map(|request| request.retries) else {
                continue;
            };
            if retries < self.max_retries {
                match self.resource_locator(state, &name) {
                    Ok(locator) => {
                        debug!(unit = %name, retry = retries + 1, "re-issuing fetch");
                        self.fetcher.begin_fetch(&name, &locator);
                        if let Some(request) = state.loading.get_mut(&name) {
                            request.retries += 1;
                        }
                    }
                    Err(err) => self.fail_unit(state, &name, Arc::new(err.into())),
                }
            } else {
                self.fail_unit(
                    state,
                    &name,
                    Arc::new(anyhow!(
                        "unit {name} not loaded after {} attempts",
                        retries + 1
                    )),
                );
            }
        }
    }
}

fn apply_settlements(settlements: Vec<Settlement>) {
    for settlement in settlements {
        let result = match settlement {
            Settlement::Fulfill(deferred) => deferred.fulfill(()),
            Settlement::Fail(deferred, failure) => deferred.fail_shared(failure),
        };
        if let Err(err) = result {
            debug!(error = %err, "wait was already settled");
        }
    }
}

fn unit_key(name: &UnitName) -> String {
    format!("uk.{name}")
}

fn content_key(resource: &str) -> String {
    format!("uck.{resource}")
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
