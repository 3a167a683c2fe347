use super::*;

use std::sync::Mutex as StdMutex;

use deferred::State;
use storage::MemoryUnitStore;

struct RecordingFetcher {
    fetches: StdMutex<Vec<(UnitName, String)>>,
}

impl RecordingFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fetches: StdMutex::new(Vec::new()),
        })
    }

    fn total(&self) -> usize {
        self.fetches.lock().expect("fetches lock").len()
    }

    fn count_for(&self, name: &str) -> usize {
        self.fetches
            .lock()
            .expect("fetches lock")
            .iter()
            .filter(|(unit, _)| unit.as_str() == name)
            .count()
    }
}

impl UnitFetcher for RecordingFetcher {
    fn begin_fetch(&self, name: &UnitName, locator: &str) {
        self.fetches
            .lock()
            .expect("fetches lock")
            .push((name.clone(), locator.to_string()));
    }
}

struct RecordingActivator {
    activated: StdMutex<Vec<UnitName>>,
    fail_for: Option<UnitName>,
}

impl RecordingActivator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            activated: StdMutex::new(Vec::new()),
            fail_for: None,
        })
    }

    fn failing_for(name: &str) -> Arc<Self> {
        Arc::new(Self {
            activated: StdMutex::new(Vec::new()),
            fail_for: Some(UnitName::from(name)),
        })
    }

    fn activated(&self) -> Vec<UnitName> {
        self.activated.lock().expect("activated lock").clone()
    }
}

impl UnitActivator for RecordingActivator {
    fn activate(&self, name: &UnitName, _body: &str) -> Result<()> {
        if self.fail_for.as_ref() == Some(name) {
            return Err(anyhow!("activation refused for {name}"));
        }
        self.activated.lock().expect("activated lock").push(name.clone());
        Ok(())
    }
}

fn manifest(resource: &str) -> UnitManifest {
    UnitManifest::for_locale("en_US", resource)
}

fn catalog(entries: Vec<(&str, UnitManifest)>) -> UnitCatalog {
    entries
        .into_iter()
        .map(|(name, manifest)| (UnitName::from(name), manifest))
        .collect()
}

async fn configured_loader(
    fetcher: Arc<RecordingFetcher>,
    activator: Arc<RecordingActivator>,
    store: Option<Arc<dyn UnitStore>>,
    entries: Vec<(&str, UnitManifest)>,
) -> Arc<CodeUnitLoader> {
    let loader = CodeUnitLoader::new(fetcher, activator, store);
    loader
        .configure("https://static.example", "en_US", catalog(entries))
        .await
        .expect("configure");
    loader
}

#[tokio::test]
async fn a_fetched_unit_evaluates_and_later_loads_skip_the_fetch() {
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let loader = configured_loader(
        Arc::clone(&fetcher),
        Arc::clone(&activator),
        None,
        vec![("search", manifest("search_v1.js"))],
    )
    .await;

    let name = UnitName::from("search");
    let first = loader.load_one("search").await;
    assert_eq!(first.state(), State::Unattached);
    assert_eq!(fetcher.total(), 1);

    loader.notify_fetched(&name, "unit body").await.expect("fetched");
    assert_eq!(first.state(), State::Fulfilled);
    assert!(loader.is_evaluated(&name).await);

    let again = loader.load_one("search").await;
    assert_eq!(again.state(), State::Fulfilled);
    assert_eq!(fetcher.total(), 1, "no second fetch for an evaluated unit");
}

#[tokio::test]
async fn overlapping_loads_share_one_in_flight_fetch() {
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let loader = configured_loader(
        Arc::clone(&fetcher),
        activator,
        None,
        vec![("search", manifest("search_v1.js"))],
    )
    .await;

    let name = UnitName::from("search");
    let first = loader.load_one("search").await;
    let second = loader.load_one("search").await;
    assert_eq!(fetcher.count_for("search"), 1);
    assert_eq!(loader.in_flight().await, 1);

    loader.notify_fetched(&name, "unit body").await.expect("fetched");
    assert_eq!(first.state(), State::Fulfilled);
    assert_eq!(second.state(), State::Fulfilled);
}

#[tokio::test]
async fn missing_locale_resource_rejects_a_non_essential_load() {
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let loader = configured_loader(
        Arc::clone(&fetcher),
        activator,
        None,
        vec![("chat", UnitManifest::for_locale("nl_NL", "chat_nl.js"))],
    )
    .await;

    let deferred = loader.load_one("chat").await;
    assert_eq!(deferred.state(), State::Failed);
    assert_eq!(fetcher.total(), 0);
}

#[tokio::test]
async fn missing_locale_resource_on_an_essential_unit_is_fatal() {
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let mut essential = UnitManifest::for_locale("nl_NL", "boot_nl.js");
    essential.essential = true;
    let loader = configured_loader(
        Arc::clone(&fetcher),
        activator,
        None,
        vec![("boot", essential)],
    )
    .await;
    let mut fatal = loader.subscribe_fatal();

    let deferred = loader.load_one("boot").await;
    // Essential failure escalates outside the deferred protocol.
    assert_eq!(deferred.state(), State::Unattached);

    let failure = fatal.try_recv().expect("fatal signal");
    assert_eq!(failure.unit.as_str(), "boot");
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded_and_then_terminal() {
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let loader = CodeUnitLoader::with_tuning(
        Arc::clone(&fetcher) as Arc<dyn UnitFetcher>,
        activator,
        None,
        Duration::from_millis(100),
        3,
    );
    loader
        .configure(
            "https://static.example",
            "en_US",
            catalog(vec![("search", manifest("search_v1.js"))]),
        )
        .await
        .expect("configure");

    let deferred = loader.load_one("search").await;
    assert_eq!(fetcher.total(), 1);

    // Sweeps at 100/200/300 re-issue the fetch, the fourth one gives up.
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(deferred.state(), State::Failed);
    assert_eq!(fetcher.total(), 4);
    assert_eq!(loader.in_flight().await, 0);

    // No further fetch once the unit failed terminally.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(fetcher.total(), 4);
}

#[tokio::test]
async fn dependencies_evaluate_before_their_dependents() {
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let mut listing = manifest("listing_v1.js");
    listing.dependencies = vec![UnitName::from("core")];
    let loader = configured_loader(
        Arc::clone(&fetcher),
        Arc::clone(&activator),
        None,
        vec![("core", manifest("core_v1.js")), ("listing", listing)],
    )
    .await;

    let deferred = loader.load_one("listing").await;
    assert_eq!(fetcher.count_for("listing"), 1);
    assert_eq!(fetcher.count_for("core"), 0);

    // The dependent arrives first; its prerequisite is auto-requested and
    // the dependent chains behind it.
    loader
        .notify_fetched(&UnitName::from("listing"), "listing body")
        .await
        .expect("fetched listing");
    assert_eq!(deferred.state(), State::Unattached);
    assert_eq!(fetcher.count_for("core"), 1);

    loader
        .notify_fetched(&UnitName::from("core"), "core body")
        .await
        .expect("fetched core");
    assert_eq!(deferred.state(), State::Fulfilled);
    assert_eq!(
        activator.activated(),
        vec![UnitName::from("core"), UnitName::from("listing")]
    );
}

#[tokio::test]
async fn fetched_bodies_are_persisted_and_reused_across_loaders() {
    let store: Arc<MemoryUnitStore> = Arc::new(MemoryUnitStore::new());
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let loader = configured_loader(
        Arc::clone(&fetcher),
        activator,
        Some(Arc::clone(&store) as Arc<dyn UnitStore>),
        vec![("search", manifest("search_v1.js"))],
    )
    .await;

    loader
        .notify_fetched(&UnitName::from("search"), "unit body")
        .await
        .expect("fetched");
    assert_eq!(store.len(), 2, "unit key and content key are both written");

    // A fresh loader over the same store materializes the cached body
    // without fetching.
    let second_fetcher = RecordingFetcher::new();
    let second_activator = RecordingActivator::new();
    let second = configured_loader(
        Arc::clone(&second_fetcher),
        Arc::clone(&second_activator),
        Some(store as Arc<dyn UnitStore>),
        vec![("search", manifest("search_v1.js"))],
    )
    .await;

    let deferred = second.load_one("search").await;
    assert_eq!(deferred.state(), State::Fulfilled);
    assert_eq!(second_fetcher.total(), 0);
    assert_eq!(second_activator.activated(), vec![UnitName::from("search")]);
}

#[tokio::test]
async fn configure_purges_cache_entries_from_older_deployments() {
    let store: Arc<MemoryUnitStore> = Arc::new(MemoryUnitStore::new());
    store
        .set("uk.search", "uck.search_v1.js")
        .await
        .expect("seed unit key");
    store
        .set("uck.search_v1.js", "stale body")
        .await
        .expect("seed content");

    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let loader = configured_loader(
        Arc::clone(&fetcher),
        activator,
        Some(Arc::clone(&store) as Arc<dyn UnitStore>),
        vec![("search", manifest("search_v2.js"))],
    )
    .await;
    assert!(store.is_empty(), "stale entries are purged before use");

    let deferred = loader.load_one("search").await;
    assert_eq!(deferred.state(), State::Unattached);
    assert_eq!(fetcher.total(), 1, "purged unit is fetched again");
}

#[tokio::test]
async fn cache_capacity_overflow_is_swallowed() {
    let store: Arc<MemoryUnitStore> = Arc::new(MemoryUnitStore::with_capacity(4));
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let loader = configured_loader(
        fetcher,
        Arc::clone(&activator),
        Some(store as Arc<dyn UnitStore>),
        vec![("search", manifest("search_v1.js"))],
    )
    .await;

    let deferred = loader.load_one("search").await;
    loader
        .notify_fetched(&UnitName::from("search"), "a body far larger than the quota")
        .await
        .expect("capacity overflow must not fail the fetch path");
    assert_eq!(deferred.state(), State::Fulfilled);
    assert_eq!(activator.activated(), vec![UnitName::from("search")]);
}

#[tokio::test]
async fn failure_rejects_only_the_waits_covering_the_unit() {
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let loader = configured_loader(
        fetcher,
        activator,
        None,
        vec![("a", manifest("a_v1.js")), ("b", manifest("b_v1.js"))],
    )
    .await;

    let both = loader.load(&[UnitName::from("a"), UnitName::from("b")]).await;
    let only_b = loader.load_one("b").await;

    loader
        .mark_failed(&UnitName::from("a"), anyhow!("network said no"))
        .await;
    assert_eq!(both.state(), State::Failed);
    assert_eq!(only_b.state(), State::Unattached);

    loader
        .notify_fetched(&UnitName::from("b"), "b body")
        .await
        .expect("fetched b");
    assert_eq!(only_b.state(), State::Fulfilled);
}

#[tokio::test]
async fn essential_failure_clears_all_in_flight_requests() {
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let mut boot = manifest("boot_v1.js");
    boot.essential = true;
    let loader = configured_loader(
        Arc::clone(&fetcher),
        activator,
        None,
        vec![("boot", boot), ("extra", manifest("extra_v1.js"))],
    )
    .await;
    let mut fatal = loader.subscribe_fatal();

    let deferred = loader.load(&[UnitName::from("boot"), UnitName::from("extra")]).await;
    assert_eq!(loader.in_flight().await, 2);

    loader
        .mark_failed(&UnitName::from("boot"), anyhow!("boot body rejected"))
        .await;
    let failure = fatal.try_recv().expect("fatal signal");
    assert_eq!(failure.unit.as_str(), "boot");
    assert_eq!(loader.in_flight().await, 0);
    // No deferred ever rejects for the essential path.
    assert_eq!(deferred.state(), State::Unattached);
}

#[tokio::test]
async fn a_terminally_failed_unit_can_be_loaded_again() {
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let loader = configured_loader(
        Arc::clone(&fetcher),
        activator,
        None,
        vec![("search", manifest("search_v1.js"))],
    )
    .await;

    let first = loader.load_one("search").await;
    loader
        .mark_failed(&UnitName::from("search"), anyhow!("gone"))
        .await;
    assert_eq!(first.state(), State::Failed);

    let second = loader.load_one("search").await;
    assert_eq!(second.state(), State::Unattached);
    assert_eq!(fetcher.total(), 2, "a later load starts over");

    loader
        .notify_fetched(&UnitName::from("search"), "unit body")
        .await
        .expect("fetched");
    assert_eq!(second.state(), State::Fulfilled);
}

#[tokio::test]
async fn failed_activation_rejects_the_wait() {
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::failing_for("search");
    let loader = configured_loader(
        fetcher,
        activator,
        None,
        vec![("search", manifest("search_v1.js"))],
    )
    .await;

    let deferred = loader.load_one("search").await;
    loader
        .notify_fetched(&UnitName::from("search"), "unit body")
        .await
        .expect("fetched");
    assert_eq!(deferred.state(), State::Failed);
}

#[tokio::test]
async fn unit_metadata_lookups() {
    let fetcher = RecordingFetcher::new();
    let activator = RecordingActivator::new();
    let mut listing = manifest("listing_v1.js");
    listing.views = vec![ViewName::from("ListingView")];
    listing
        .statics
        .insert("logo".to_string(), "img/logo_v3.png".to_string());
    let loader = configured_loader(fetcher, activator, None, vec![("listing", listing)]).await;

    assert_eq!(loader.current_locale().await, "en_US");
    assert_eq!(
        loader.unit_for_view(&ViewName::from("ListingView")).await,
        Some(UnitName::from("listing"))
    );
    assert_eq!(loader.unit_for_view(&ViewName::from("Unknown")).await, None);
    assert_eq!(
        loader
            .static_url(&UnitName::from("listing"), "logo")
            .await
            .as_deref(),
        Some("https://static.example/img/logo_v3.png")
    );
}
