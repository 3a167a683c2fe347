//! Scripted walk through the runtime core: loads units over a loopback
//! "network", shows and stacks views, navigates back, and leaves a warm
//! persistent cache behind for the next run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use loader::{CodeUnitLoader, UnitActivator, UnitCatalog, UnitFetcher, UnitManifest};
use navigation::HistoryMechanism;
use serde_json::json;
use shared::domain::{HostHandle, LocationToken, UnitName, ViewName};
use shell_core::{
    load_settings, ContainerBehavior, DefaultBehavior, TransitionContext, View, ViewOrchestrator,
    ViewRegistry, ViewSpec,
};
use storage::{SqliteUnitStore, UnitStore};
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides the configured locale.
    #[arg(long)]
    locale: Option<String>,
    #[arg(long, default_value = "sqlite://./data/unit_cache.db")]
    database_url: String,
}

/// Answers every fetch from a canned body table, through the same
/// notify/mark callbacks a real transport would use.
struct LoopbackFetcher {
    loader: OnceLock<Arc<CodeUnitLoader>>,
    bodies: HashMap<UnitName, String>,
}

impl UnitFetcher for LoopbackFetcher {
    fn begin_fetch(&self, name: &UnitName, locator: &str) {
        info!(unit = %name, locator, "fetching unit");
        let Some(loader) = self.loader.get().cloned() else {
            return;
        };
        let name = name.clone();
        let body = self.bodies.get(&name).cloned();
        tokio::spawn(async move {
            match body {
                Some(body) => {
                    if let Err(err) = loader.notify_fetched(&name, &body).await {
                        info!(unit = %name, error = %err, "fetch delivery failed");
                    }
                }
                None => {
                    loader
                        .mark_failed(&name, anyhow::anyhow!("no such resource"))
                        .await
                }
            }
        });
    }
}

/// Unit activation registers the views each unit provides.
struct DemoActivator {
    registry: Arc<ViewRegistry>,
}

impl UnitActivator for DemoActivator {
    fn activate(&self, name: &UnitName, body: &str) -> Result<()> {
        info!(unit = %name, bytes = body.len(), "activating unit");
        let views: &[&str] = match name.as_str() {
            "core" => &["HomeView"],
            "listing" => &["ListingView", "ComposeView"],
            _ => &[],
        };
        for view in views {
            let view_name = view.to_string();
            self.registry.register(
                *view,
                ViewSpec::new(move |mount, params, _data| {
                    Box::new(DemoView {
                        name: view_name.clone(),
                        mount,
                        params: params.clone(),
                    })
                }),
            );
        }
        Ok(())
    }
}

struct DemoView {
    name: String,
    mount: HostHandle,
    params: serde_json::Value,
}

impl View for DemoView {
    fn realize(&mut self) {
        info!(view = %self.name, mount = self.mount.0, params = %self.params, "realized");
    }

    fn activate(&mut self, transition: &TransitionContext) {
        info!(view = %self.name, direction = ?transition.direction, "activated");
    }

    fn title(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

/// In-process stand-in for the host's history mechanism.
struct LocalMechanism {
    current: Mutex<Option<LocationToken>>,
}

impl HistoryMechanism for LocalMechanism {
    fn current_token(&self) -> Option<LocationToken> {
        self.current.lock().expect("current lock").clone()
    }

    fn navigate_to(&self, token: &LocationToken) {
        *self.current.lock().expect("current lock") = Some(token.clone());
    }

    fn back(&self) {}

    fn go(&self, _delta: i64) {}

    fn precise_traversal(&self) -> bool {
        false
    }
}

fn demo_catalog() -> UnitCatalog {
    let mut core = UnitManifest::for_locale("en_US", "core_v1.js");
    core.essential = true;
    core.views = vec![ViewName::from("HomeView")];
    let mut listing = UnitManifest::for_locale("en_US", "listing_v1.js");
    listing.dependencies = vec![UnitName::from("core")];
    listing.views = vec![ViewName::from("ListingView"), ViewName::from("ComposeView")];
    [
        (UnitName::from("core"), core),
        (UnitName::from("listing"), listing),
    ]
    .into_iter()
    .collect()
}

async fn settle(orchestrator: &Arc<ViewOrchestrator>) -> Result<()> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    orchestrator.handle_location_change().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(locale) = args.locale {
        settings.locale = locale;
    }

    let store = Arc::new(SqliteUnitStore::new(&args.database_url).await?);
    let registry = ViewRegistry::new();

    let fetcher = Arc::new(LoopbackFetcher {
        loader: OnceLock::new(),
        bodies: HashMap::from([
            (UnitName::from("core"), "core unit body".to_string()),
            (UnitName::from("listing"), "listing unit body".to_string()),
        ]),
    });
    let activator = Arc::new(DemoActivator {
        registry: Arc::clone(&registry),
    });
    let loader = CodeUnitLoader::with_tuning(
        Arc::clone(&fetcher) as Arc<dyn UnitFetcher>,
        activator,
        Some(Arc::clone(&store) as Arc<dyn UnitStore>),
        settings.retry_interval(),
        settings.max_retries,
    );
    let _ = fetcher.loader.set(Arc::clone(&loader));
    loader
        .configure("https://static.example", &settings.locale, demo_catalog())
        .await?;

    let mut fatal = loader.subscribe_fatal();
    tokio::spawn(async move {
        if let Ok(failure) = fatal.recv().await {
            eprintln!(
                "unrecoverable: unit {} could not be loaded: {}",
                failure.unit, failure.message
            );
            std::process::exit(1);
        }
    });

    let orchestrator = ViewOrchestrator::new(
        Arc::clone(&loader),
        registry,
        Arc::new(LocalMechanism {
            current: Mutex::new(None),
        }) as Arc<dyn HistoryMechanism>,
        &settings,
    );
    orchestrator
        .add_container(
            "main",
            HostHandle::fresh(),
            true,
            Arc::new(DefaultBehavior) as Arc<dyn ContainerBehavior>,
            None,
        )
        .await?;

    println!("Showing HomeView (loads the core unit on first run)...");
    orchestrator
        .show_view(None, ViewName::from("HomeView"), json!({}), None)
        .await?;
    settle(&orchestrator).await?;

    println!("Showing ListingView id=42 (loads the listing unit)...");
    orchestrator
        .show_view(
            None,
            ViewName::from("ListingView"),
            json!({ "id": "42" }),
            Some(json!({ "rows": ["bike", "lamp", "couch"] })),
        )
        .await?;
    settle(&orchestrator).await?;

    println!("Pushing ComposeView as a modal...");
    let dismissal = orchestrator
        .push_modal_view(ViewName::from("ComposeView"), json!({}), None)
        .await?;
    settle(&orchestrator).await?;
    dismissal.on_success(|_view| {
        println!("Modal dismissed; its instance was reused from the cache.");
        Ok(())
    });
    println!("Modal level: {}", orchestrator.modal_level().await);

    println!("Navigating back...");
    let back_done = orchestrator.back().await;
    settle(&orchestrator).await?;
    println!(
        "Back processed (deferred state: {:?}), modal level: {}",
        back_done.state(),
        orchestrator.modal_level().await
    );
    println!("Can go back further: {}", orchestrator.can_go_back());

    println!(
        "Persistent cache now holds {} bytes; re-run to boot without fetches.",
        store.total_bytes().await?
    );
    Ok(())
}
