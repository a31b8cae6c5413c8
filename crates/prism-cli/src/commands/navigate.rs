use super::CommandContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use prism_navigation::{NavigationEngine, NavigationOptions, NavigationParameters, NavigationResult, PageBehaviors, PageLifecycle};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const GO_BACK: &str = ":back";
const GO_BACK_TO_ROOT: &str = ":root";

type Journal = Arc<Mutex<Vec<String>>>;

/// Page that writes every lifecycle call to the journal
struct JournalPage {
    name: String,
    journal: Journal,
}

impl JournalPage {
    fn record(&self, event: &str) {
        self.journal.lock().push(format!("{} {event}", self.name));
    }
}

#[async_trait]
impl PageLifecycle for JournalPage {
    async fn can_navigate(&self, _parameters: &NavigationParameters) -> bool {
        self.record("confirm navigation");
        true
    }

    async fn initialize(&self, parameters: &NavigationParameters) -> anyhow::Result<()> {
        if parameters.is_empty() {
            self.record("initialize");
        } else {
            self.record(&format!("initialize ({parameters})"));
        }
        Ok(())
    }

    fn on_navigated_from(&self, _parameters: &NavigationParameters) {
        self.record("navigated from");
    }

    fn on_navigated_to(&self, parameters: &NavigationParameters) {
        self.record(&format!("navigated to ({:?})", parameters.mode()));
    }

    fn destroy(&self) {
        self.record("destroy");
    }
}

pub async fn run_navigation(ctx: &CommandContext, pages: Option<&Path>, uris: &[String]) -> Result<()> {
    let journal = Journal::default();
    let engine = build_engine(ctx, pages, journal.clone())?;

    for uri in uris {
        let result = apply(&engine, uri).await;
        println!("{uri}");
        for event in journal.lock().drain(..) {
            println!("  {event}");
        }
        match result.error() {
            None => println!("  -> ok"),
            Some(error) => println!("  -> failed: {error}"),
        }
    }

    println!();
    print!("{}", engine.render());
    Ok(())
}

/// Engine over the given definitions file, or the configured one
fn build_engine(ctx: &CommandContext, pages: Option<&Path>, journal: Journal) -> Result<NavigationEngine> {
    let options = match pages {
        Some(pages) => NavigationOptions {
            pages: Some(pages.to_path_buf()),
        },
        None => ctx.config.navigation.clone(),
    };
    let Some(path) = options.pages.clone() else {
        anyhow::bail!("no page definitions given; pass --pages or set navigation.pages in the config");
    };
    let registry = options
        .registry()
        .with_context(|| format!("loading page definitions from {}", path.display()))?
        .with_default_behaviors(move |name| {
            PageBehaviors::new(Arc::new(JournalPage {
                name: name.to_string(),
                journal: journal.clone(),
            }))
        });
    info!(pages = %path.display(), "Page definitions loaded");
    Ok(NavigationEngine::new(Arc::new(registry)))
}

async fn apply(engine: &NavigationEngine, uri: &str) -> NavigationResult {
    match uri {
        GO_BACK => engine.go_back(NavigationParameters::new()).await,
        GO_BACK_TO_ROOT => engine.go_back_to_root(NavigationParameters::new()).await,
        _ => engine.navigate(uri, NavigationParameters::new()).await,
    }
}
