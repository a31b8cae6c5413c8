use super::CommandContext;
use crate::ModuleCommands;
use anyhow::{Context, Result};
use async_trait::async_trait;
use prism_modularity::{
    FileModuleTypeLoader, LoadModuleCompleted, ManifestCatalogSource, ModularityError, Module, ModuleCatalog, ModuleContext, ModuleDownloadProgressChanged, ModuleFactory,
    ModuleId, ModuleInfo, ModuleLoadError, ModuleManager, ModuleTypeRegistry, ModuleTypeResolver,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub async fn handle_module_command(ctx: &CommandContext, command: ModuleCommands) -> Result<()> {
    match command {
        ModuleCommands::Validate { manifest } => validate_catalog(ctx, manifest.as_deref()),
        ModuleCommands::Order { manifest, modules } => show_order(ctx, manifest.as_deref(), &modules),
        ModuleCommands::Run { manifest, load } => run_modules(ctx, manifest.as_deref(), &load).await,
    }
}

fn open_catalog(ctx: &CommandContext, manifest: Option<&Path>) -> ModuleCatalog {
    match manifest {
        Some(path) => ModuleCatalog::with_source(ManifestCatalogSource::new(path)),
        None => ctx.config.modularity.catalog(),
    }
}

/// Directory relative `file://` locations are resolved against
fn package_dir(ctx: &CommandContext, manifest: Option<&Path>) -> Option<PathBuf> {
    let options = &ctx.config.modularity;
    match manifest.or(options.manifest.as_deref()) {
        Some(manifest) => manifest.parent().map(Path::to_path_buf),
        None => options.module_directory.clone(),
    }
}

fn validate_catalog(ctx: &CommandContext, manifest: Option<&Path>) -> Result<()> {
    let mut catalog = open_catalog(ctx, manifest);
    catalog.initialize().context("module catalog is invalid")?;

    println!("Module catalog is valid");
    println!("  Modules: {}", catalog.len());
    println!("  Groups: {}", catalog.groups().len());
    Ok(())
}

fn show_order(ctx: &CommandContext, manifest: Option<&Path>, modules: &[String]) -> Result<()> {
    let mut catalog = open_catalog(ctx, manifest);
    catalog.initialize().context("module catalog is invalid")?;

    let requested = if modules.is_empty() {
        catalog.module_ids()
    } else {
        modules.iter().map(|name| find_unique(&catalog, name)).collect::<Result<Vec<_>, _>>()?
    };
    let ordered = catalog.complete_list_with_dependencies(&requested)?;

    println!("Module load order");
    println!("=================");
    for (index, id) in ordered.iter().enumerate() {
        if let Some(module) = catalog.module(*id) {
            println!("{:>3}. {} ({})", index + 1, module.name(), module.module_type());
        }
    }
    Ok(())
}

fn find_unique(catalog: &ModuleCatalog, name: &str) -> Result<ModuleId, ModularityError> {
    match catalog.find_all(name).as_slice() {
        [id] => Ok(*id),
        matches => Err(ModularityError::ModuleNotFound {
            module: name.to_string(),
            matches: matches.len(),
        }),
    }
}

async fn run_modules(ctx: &CommandContext, manifest: Option<&Path>, load: &[String]) -> Result<()> {
    let (manager, failures) = start_modules(ctx, manifest, load).await?;

    println!("Module states");
    println!("=============");
    for module in manager.modules() {
        println!("  {:<24} {}", module.name(), module.state());
    }
    manager.dispose();

    if !failures.is_empty() {
        anyhow::bail!("{} module load(s) failed", failures.len());
    }
    Ok(())
}

/// Runs the manager over the catalog, then loads each module in `load`.
/// Returns the manager once idle along with the failures it reported.
pub async fn start_modules(ctx: &CommandContext, manifest: Option<&Path>, load: &[String]) -> Result<(ModuleManager, Vec<ModularityError>)> {
    let registry = Arc::new(ModuleTypeRegistry::new());
    let mut loader = FileModuleTypeLoader::new(Arc::new(PackageTypeResolver::new(registry.clone())));
    if let Some(dir) = package_dir(ctx, manifest) {
        loader = loader.with_base_dir(dir);
    }

    let manager = ModuleManager::builder(open_catalog(ctx, manifest), registry)
        .with_loader(Arc::new(loader))
        .with_options(ctx.config.modularity.clone())
        .build();
    manager.subscribe::<ModuleDownloadProgressChanged>(Arc::new(|event: &ModuleDownloadProgressChanged| {
        debug!(module = %event.module, progress = event.progress_percentage(), "Module package progress");
    }));
    manager.subscribe::<LoadModuleCompleted>(Arc::new(|event: &LoadModuleCompleted| {
        if let Some(error) = event.error() {
            warn!(module = event.module(), %error, "Module failed to load");
        }
    }));

    let mut failures = Vec::new();
    manager.run().context("starting modules")?;
    if let Err(failure) = manager.wait_for_idle().await {
        error!(%failure, "Module startup failed");
        failures.push(failure);
    }

    for name in load {
        manager.load_module(name).with_context(|| format!("loading module {name}"))?;
        if let Err(failure) = manager.wait_for_idle().await {
            error!(module = %name, %failure, "Module load failed");
            failures.push(failure);
        }
    }
    Ok((manager, failures))
}

/// `types` listed by a module package file
#[derive(Debug, Default, Deserialize)]
struct PackageManifest {
    #[serde(default)]
    types: Vec<String>,
}

/// Registers the module types a package file lists
pub struct PackageTypeResolver {
    registry: Arc<ModuleTypeRegistry>,
}

impl PackageTypeResolver {
    pub fn new(registry: Arc<ModuleTypeRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ModuleTypeResolver for PackageTypeResolver {
    async fn resolve(&self, module: &ModuleInfo, package: &Path) -> Result<(), ModuleLoadError> {
        let content = tokio::fs::read_to_string(package).await.map_err(|source| ModuleLoadError::Io {
            path: package.to_path_buf(),
            source,
        })?;
        let manifest: PackageManifest = toml::from_str(&content).map_err(|e| anyhow::anyhow!("{}: {e}", package.display()))?;

        for module_type in manifest.types {
            let registered = module_type.clone();
            self.registry.register(module_type, move || {
                Ok(Box::new(ReportingModule {
                    module_type: registered.clone(),
                }) as Box<dyn Module>)
            });
        }

        if !self.registry.is_available(module.module_type()) {
            return Err(anyhow::anyhow!("package {} does not provide module type {}", package.display(), module.module_type()).into());
        }
        Ok(())
    }
}

/// Module that only reports its initialization
struct ReportingModule {
    module_type: String,
}

impl Module for ReportingModule {
    fn initialize(&self, context: &ModuleContext) -> anyhow::Result<()> {
        info!(module = context.module_name(), module_type = %self.module_type, "Module initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrismConfig;
    use prism_modularity::ModuleState;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const MANIFEST: &str = r#"
[[modules]]
name = "Core"
type = "CoreModule"
location = "file://core.pkg"

[[modules]]
name = "Reports"
type = "ReportsModule"
location = "file://core.pkg"
initialization_mode = "on_demand"
depends_on = ["Core"]
"#;

    #[tokio::test]
    async fn test_run_loads_packages_and_on_demand_modules() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "core.pkg", "types = [\"CoreModule\", \"ReportsModule\"]\n");
        let manifest = write(dir.path(), "modules.toml", MANIFEST);
        let ctx = CommandContext::new(PrismConfig::default());

        let (manager, failures) = start_modules(&ctx, Some(&manifest), &[]).await.unwrap();
        assert!(failures.is_empty());
        assert_eq!(manager.module_state("Core"), Some(ModuleState::Initialized));
        assert_eq!(manager.module_state("Reports"), Some(ModuleState::NotStarted));

        let (manager, failures) = start_modules(&ctx, Some(&manifest), &["Reports".to_string()]).await.unwrap();
        assert!(failures.is_empty());
        assert_eq!(manager.module_state("Reports"), Some(ModuleState::Initialized));
    }

    #[tokio::test]
    async fn test_package_without_the_module_type_fails() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "core.pkg", "types = [\"OtherModule\"]\n");
        let manifest = write(dir.path(), "modules.toml", MANIFEST);
        let ctx = CommandContext::new(PrismConfig::default());

        let (manager, failures) = start_modules(&ctx, Some(&manifest), &[]).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_ne!(manager.module_state("Core"), Some(ModuleState::Initialized));
    }

    #[test]
    fn test_unknown_module_in_order_request() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write(dir.path(), "modules.toml", MANIFEST);
        let ctx = CommandContext::new(PrismConfig::default());

        let error = show_order(&ctx, Some(&manifest), &["Missing".to_string()]).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ModularityError>(),
            Some(ModularityError::ModuleNotFound { matches: 0, .. })
        ));
    }
}
