use colored::Colorize;
use skiff_cloud::default_cache_path;
use skiff_core::load_spec;
use std::path::PathBuf;

pub async fn handle(config: PathBuf) -> anyhow::Result<()> {
    let spec = load_spec(&config)?;
    let cache_path = default_cache_path(&spec.name);

    let provider = super::connect(spec.clone(), &cache_path).await?;
    match provider.dry_run().await {
        Ok(()) => {
            println!(
                "{} spec {} is valid for {}",
                "✓".green(),
                spec.name.cyan(),
                spec.region.cyan()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            Err(e.into())
        }
    }
}
