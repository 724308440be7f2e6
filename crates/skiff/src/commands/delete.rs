use crate::progress;
use colored::Colorize;
use std::path::PathBuf;

pub async fn handle(config: PathBuf, cache: Option<PathBuf>) -> anyhow::Result<()> {
    let (spec, cache_path) = super::resolve_environment(&config, cache).await?;

    println!("environment: {}", spec.name.cyan());
    println!("cache:       {}", cache_path.display());
    println!();

    let mut provider = super::connect(spec, &cache_path).await?;
    let pb = progress::spinner("deleting environment resources");
    match provider.delete().await {
        Ok(()) => {
            pb.finish_with_message(format!("{} environment terminated", "✓".green()));
            Ok(())
        }
        Err(e) => {
            pb.finish_with_message(format!("{} delete failed", "✗".red()));
            eprintln!(
                "{}",
                "deletion can be retried; completed steps are skipped on the next run".yellow()
            );
            Err(e.into())
        }
    }
}
