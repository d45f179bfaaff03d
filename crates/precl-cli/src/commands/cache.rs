//! `precl cache` command - Inspect or clear the binary cache.

use std::path::Path;

use colored::Colorize;
use precl::BinaryCache;

use crate::error::CliResult;

/// Execute `precl cache stats`.
pub fn stats(cache_dir: Option<&Path>) -> CliResult<()> {
    let cache = open(cache_dir)?;
    let stats = cache.stats();

    println!("{}:", "Binary Cache".bright_white().underline());
    println!(
        "  {} Directory: {}",
        "•".dimmed(),
        stats.cache_dir.display().to_string().bright_yellow()
    );
    println!("  {} Entries: {}", "•".dimmed(), stats.entries);
    println!(
        "  {} Size: {:.2} KB",
        "•".dimmed(),
        stats.bytes as f64 / 1024.0
    );
    Ok(())
}

/// Execute `precl cache clear`.
pub fn clear(cache_dir: Option<&Path>) -> CliResult<()> {
    let cache = open(cache_dir)?;
    let removed = cache.stats().entries;
    cache.clear()?;

    println!(
        "{} Removed {} cached binar{} from {}",
        "✓".bright_green(),
        removed,
        if removed == 1 { "y" } else { "ies" },
        cache.cache_dir().display()
    );
    Ok(())
}

fn open(cache_dir: Option<&Path>) -> CliResult<BinaryCache> {
    Ok(match cache_dir {
        Some(dir) => BinaryCache::with_dir(dir.to_path_buf())?,
        None => BinaryCache::new()?,
    })
}
