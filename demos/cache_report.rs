//! Measure a cache directory, print its state, and preview a clean.
//!
//! Usage:
//!   cargo run --example cache_report -- /path/to/com.apple.coresymbolicationd
//!
//! Demonstrates library-only usage: scanning, classification and a dry run
//! through the `CacheCommands` surface. Nothing is deleted.

use std::path::PathBuf;

use symbol_sweep::core::config::Config;
use symbol_sweep::core::format::format_size;
use symbol_sweep::daemon::bridge::{CacheCommands, CacheService};

fn main() {
    let mut config = Config::load(None).expect("load config");
    if let Some(path) = std::env::args().nth(1) {
        config.target.path = PathBuf::from(path);
    }
    println!("Cache: {}", config.target.path.display());

    let service = CacheService::new(config, None);
    let status = service.get_status();
    println!(
        "  {} in {} items: {}",
        status.formatted_size(),
        status.item_count,
        status.state
    );
    if let Some(free) = status.volume_free_bytes {
        println!("  volume free: {}", format_size(free));
    }
    println!("  last clean: {}", service.get_last_clean_time());

    let preview = service.clean(true).expect("dry run");
    let mut items = preview.items_found.clone();
    items.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
    println!();
    println!("Largest items:");
    for item in items.iter().take(10) {
        println!("  {:>10}  {}", format_size(item.size_bytes), item.name());
    }
    println!();
    println!("{}", preview.message);
}
