// src/cli/mod.rs
// Admin commands: thin shells over the store and retention enforcer

use crate::background::RetentionEnforcer;
use crate::cache::SessionCache;
use crate::config::EnvConfig;
use crate::db::{self, DatabasePool};
use crate::error::Result;
use crate::utils::now_millis;
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "context-dna", version)]
#[command(about = "Context DNA - persistent context storage and retrieval for agent swarms")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show store and session cache statistics
    Stats,
    /// Run a retention sweep now
    Cleanup {
        /// Count what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Reclaim free pages in the store file
    Compact,
}

async fn open_pool(config: &EnvConfig) -> Result<Arc<DatabasePool>> {
    Ok(Arc::new(DatabasePool::open(&config.db_path()).await?))
}

/// `stats`: row counts, time bounds, sizes, session set counts.
pub async fn run_stats(config: &EnvConfig) -> Result<()> {
    let pool = open_pool(config).await?;
    let stats = pool.interact(db::get_stats_sync).await?;

    println!("Store: {}", config.db_path().display());
    println!("  projects:      {}", stats.projects);
    println!("  tasks:         {}", stats.tasks);
    println!("  conversations: {}", stats.conversations);
    println!("  artifacts:     {}", stats.artifacts);
    println!("  memories:      {}", stats.memories);
    println!("  storage:       {} bytes", stats.storage_bytes);
    println!(
        "  referenced artifact bytes (out-of-band): {}",
        stats.referenced_artifact_bytes
    );
    if let (Some(oldest), Some(newest)) = (stats.oldest_created_at, stats.newest_created_at) {
        println!("  created_at range: {oldest} .. {newest}");
    }

    match SessionCache::connect(&config.cache).await {
        Ok(cache) => match cache.get_stats().await {
            Ok(sessions) => {
                println!("Sessions:");
                println!("  active:    {}", sessions.active);
                println!("  completed: {}", sessions.completed);
                println!("  failed:    {}", sessions.failed);
                println!(
                    "  avg duration: {:.0} ms",
                    sessions.avg_duration_millis
                );
            }
            Err(e) => println!("Sessions: unavailable ({e})"),
        },
        Err(e) => println!("Sessions: unavailable ({e})"),
    }

    pool.close().await;
    Ok(())
}

/// `cleanup`: one retention sweep, or a dry-run count.
pub async fn run_cleanup(config: &EnvConfig, dry_run: bool) -> Result<()> {
    let pool = open_pool(config).await?;

    if dry_run {
        let cutoff = config.retention.cutoff_millis(now_millis());
        let candidates = pool
            .interact(move |conn| db::count_expired_sync(conn, cutoff))
            .await?;
        if candidates.is_empty() {
            println!("Nothing to delete.");
        } else {
            for (table, count) in candidates {
                println!("{table}: {count} rows would be deleted");
            }
        }
        pool.close().await;
        return Ok(());
    }

    let cache = Arc::new(SessionCache::connect(&config.cache).await?);
    let enforcer = RetentionEnforcer::new(pool.clone(), cache, config.retention);
    let report = enforcer.enforce_retention_policy().await?;
    println!(
        "Deleted {} rows and {} expired sessions in {} ms ({} bytes freed)",
        report.deleted, report.sessions_removed, report.duration_millis, report.freed_bytes
    );

    pool.close().await;
    Ok(())
}

/// `compact`: VACUUM + planner statistics refresh.
pub async fn run_compact(config: &EnvConfig) -> Result<()> {
    let pool = open_pool(config).await?;
    let before = pool.interact(db::get_stats_sync).await?;
    pool.compact().await?;
    let after = pool.interact(db::get_stats_sync).await?;
    println!(
        "Compacted: {} -> {} bytes",
        before.storage_bytes, after.storage_bytes
    );
    pool.close().await;
    Ok(())
}
