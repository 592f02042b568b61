use std::path::PathBuf;
use std::sync::Arc;

use crate::{emit_success, Commands, OutputMode};
use followgraph::config::{self, FollowGraphConfig};
use followgraph::facade::{CountRequest, FollowRequest, FollowersRequest, ListRequest};
use followgraph::ui::{self, Icons};
use followgraph::{FollowGraph, MemoryCache, RelationKind, SqliteStore};
use owo_colors::OwoColorize;

pub struct Context {
    pub config_path: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub output_mode: OutputMode,
}

impl Context {
    fn config_path(&self) -> PathBuf {
        self.config_path.clone().unwrap_or_else(config::default_config_path)
    }

    fn database_path(&self, config: &FollowGraphConfig) -> anyhow::Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Ok(config.database_path_in(&std::env::current_dir()?)),
        }
    }

    fn open_graph(&self, config: &FollowGraphConfig) -> anyhow::Result<FollowGraph> {
        let db = self.database_path(config)?;
        config::ensure_db_dir(&db)?;
        tracing::debug!(database = %db.display(), "Opening follow graph");

        let graph = FollowGraph::open(&db, Arc::new(MemoryCache::new()), config.cache.settings())?
            .with_default_page_size(config.server.default_page_size);
        Ok(graph)
    }
}

pub async fn run(ctx: Context, command: Commands) -> anyhow::Result<()> {
    let config = config::load_config(Some(&ctx.config_path()))?.unwrap_or_default();

    match command {
        Commands::Init { force } => run_init(&ctx, config, force),
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            let graph = ctx.open_graph(&config)?;
            if ctx.output_mode.is_human() {
                ui::header("Followgraph API");
                ui::info("Database", &ctx.database_path(&config)?.display().to_string());
            }
            followgraph::server::start_server(port, graph).await
        }
        Commands::Follow { subject, target, kind } => {
            let graph = ctx.open_graph(&config)?;
            let req = FollowRequest { subject_id: subject, target_id: target, kind: kind.code() };
            graph.follow(&req).await?;
            if ctx.output_mode.is_human() {
                ui::success(&format!("{} now follows {} {}", subject, kind, target));
            }
            emit_success(ctx.output_mode, "follow", serde_json::to_value(&req)?)
        }
        Commands::Unfollow { subject, target, kind } => {
            let graph = ctx.open_graph(&config)?;
            let req = FollowRequest { subject_id: subject, target_id: target, kind: kind.code() };
            graph.unfollow(&req).await?;
            if ctx.output_mode.is_human() {
                ui::success(&format!("{} no longer follows {} {}", subject, kind, target));
            }
            emit_success(ctx.output_mode, "unfollow", serde_json::to_value(&req)?)
        }
        Commands::Follows { subject, kind, cursor, page_size } => {
            let graph = ctx.open_graph(&config)?;
            let req = ListRequest { subject_id: subject, kind: kind.code(), cursor, page_size };
            let page = graph.list_follows(&req).await?;
            if ctx.output_mode.is_human() {
                let icon = match kind {
                    RelationKind::Person => Icons::PERSON,
                    RelationKind::Topic => Icons::TOPIC,
                };
                ui::section(&format!(" {} follows ({}) ", subject, kind));
                println!("{} {}", icon, ui::id_list(&page.ids));
                print_has_more(page.has_more, cursor, page.ids.len());
            }
            emit_success(ctx.output_mode, "follows", serde_json::to_value(&page)?)
        }
        Commands::Followers { subject, cursor, page_size } => {
            let graph = ctx.open_graph(&config)?;
            let req = FollowersRequest { subject_id: subject, cursor, page_size };
            let page = graph.list_followers(&req).await?;
            if ctx.output_mode.is_human() {
                ui::section(&format!(" {} followers ", subject));
                println!("{} {}", Icons::PERSON, ui::id_list(&page.ids));
                print_has_more(page.has_more, cursor, page.ids.len());
            }
            emit_success(ctx.output_mode, "followers", serde_json::to_value(&page)?)
        }
        Commands::Counts { subject, kind } => {
            let graph = ctx.open_graph(&config)?;
            let counts = graph
                .get_counts(&CountRequest { subject_id: subject, kind: kind.code() })
                .await?;
            if ctx.output_mode.is_human() {
                ui::section(&format!(" {} counts ({}) ", subject, kind));
                ui::summary_row(&format!("{} Following", Icons::UP), &counts.outgoing.to_string());
                if kind.has_inverse() {
                    ui::summary_row(&format!("{} Followers", Icons::DOWN), &counts.incoming.to_string());
                }
            }
            emit_success(ctx.output_mode, "counts", serde_json::to_value(counts)?)
        }
        Commands::Export { subject, kind, followers } => {
            let graph = ctx.open_graph(&config)?;
            let stream = if followers {
                graph.stream_followers(subject)
            } else {
                graph.stream_all(subject, kind.code())?
            };
            let list = stream.list();
            let pages = stream.collect_pages().await?;
            if ctx.output_mode.is_human() {
                ui::section(&format!(" {} export of {} ", list, subject));
                for (i, page) in pages.iter().enumerate() {
                    println!("{} page {}: {}", Icons::PACKAGE, i + 1, ui::id_list(page));
                }
                ui::summary_row("Total", &pages.iter().map(Vec::len).sum::<usize>().to_string());
            }
            let data = serde_json::json!({
                "subject_id": subject,
                "list": list,
                "pages": pages,
            });
            emit_success(ctx.output_mode, "export", data)
        }
        Commands::Stats => {
            let graph = ctx.open_graph(&config)?;
            let stats = graph.stats().await?;
            if ctx.output_mode.is_human() {
                ui::section(&format!(" {} Store statistics ", Icons::STATS));
                println!(
                    "{}",
                    ui::stats_table(&[
                        ("Follows", &stats.follows.to_string()),
                        ("Followers", &stats.followers.to_string()),
                        ("Topic follows", &stats.topic_follows.to_string()),
                        ("Person counters", &stats.person_counters.to_string()),
                        ("Topic counters", &stats.topic_counters.to_string()),
                    ])
                );
            }
            emit_success(ctx.output_mode, "stats", serde_json::to_value(&stats)?)
        }
    }
}

fn run_init(ctx: &Context, mut config: FollowGraphConfig, force: bool) -> anyhow::Result<()> {
    let config_path = ctx.config_path();
    let db = ctx.database_path(&config)?;
    if ctx.database.is_some() {
        config.store.path = Some(db.display().to_string());
    }

    config::write_config(&config_path, &config, force)?;
    config::ensure_db_dir(&db)?;
    SqliteStore::open(&db)?;

    if ctx.output_mode.is_human() {
        ui::banner(
            &format!("{}", "Followgraph".bold().style(ui::theme().info.clone())),
            &format!("Version {}", env!("CARGO_PKG_VERSION")),
        );
        ui::success("Initialized follow graph");
        ui::info(&format!("{} Config", Icons::GEAR), &config_path.display().to_string());
        ui::info(&format!("{} Database", Icons::DATABASE), &db.display().to_string());
    }
    let data = serde_json::json!({
        "config": config_path.display().to_string(),
        "database": db.display().to_string(),
    });
    emit_success(ctx.output_mode, "init", data)
}

fn print_has_more(has_more: bool, cursor: u64, shown: usize) {
    if has_more {
        println!(
            "{} more available, continue with --cursor {}",
            Icons::LINK,
            cursor + shown as u64
        );
    } else if shown == 0 {
        ui::warn("Nothing to show");
    }
}
