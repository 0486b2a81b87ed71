use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use repolens::{
    config::Settings,
    search::DEFAULT_TOP_K,
    store::Store,
    LensEngine,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Indexes GitHub repositories into per-file summaries and embeddings, and
/// keeps a summarised log of their newest commits.
#[derive(Debug, Parser)]
#[command(name = "repolens", version)]
struct Cli {
    /// SQLite database path (overrides REPOLENS_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// GitHub token for this invocation (overrides GITHUB_TOKEN)
    #[arg(long, global = true)]
    github_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage registered projects
    #[command(subcommand)]
    Project(ProjectCommand),
    /// Summarise and embed every file of a project's repository
    Index { project_id: String },
    /// Summarise commits that are not stored yet
    Poll { project_id: String },
    /// List stored commits, newest first
    Commits { project_id: String },
    /// Find the files whose summaries best match a query
    Search {
        project_id: String,
        query: String,
        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Count the files a repository index would fetch
    CountFiles { url: String },
}

#[derive(Debug, Subcommand)]
enum ProjectCommand {
    /// Register a repository under a new project id
    Add { name: String, github_url: String },
    /// List registered projects
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repolens=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    if cli.github_token.is_some() {
        settings.github_token = cli.github_token;
    }
    let engine = LensEngine::new(settings)?;

    match cli.command {
        Command::Project(ProjectCommand::Add { name, github_url }) => {
            cmd_project_add(&engine, &name, &github_url).await
        }
        Command::Project(ProjectCommand::List) => cmd_project_list(&engine).await,
        Command::Index { project_id } => cmd_index(&engine, &project_id).await,
        Command::Poll { project_id } => cmd_poll(&engine, &project_id).await,
        Command::Commits { project_id } => cmd_commits(&engine, &project_id).await,
        Command::Search {
            project_id,
            query,
            top_k,
        } => cmd_search(&engine, &project_id, &query, top_k).await,
        Command::CountFiles { url } => cmd_count_files(&engine, &url).await,
    }
}

/// Cancelled on the first Ctrl-C so a run can save what it already has.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing current item");
            child.cancel();
        }
    });
    token
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_project_add(engine: &LensEngine, name: &str, github_url: &str) -> Result<()> {
    repolens::github::RepoRef::parse(github_url)?;
    let project = engine.store().create_project(name, github_url).await?;
    print_json(&project)
}

async fn cmd_project_list(engine: &LensEngine) -> Result<()> {
    print_json(&engine.store().list_projects().await?)
}

async fn cmd_index(engine: &LensEngine, project_id: &str) -> Result<()> {
    let Some(project) = engine.store().get_project(project_id).await? else {
        bail!("project not found: {project_id}");
    };
    let pipeline = engine.indexing_pipeline()?;
    let token = engine.settings().github_token.as_deref();
    let report = pipeline
        .index_repository(project_id, &project.github_url, token, &cancel_on_ctrl_c())
        .await?;
    print_json(&report)
}

async fn cmd_poll(engine: &LensEngine, project_id: &str) -> Result<()> {
    let poller = engine.commit_poller()?;
    let token = engine.settings().github_token.as_deref();
    let inserted = poller
        .poll_commits(project_id, token, &cancel_on_ctrl_c())
        .await?;
    print_json(&serde_json::json!({ "projectId": project_id, "inserted": inserted }))
}

async fn cmd_commits(engine: &LensEngine, project_id: &str) -> Result<()> {
    let commits = engine.store().commits(project_id).await?;
    let output: Vec<_> = commits
        .iter()
        .map(|c| {
            let summary = if c.summary.is_empty() {
                "no summary available"
            } else {
                c.summary.as_str()
            };
            serde_json::json!({
                "hash":    c.commit_hash,
                "message": c.commit_message,
                "author":  c.commit_author_name,
                "avatar":  c.commit_author_avatar,
                "date":    c.commit_date,
                "summary": summary,
            })
        })
        .collect();
    print_json(&output)
}

async fn cmd_search(engine: &LensEngine, project_id: &str, query: &str, top_k: usize) -> Result<()> {
    let hits = engine.search_engine()?.search(project_id, query, top_k).await?;
    print_json(&hits)
}

async fn cmd_count_files(engine: &LensEngine, url: &str) -> Result<()> {
    let loader = engine.loader(engine.source_host()?)?;
    let token = engine.settings().github_token.as_deref();
    let count = loader.count_files(url, token).await?;
    print_json(&serde_json::json!({ "url": url, "files": count }))
}
