use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod availability;
mod config;
mod db;
mod lang;
#[cfg(test)]
mod memory;
mod models;
mod overview;
mod pending;
mod platform;
mod render;
mod report;
mod roles;

use config::Settings;
use overview::{PageRequest, PageRequirements};

#[derive(Parser)]
#[command(name = "course-overview")]
#[command(about = "Per-course pending work counts for the course platform dashboard", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the platform tables on a development database
    InitDb,
    /// Load a small demo site
    Seed,
    /// Run the dashboard footer hook and write the queued script
    Render {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        page_type: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print per-course summaries
    Summary {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Export per-course summaries to a CSV file
    Export {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        csv: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;
    settings.validate()?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(settings.database_url()?)
        .await
        .context("failed to connect to Postgres")?;

    let platform = db::PgPlatform::new(
        pool.clone(),
        &settings.table_prefix,
        settings.forum_old_post_days,
    );
    let now = chrono::Utc::now().timestamp();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            tracing::info!("schema ready");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            tracing::info!("demo site loaded");
        }
        Commands::Render {
            user_id,
            page_type,
            out,
        } => {
            let page = PageRequest {
                page_type: page_type.unwrap_or_else(|| settings.dashboard_page_type.clone()),
                user_id: Some(user_id),
                now,
            };
            let renderer = render::Renderer::new(lang::Strings::english(), &settings.wwwroot);
            let mut requirements = PageRequirements::default();
            overview::before_footer(
                &page,
                &settings.dashboard_page_type,
                &platform,
                &renderer,
                &mut requirements,
            )
            .await?;

            let script = requirements
                .init_code
                .iter()
                .map(|init| init.code.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            match out {
                Some(path) => {
                    std::fs::write(&path, script)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), "script written");
                }
                None => println!("{script}"),
            }
        }
        Commands::Summary { user_id, json } => {
            let summaries = overview::collect_summaries(&platform, user_id, now).await?;
            if json {
                println!("{}", report::to_json(&summaries)?);
            } else {
                print!("{}", report::build_text(&summaries));
            }
        }
        Commands::Export { user_id, csv } => {
            let summaries = overview::collect_summaries(&platform, user_id, now).await?;
            let file = std::fs::File::create(&csv)
                .with_context(|| format!("failed to create {}", csv.display()))?;
            let written = report::write_csv(file, &summaries)?;
            tracing::info!(courses = written, path = %csv.display(), "summaries exported");
        }
    }

    Ok(())
}
