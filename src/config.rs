use anyhow::{bail, Context};
use clap::Args;

use crate::overview::DASHBOARD_PAGE_TYPE;

/// Connection and site settings, read from flags or the environment.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    #[arg(long, env = "DATABASE_URL", hide_env_values = true, global = true)]
    pub database_url: Option<String>,

    /// Prefix of the platform's database tables
    #[arg(long, env = "COURSEOVERVIEW_TABLE_PREFIX", default_value = "mdl_", global = true)]
    pub table_prefix: String,

    /// Site root used for links and icons
    #[arg(long, env = "COURSEOVERVIEW_WWWROOT", default_value = "", global = true)]
    pub wwwroot: String,

    /// Posts older than this many days count as read
    #[arg(long, env = "COURSEOVERVIEW_FORUM_OLDPOSTDAYS", default_value_t = 14, global = true)]
    pub forum_old_post_days: i64,

    #[arg(long, env = "COURSEOVERVIEW_DASHBOARD_PAGETYPE", default_value = DASHBOARD_PAGE_TYPE, global = true)]
    pub dashboard_page_type: String,

    #[arg(long, env = "COURSEOVERVIEW_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    pub max_connections: u32,
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.table_prefix.is_empty()
            || !self
                .table_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!(
                "table prefix {:?} may only contain letters, digits and underscores",
                self.table_prefix
            );
        }
        if self.forum_old_post_days <= 0 {
            bail!("forum old post days must be positive");
        }
        if self.max_connections == 0 {
            bail!("max connections must be positive");
        }
        Ok(())
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to the course platform's Postgres database")
    }
}
