//! Server configuration from flags and environment

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::assignment::{LifecycleConfig, ResolverPolicy};

/// Ten years
pub const MAX_INVITE_TTL_DAYS: i64 = 3650;

#[derive(Debug, Clone, Parser)]
#[command(name = "passport-assign", about = "Supplier responsibility assignment service")]
pub struct Config {
    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:passport-assign.db?mode=rwc")]
    pub database_url: String,

    /// Address to listen on
    #[arg(long, env = "ASSIGN_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// JSON catalog of passport content schemas, keyed by passport id
    #[arg(long, env = "ASSIGN_SCHEMA_FILE")]
    pub schema_file: Option<PathBuf>,

    /// Days a collaborator link stays valid (1 to 3650)
    #[arg(
        long,
        env = "ASSIGN_INVITE_TTL_DAYS",
        default_value_t = 14,
        value_parser = clap::value_parser!(i64).range(1..=MAX_INVITE_TTL_DAYS)
    )]
    pub invite_ttl_days: i64,

    /// Treat active reviews as blocking new contributions
    #[arg(long, env = "ASSIGN_REVIEW_BLOCKS_CONTRIBUTION", default_value_t = false)]
    pub review_blocks_contribution: bool,

    /// Mail relay endpoint; invitations are only logged when unset
    #[arg(long, env = "ASSIGN_NOTIFY_WEBHOOK")]
    pub notify_webhook: Option<String>,

    /// Base URL collaborator links are built on
    #[arg(long, env = "ASSIGN_PUBLIC_URL", default_value = "http://localhost:3000")]
    pub public_url: String,
}

impl Config {
    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            policy: ResolverPolicy::default()
                .review_blocks_contribution(self.review_blocks_contribution),
            invite_ttl: chrono::Duration::days(self.invite_ttl_days.clamp(1, MAX_INVITE_TTL_DAYS)),
            public_url: self.public_url.clone(),
        }
    }
}
