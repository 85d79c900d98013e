use clap::Parser;

/// Connection parameters for a Postgres-compatible store (spec §4.11
/// "reusing the grounding repo's `PostgresArgs`/`DatabaseArgs` shape").
/// Shared here so every binary in the workspace that talks to Postgres
/// takes the same `--postgres-*`/`POSTGRES_*` flags.
#[derive(Parser, Debug, Clone)]
pub struct PostgresArgs {
    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_DATABASE", default_value = "postgres")]
    pub postgres_database: String,

    #[arg(long, env = "POSTGRES_USERNAME", default_value = "postgres")]
    pub postgres_username: String,

    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: Option<String>,
}
