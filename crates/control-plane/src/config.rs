use serde::{Deserialize, Deserializer};

pub const ENV_PREFIX: &str = "EDGE_CP";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub tokens: TokenConfig,
    pub limits: LimitsConfig,
    pub messaging: MessagingConfig,
    pub stats: StatsConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Static bearer tokens. Each entry is `<id>:<token>`; the id becomes the
/// caller id of requests authenticated with that token.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub admin_tokens: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub user_tokens: Vec<String>,
    pub header_name: String,
}

fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(value) => Ok(value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()),
        StringOrVec::Vec(values) => Ok(values),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub pepper: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_field_len: usize,
    pub task_poll_limit: u32,
    pub list_limit: u32,
    pub body_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    /// Node messages with an identical hash inside this window are dropped.
    pub dedupe_window_secs: u64,
    pub retention_days: u32,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    pub flush_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub migrations_dry_run_on_start: bool,
}

/// A parsed `<id>:<token>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticToken {
    pub id: i64,
    pub token: String,
}

impl AuthConfig {
    pub fn parsed_admin_tokens(&self) -> anyhow::Result<Vec<StaticToken>> {
        parse_static_tokens("auth.admin_tokens", &self.admin_tokens)
    }

    pub fn parsed_user_tokens(&self) -> anyhow::Result<Vec<StaticToken>> {
        parse_static_tokens("auth.user_tokens", &self.user_tokens)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.parsed_admin_tokens()?.is_empty() {
            anyhow::bail!("auth.admin_tokens cannot be empty");
        }
        self.parsed_user_tokens()?;
        if self.header_name.trim().is_empty() {
            anyhow::bail!("auth.header_name cannot be empty");
        }
        Ok(())
    }
}

fn parse_static_tokens(key: &str, entries: &[String]) -> anyhow::Result<Vec<StaticToken>> {
    entries
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let Some((id, token)) = entry.split_once(':') else {
                anyhow::bail!("{key} entries must look like <id>:<token>");
            };
            let id: i64 = id
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("{key} entry has a non-numeric id"))?;
            if id <= 0 {
                anyhow::bail!("{key} entry ids must be > 0");
            }
            let token = token.trim();
            if token.is_empty() {
                anyhow::bail!("{key} entry has an empty token");
            }
            Ok(StaticToken {
                id,
                token: token.to_string(),
            })
        })
        .collect()
}

impl LimitsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_field_len == 0 {
            anyhow::bail!("limits.max_field_len must be > 0");
        }
        if self.task_poll_limit == 0 {
            anyhow::bail!("limits.task_poll_limit must be > 0");
        }
        if self.list_limit == 0 {
            anyhow::bail!("limits.list_limit must be > 0");
        }
        Ok(())
    }
}

impl MessagingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retention_days == 0 {
            anyhow::bail!("messaging.retention_days must be > 0");
        }
        if self.cleanup_interval_secs == 0 {
            anyhow::bail!("messaging.cleanup_interval_secs must be > 0");
        }
        Ok(())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_field_len: 255,
            task_poll_limit: 500,
            list_limit: 100,
            body_bytes: 256 * 1024,
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            dedupe_window_secs: 10 * 60,
            retention_days: 30,
            cleanup_interval_secs: 60 * 60,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 60,
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    let env = config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        // Keep try_parsing disabled so numeric token strings are not coerced.
        .try_parsing(false);

    let builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(env);
    load_from(builder)
}

/// Apply defaults to `builder`, then deserialize and validate.
pub fn load_from(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> anyhow::Result<AppConfig> {
    let limits = LimitsConfig::default();
    let messaging = MessagingConfig::default();

    let builder = builder
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("metrics.host", "127.0.0.1")?
        .set_default("metrics.port", 9090)?
        .set_default("database.url", "sqlite://data/edge-control-plane.db")?
        .set_default("auth.admin_tokens", vec!["1:dev-admin-token"])?
        .set_default("auth.user_tokens", Vec::<String>::new())?
        .set_default("auth.header_name", "authorization")?
        .set_default("tokens.pepper", "dev-token-pepper")?
        .set_default("limits.max_field_len", limits.max_field_len as u64)?
        .set_default("limits.task_poll_limit", limits.task_poll_limit)?
        .set_default("limits.list_limit", limits.list_limit)?
        .set_default("limits.body_bytes", limits.body_bytes)?
        .set_default("messaging.dedupe_window_secs", messaging.dedupe_window_secs)?
        .set_default("messaging.retention_days", messaging.retention_days)?
        .set_default(
            "messaging.cleanup_interval_secs",
            messaging.cleanup_interval_secs,
        )?
        .set_default(
            "stats.flush_interval_secs",
            StatsConfig::default().flush_interval_secs,
        )?
        .set_default("features.migrations_dry_run_on_start", false)?;

    let cfg = builder.build()?;
    let mut app: AppConfig = cfg.try_deserialize()?;
    app.auth.header_name = app.auth.header_name.trim().to_ascii_lowercase();
    app.auth.validate()?;
    app.limits.validate()?;
    app.messaging.validate()?;
    if app.stats.flush_interval_secs == 0 {
        anyhow::bail!("stats.flush_interval_secs must be > 0");
    }
    Ok(app)
}
