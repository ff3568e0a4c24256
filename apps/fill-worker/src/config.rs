use std::env;
use std::time::Duration;

const DEFAULT_PROC_TENANT_COUNT: usize = 10;
const DEFAULT_CACHE_STALENESS_SECS: i64 = 300;
const DEFAULT_TICK_PAUSE_MS: u64 = 1000;

/// Worker configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// How many of the least recently processed tenants each cycle claims.
    pub proc_tenant_count: usize,
    /// Cache staleness window before a claim goes through the backing store.
    pub cache_staleness: chrono::Duration,
    /// Pause between scheduling cycles.
    pub tick_pause: Duration,
    /// Optional tenant registered at startup; useful in single-executable
    /// mode where nothing else populates the store.
    pub seed_tenant: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> Self {
        let proc_tenant_count = env_parsed("PROC_TENANT_COUNT", DEFAULT_PROC_TENANT_COUNT);
        let staleness_secs = env_parsed("CACHE_STALENESS_SECS", DEFAULT_CACHE_STALENESS_SECS);
        let tick_pause_ms = env_parsed("TICK_PAUSE_MS", DEFAULT_TICK_PAUSE_MS);

        let seed_tenant = match (env::var("SEED_TENANT_ID"), env::var("SEED_TENANT_CREDENTIAL")) {
            (Ok(id), Ok(credential)) if !id.is_empty() && !credential.is_empty() => {
                Some((id, credential))
            }
            _ => None,
        };

        Self {
            proc_tenant_count,
            cache_staleness: chrono::Duration::seconds(staleness_secs),
            tick_pause: Duration::from_millis(tick_pause_ms),
            seed_tenant,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparsable {name}={raw}");
            default
        }),
        Err(_) => default,
    }
}
