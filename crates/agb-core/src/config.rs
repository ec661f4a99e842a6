use std::{
    env, fs,
    path::Path,
    time::Duration,
};

/// Typed runtime configuration, loaded from the environment with an optional
/// `.env` file for development.
#[derive(Clone, Debug)]
pub struct Config {
    /// SQLite connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,

    /// Sliding idle TTL for booking sessions.
    pub session_ttl: Duration,
    /// How often the background sweeper evicts expired sessions.
    pub session_sweep_interval: Duration,

    /// Cap on raw candidates collected per slot search.
    pub slot_search_limit: usize,

    /// IANA zone used when seeding the demo tenant.
    pub default_timezone: String,
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let database_url = env_str("DATABASE_URL").and_then(non_empty);

        let session_ttl =
            Duration::from_secs(env_u64("SESSION_TTL_MINUTES").unwrap_or(30) * 60);
        let session_sweep_interval =
            Duration::from_secs(env_u64("SESSION_SWEEP_SECONDS").unwrap_or(60));

        let slot_search_limit = env_usize("SLOT_SEARCH_LIMIT").unwrap_or(48).max(1);

        let default_timezone =
            env_str("DEFAULT_TIMEZONE").unwrap_or_else(|| "America/Mexico_City".to_string());

        Ok(Self {
            database_url,
            session_ttl,
            session_sweep_interval,
            slot_search_limit,
            default_timezone,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
