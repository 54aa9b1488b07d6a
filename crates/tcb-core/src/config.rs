use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Public endpoint of the embedding HTTP server, used in onboarding URLs.
    pub host: String,

    // Twitch application + bot identity
    pub botname: String,
    pub client_id: String,
    pub client_secret: String,

    // Persistence
    pub config_dir: PathBuf,

    // Session
    pub max_auth_retries: u32,
    pub client: ClientOptions,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let client_id = required("TWITCH_CLIENT_ID")?;
        let client_secret = required("TWITCH_CLIENT_SECRET")?;
        let botname = required("BOTNAME")?.to_lowercase();
        let host = required("HOST")?.trim_end_matches('/').to_string();

        let config_dir =
            PathBuf::from(env_str("CONFIG_DIR").and_then(non_empty).unwrap_or(".config".into()));
        let max_auth_retries = env_u32("MAX_AUTH_RETRIES").unwrap_or(3);

        let client = ClientOptions::new(&botname).merge(ClientOverrides {
            secure: env_bool("TWITCH_SECURE"),
            debug: env_bool("TWITCH_DEBUG"),
            join_timeout: env_u64("TWITCH_JOIN_TIMEOUT_MS").map(Duration::from_millis),
            server_url: env_str("TWITCH_IRC_URL").and_then(non_empty),
        });

        Ok(Self {
            host,
            botname,
            client_id,
            client_secret,
            config_dir,
            max_auth_retries,
            client,
        })
    }

    pub fn channels_file(&self) -> PathBuf {
        self.config_dir.join("channels.json")
    }

    pub fn auth_file(&self) -> PathBuf {
        self.config_dir.join("auth.json")
    }
}

/// Options handed to the chat transport when a client is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    /// Login name the bot connects as.
    pub username: String,
    /// Use TLS for the chat socket.
    pub secure: bool,
    /// Log raw chat traffic at debug level.
    pub debug: bool,
    /// How long join/part wait for the server to confirm.
    pub join_timeout: Duration,
    /// Overrides the default chat endpoint.
    pub server_url: Option<String>,
}

/// Caller-supplied partial options; unset fields keep the defaults.
#[derive(Clone, Debug, Default)]
pub struct ClientOverrides {
    pub secure: Option<bool>,
    pub debug: Option<bool>,
    pub join_timeout: Option<Duration>,
    pub server_url: Option<String>,
}

impl ClientOptions {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_lowercase(),
            secure: true,
            debug: false,
            join_timeout: Duration::from_secs(10),
            server_url: None,
        }
    }

    /// Merge overrides field by field. The identity is never overridable.
    pub fn merge(mut self, overrides: ClientOverrides) -> Self {
        if let Some(secure) = overrides.secure {
            self.secure = secure;
        }
        if let Some(debug) = overrides.debug {
            self.debug = debug;
        }
        if let Some(t) = overrides.join_timeout {
            self.join_timeout = t;
        }
        if overrides.server_url.is_some() {
            self.server_url = overrides.server_url;
        }
        self
    }
}

fn required(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
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

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }
        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_merge_over_defaults() {
        let opts = ClientOptions::new("MyBot").merge(ClientOverrides {
            debug: Some(true),
            join_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        });
        assert_eq!(opts.username, "mybot");
        assert!(opts.secure);
        assert!(opts.debug);
        assert_eq!(opts.join_timeout, Duration::from_secs(2));
        assert_eq!(opts.server_url, None);
    }

    #[test]
    fn empty_overrides_keep_defaults() {
        let base = ClientOptions::new("bot");
        assert_eq!(base.clone().merge(ClientOverrides::default()), base);
    }

    #[test]
    fn dotenv_parsing_skips_comments_and_strips_quotes() {
        let parsed = parse_dotenv(
            "# comment\n\nBOTNAME=\"fosebot\"\nHOST='http://localhost:8080'\nbroken line\n=novalue\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("BOTNAME".to_string(), "fosebot".to_string()),
                ("HOST".to_string(), "http://localhost:8080".to_string()),
            ]
        );
    }

    #[test]
    fn bool_helper_accepts_common_spellings() {
        assert!(parse_bool("Yes"));
        assert!(!parse_bool("0"));
    }
}
