use serde::{Deserialize, Serialize};

fn default_api_base() -> String {
    "https://socmedia-api.vercel.app".to_owned()
}

fn default_refresh_secs() -> u64 {
    3
}

#[derive(Deserialize)]
pub struct Config {
    /// Base URL of the hosted socmedia API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Seconds between feed refreshes in watch mode.
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            refresh_secs: default_refresh_secs(),
        }
    }
}

/// Bearer token carried over between invocations, the terminal analog of the
/// web app keeping `authToken` in local storage.
#[derive(Serialize, Deserialize, Default, Clone)]
pub struct SessionCache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SessionCache {
    pub fn new() -> Self {
        Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cache_round_trips() {
        let cache = SessionCache {
            token: Some("tok".to_owned()),
        };
        let data = serde_json::to_string(&cache).unwrap();
        let back: SessionCache = serde_json::from_str(&data).unwrap();
        assert_eq!(back.token.as_deref(), Some("tok"));

        let empty: SessionCache = serde_json::from_str("{}").unwrap();
        assert!(empty.token.is_none());
    }

    #[test]
    fn config_fields_all_default() {
        let cfg: Config = serde_yaml::from_str("refresh_secs: 5").unwrap();
        assert_eq!(cfg.refresh_secs, 5);
        assert_eq!(cfg.api_base, default_api_base());
    }
}
