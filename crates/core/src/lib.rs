pub mod domain;
pub mod llm;
pub mod storage;
pub mod transcript;

pub mod config {
    use anyhow::Context;
    use std::time::Duration;

    const DEFAULT_CACHE_TTL_SECS: u64 = 15 * 60;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        /// Restricts reads to analyses produced by this model. Any model when unset.
        pub analysis_llm_model: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                analysis_llm_model: std::env::var("ANALYSIS_LLM_MODEL")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }

        pub fn db_max_connections(&self) -> u32 {
            std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(5)
        }

        /// Upper bound on how long a cached view may outlive the analysis it was built from.
        pub fn cache_ttl(&self) -> Duration {
            cache_ttl_from(std::env::var("CACHE_TTL_SECS").ok().as_deref())
        }
    }

    fn cache_ttl_from(raw: Option<&str>) -> Duration {
        let secs = raw
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);
        Duration::from_secs(secs)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn cache_ttl_falls_back_on_missing_or_bad_values() {
            assert_eq!(cache_ttl_from(Some("60")), Duration::from_secs(60));
            assert_eq!(cache_ttl_from(None), Duration::from_secs(DEFAULT_CACHE_TTL_SECS));
            assert_eq!(cache_ttl_from(Some("0")), Duration::from_secs(DEFAULT_CACHE_TTL_SECS));
            assert_eq!(cache_ttl_from(Some("soon")), Duration::from_secs(DEFAULT_CACHE_TTL_SECS));
        }
    }
}
