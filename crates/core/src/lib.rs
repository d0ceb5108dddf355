pub mod domain;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod time;

pub mod config {
    use anyhow::Context;

    const DEFAULT_PORT: u16 = 3000;
    const DEFAULT_PREDICT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_TEST_SPLIT: f64 = 0.2;
    const DEFAULT_MIN_ROWS: usize = 10;
    const DEFAULT_MAX_ROWS: usize = 3_000;
    const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub sentry_dsn: Option<String>,
        pub port: u16,
        pub predict_timeout_secs: u64,
        pub test_split: f64,
        pub min_rows: usize,
        pub max_rows: usize,
        pub max_body_bytes: usize,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                sentry_dsn: None,
                port: DEFAULT_PORT,
                predict_timeout_secs: DEFAULT_PREDICT_TIMEOUT_SECS,
                test_split: DEFAULT_TEST_SPLIT,
                min_rows: DEFAULT_MIN_ROWS,
                max_rows: DEFAULT_MAX_ROWS,
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            }
        }
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let defaults = Self::default();
            Ok(Self {
                sentry_dsn: std::env::var("SENTRY_DSN").ok().filter(|s| !s.trim().is_empty()),
                port: parse_var("PORT")?.unwrap_or(defaults.port),
                predict_timeout_secs: parse_var("PREDICT_TIMEOUT_SECS")?
                    .unwrap_or(defaults.predict_timeout_secs),
                test_split: parse_var("PREDICT_TEST_SPLIT")?.unwrap_or(defaults.test_split),
                min_rows: parse_var("PREDICT_MIN_ROWS")?.unwrap_or(defaults.min_rows),
                max_rows: parse_var("PREDICT_MAX_ROWS")?.unwrap_or(defaults.max_rows),
                max_body_bytes: parse_var("MAX_BODY_BYTES")?.unwrap_or(defaults.max_body_bytes),
            })
        }

        pub fn pipeline_options(&self) -> crate::pipeline::PipelineOptions {
            crate::pipeline::PipelineOptions {
                test_split: self.test_split,
                min_rows: self.min_rows,
                max_rows: self.max_rows,
            }
        }
    }

    fn parse_var<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match std::env::var(key) {
            Ok(s) if !s.trim().is_empty() => {
                let v = s
                    .trim()
                    .parse::<T>()
                    .with_context(|| format!("{key} is not a valid value: {s}"))?;
                Ok(Some(v))
            }
            _ => Ok(None),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn default_settings_match_pipeline_defaults() {
            let options = Settings::default().pipeline_options();
            assert_eq!(options, crate::pipeline::PipelineOptions::default());
        }
    }
}
