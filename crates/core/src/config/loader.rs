use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from a JSON file with environment variable overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Json::file(path))
        .merge(Env::prefixed("TRACKWATCH_").split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    Ok(config)
}

/// Load configuration from a JSON string (useful for testing).
pub fn load_config_from_str(json: &str) -> Result<Config, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
{
    "crawler": {
        "baseurl": "https://tracker.example",
        "contexturl": "/download.php?id=%d"
    },
    "db": { "driver": "memory" }
}
"#;

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.crawler.baseurl, "https://tracker.example");
        assert_eq!(config.crawler.threshold, 10);
        assert_eq!(config.crawler.anniversary, 1000);
        assert!(config.producers.is_empty());
        assert!(config.cluster.is_none());
    }

    #[test]
    fn test_load_config_missing_crawler() {
        let result = load_config_from_str(r#"{ "db": { "driver": "memory" } }"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/observer.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.crawler.contexturl, "/download.php?id=%d");
        assert_eq!(config.log.level, "info");
    }
}
