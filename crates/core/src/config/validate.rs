use super::{types::Config, ConfigError};

/// Validate configuration beyond what serde enforces:
/// - crawler URLs present, context template carries the offset placeholder
/// - non-degenerate window size
/// - every meta program is named and non-empty
/// - producers carry a type
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.crawler.baseurl.is_empty() {
        return Err(ConfigError::Invalid(
            "crawler.baseurl cannot be empty".to_string(),
        ));
    }
    if !config.crawler.contexturl.contains("%d") {
        return Err(ConfigError::Invalid(
            "crawler.contexturl must contain a %d offset placeholder".to_string(),
        ));
    }
    if config.crawler.threshold == 0 {
        return Err(ConfigError::Invalid(
            "crawler.threshold cannot be 0".to_string(),
        ));
    }

    for program in &config.crawler.metaactions {
        if program.field.is_empty() {
            return Err(ConfigError::Invalid(
                "crawler.metaactions entry without a field name".to_string(),
            ));
        }
        if program.actions.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "crawler.metaactions.{}: empty action list",
                program.field
            )));
        }
    }

    for (i, producer) in config.producers.iter().enumerate() {
        if producer.kind.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "producers[{i}]: type cannot be empty"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn base_config() -> Config {
        load_config_from_str(
            r#"
{
    "crawler": {
        "baseurl": "https://tracker.example",
        "contexturl": "/download.php?id=%d"
    },
    "db": { "driver": "memory" }
}
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_missing_placeholder_fails() {
        let mut config = base_config();
        config.crawler.contexturl = "/download.php".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_zero_threshold_fails() {
        let mut config = base_config();
        config.crawler.threshold = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_unnamed_meta_program_fails() {
        let mut config = base_config();
        config.crawler.metaactions = vec![crate::extractor::MetaProgramConfig {
            field: String::new(),
            actions: vec![],
        }];
        assert!(validate_config(&config).is_err());
    }
}
