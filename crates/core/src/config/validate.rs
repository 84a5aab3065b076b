use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Concurrency ceilings, timeout floor and chunk size are positive
/// - The extractor URL template contains `{id}`
/// - Archive, manifest and audio format names are not empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let acquisition = &config.acquisition;
    if acquisition.batch_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "acquisition.batch_concurrency must be at least 1".to_string(),
        ));
    }
    if acquisition.single_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "acquisition.single_concurrency must be at least 1".to_string(),
        ));
    }
    if acquisition.timeout_floor_secs == 0 {
        return Err(ConfigError::ValidationError(
            "acquisition.timeout_floor_secs cannot be 0".to_string(),
        ));
    }
    if acquisition.stream_chunk_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "acquisition.stream_chunk_bytes cannot be 0".to_string(),
        ));
    }
    if acquisition.archive_name.trim().is_empty() || acquisition.manifest_name.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "acquisition.archive_name and acquisition.manifest_name cannot be empty".to_string(),
        ));
    }

    // Extractor validation
    if !config.extractor.url_template.contains("{id}") {
        return Err(ConfigError::ValidationError(
            "extractor.url_template must contain {id}".to_string(),
        ));
    }
    if config.extractor.audio_format.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "extractor.audio_format cannot be empty".to_string(),
        ));
    }

    Ok(())
}
