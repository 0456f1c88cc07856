use sluice_core::AppError;

/// Connection pool settings for archive databases.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { max_connections: 1 }
    }
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `SLUICE_ARCHIVE_MAX_CONNECTIONS` (optional, defaults to 1)
    pub fn from_env() -> Result<Self, AppError> {
        let max_connections = match std::env::var("SLUICE_ARCHIVE_MAX_CONNECTIONS") {
            Err(_) => Self::default().max_connections,
            Ok(raw) => {
                let parsed: u32 = raw.parse().map_err(|_| {
                    AppError::Config(format!(
                        "Invalid SLUICE_ARCHIVE_MAX_CONNECTIONS '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(AppError::Config(
                        "SLUICE_ARCHIVE_MAX_CONNECTIONS must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        Ok(Self { max_connections })
    }
}
