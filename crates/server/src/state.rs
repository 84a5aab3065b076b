use mixtape_core::{AcquisitionService, Config, SanitizedConfig};

/// Shared application state
pub struct AppState {
    service: AcquisitionService,
}

impl AppState {
    pub fn new(service: AcquisitionService) -> Self {
        Self { service }
    }

    pub fn config(&self) -> &Config {
        self.service.config()
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(self.config())
    }

    pub fn service(&self) -> &AcquisitionService {
        &self.service
    }
}
