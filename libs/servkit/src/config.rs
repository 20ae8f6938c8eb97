//! Orchestrator settings, applied fluently before startup.

use std::sync::Arc;

use http::request::Parts;

/// Turns an escaped handler error into the JSON body served to the client.
/// Consumed by external error middleware, not by the core itself.
pub type ErrorTransformer =
    Arc<dyn Fn(&Parts, &anyhow::Error) -> serde_json::Value + Send + Sync>;

/// Service-level knobs with conventional defaults.
#[derive(Clone)]
pub struct ServiceSettings {
    app_name: String,
    primary_port: u16,
    health_port: u16,
    exit_signals: Vec<String>,
    error_transformer: Option<ErrorTransformer>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            app_name: "service".to_owned(),
            primary_port: 3000,
            health_port: 5678,
            exit_signals: vec!["SIGINT".to_owned(), "SIGTERM".to_owned()],
            error_transformer: None,
        }
    }
}

impl std::fmt::Debug for ServiceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSettings")
            .field("app_name", &self.app_name)
            .field("primary_port", &self.primary_port)
            .field("health_port", &self.health_port)
            .field("exit_signals", &self.exit_signals)
            .field(
                "error_transformer",
                &self.error_transformer.as_ref().map(|_| "<fn>"),
            )
            .finish()
    }
}

impl ServiceSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    #[must_use]
    pub fn with_primary_port(mut self, port: u16) -> Self {
        self.primary_port = port;
        self
    }

    #[must_use]
    pub fn with_health_port(mut self, port: u16) -> Self {
        self.health_port = port;
        self
    }

    /// Replaces the exit-signal list (names like `SIGINT`, `SIGTERM`).
    #[must_use]
    pub fn with_exit_signals<I, S>(mut self, signals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exit_signals = signals.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_error_transformer(mut self, transformer: ErrorTransformer) -> Self {
        self.error_transformer = Some(transformer);
        self
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    #[must_use]
    pub fn primary_port(&self) -> u16 {
        self.primary_port
    }

    #[must_use]
    pub fn health_port(&self) -> u16 {
        self.health_port
    }

    #[must_use]
    pub fn exit_signals(&self) -> &[String] {
        &self.exit_signals
    }

    #[must_use]
    pub fn error_transformer(&self) -> Option<&ErrorTransformer> {
        self.error_transformer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_conventions() {
        let s = ServiceSettings::default();
        assert_eq!(s.app_name(), "service");
        assert_eq!(s.primary_port(), 3000);
        assert_eq!(s.health_port(), 5678);
        assert_eq!(s.exit_signals(), ["SIGINT", "SIGTERM"]);
        assert!(s.error_transformer().is_none());
    }

    #[test]
    fn fluent_setters_chain() {
        let s = ServiceSettings::new()
            .with_app_name("billing")
            .with_primary_port(8080)
            .with_health_port(8081)
            .with_exit_signals(["SIGTERM"]);
        assert_eq!(s.app_name(), "billing");
        assert_eq!(s.primary_port(), 8080);
        assert_eq!(s.health_port(), 8081);
        assert_eq!(s.exit_signals(), ["SIGTERM"]);
    }
}
