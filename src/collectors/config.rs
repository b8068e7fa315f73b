use std::collections::BTreeMap;

/// Explicit collector overrides taken from configuration
/// (`--collector.<name>` / `--no-collector.<name>`).
///
/// Only toggles the user actually asked for are recorded; collectors not
/// mentioned keep their registry default.
#[derive(Clone, Debug, Default)]
pub struct CollectorConfig {
    overrides: BTreeMap<String, bool>,
}

impl CollectorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_override(mut self, name: &str, enabled: bool) -> Self {
        self.overrides.insert(name.to_string(), enabled);
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, collectors: &[String]) -> Self {
        for name in collectors {
            self.overrides.insert(name.clone(), true);
        }
        self
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&str, bool)> {
        self.overrides
            .iter()
            .map(|(name, enabled)| (name.as_str(), *enabled))
    }
}
