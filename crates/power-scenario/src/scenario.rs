//! Scenario definitions, step parameters and the scenario registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use power_core::error::{PowerError, PowerResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::builtins;
use crate::steps::StepLibrary;

/// Free-form step parameters with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepParameters(Map<String, Value>);

impl StepParameters {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Numeric parameter.
    pub fn f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Non-negative integer parameter.
    pub fn u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    /// String parameter.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Boolean parameter.
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Duration given as a humantime string ("2s", "500ms") or as seconds.
    pub fn duration(&self, key: &str) -> PowerResult<Option<Duration>> {
        let Some(value) = self.0.get(key) else {
            return Ok(None);
        };
        match value {
            Value::Number(n) => n
                .as_f64()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .map(Some)
                .ok_or_else(|| {
                    PowerError::config(format!(
                        "parameter '{key}' must be a non-negative number of seconds within range"
                    ))
                }),
            Value::String(_) => humantime_serde::deserialize::<Duration, _>(value.clone())
                .map(Some)
                .map_err(|e| PowerError::config(format!("parameter '{key}': {e}"))),
            _ => Err(PowerError::config(format!(
                "parameter '{key}' must be a duration"
            ))),
        }
    }

    /// List of strings, from an array or a comma-separated string.
    pub fn strings(&self, key: &str) -> Option<Vec<String>> {
        match self.0.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            Value::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// One step of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Display name
    pub name: String,
    /// Expected duration; the default for time-based actions
    #[serde(default, with = "humantime_serde")]
    pub nominal_duration: Duration,
    /// Executor id
    #[serde(rename = "action")]
    pub action_id: String,
    /// Action parameters
    #[serde(default)]
    pub parameters: StepParameters,
}

impl Step {
    /// Create a step with no parameters.
    pub fn new(name: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nominal_duration: Duration::ZERO,
            action_id: action_id.into(),
            parameters: StepParameters::new(),
        }
    }

    /// Set the nominal duration.
    pub fn lasting(mut self, duration: Duration) -> Self {
        self.nominal_duration = duration;
        self
    }

    /// Add a parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key, value);
        self
    }
}

/// Named, ordered list of steps. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    /// Registry key
    pub name: String,
    /// Human description
    #[serde(default)]
    pub description: String,
    /// Steps in execution order
    pub steps: Vec<Step>,
}

impl ScenarioDefinition {
    /// Create a scenario.
    pub fn new(name: impl Into<String>, description: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps,
        }
    }

    /// Sum of the steps' nominal durations.
    pub fn nominal_duration(&self) -> Duration {
        self.steps
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.nominal_duration))
    }

    /// Check that the scenario is non-empty and every step has a known,
    /// correctly parameterized action.
    pub fn validate(&self, library: &StepLibrary) -> PowerResult<()> {
        if self.name.trim().is_empty() {
            return Err(PowerError::config("scenario name must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(PowerError::config(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }
        for step in &self.steps {
            let executor = library
                .get(&step.action_id)
                .ok_or_else(|| PowerError::UnknownAction {
                    step: step.name.clone(),
                    action: step.action_id.clone(),
                })?;
            executor.validate(step).map_err(|e| {
                PowerError::config(format!(
                    "scenario '{}' step '{}': {e}",
                    self.name, step.name
                ))
            })?;
        }
        Ok(())
    }
}

/// Scenarios by name.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: BTreeMap<String, Arc<ScenarioDefinition>>,
}

impl ScenarioRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in scenarios.
    pub fn with_builtins(library: &StepLibrary) -> PowerResult<Self> {
        let mut registry = Self::new();
        for scenario in builtins::all() {
            registry.register(scenario, library)?;
        }
        Ok(registry)
    }

    /// Validate and add (or replace) a scenario.
    pub fn register(
        &mut self,
        scenario: ScenarioDefinition,
        library: &StepLibrary,
    ) -> PowerResult<Arc<ScenarioDefinition>> {
        scenario.validate(library)?;
        let scenario = Arc::new(scenario);
        if self
            .scenarios
            .insert(scenario.name.clone(), Arc::clone(&scenario))
            .is_some()
        {
            tracing::info!(scenario = %scenario.name, "scenario definition replaced");
        }
        Ok(scenario)
    }

    /// Look up a scenario.
    pub fn get(&self, name: &str) -> PowerResult<Arc<ScenarioDefinition>> {
        self.scenarios
            .get(name)
            .cloned()
            .ok_or_else(|| PowerError::UnknownScenario(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    /// Registered scenarios, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ScenarioDefinition>> {
        self.scenarios.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_durations() {
        let step = Step::new("w", "wait")
            .with("a", "1500ms")
            .with("b", 2.5)
            .with("c", true);
        assert_eq!(
            step.parameters.duration("a").unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            step.parameters.duration("b").unwrap(),
            Some(Duration::from_millis(2500))
        );
        assert!(step.parameters.duration("c").is_err());
        assert_eq!(step.parameters.duration("missing").unwrap(), None);
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        let step = Step::new("w", "wait")
            .with("huge", 1e20)
            .with("negative", -1.0);
        assert!(matches!(
            step.parameters.duration("huge"),
            Err(PowerError::Configuration(_))
        ));
        assert!(matches!(
            step.parameters.duration("negative"),
            Err(PowerError::Configuration(_))
        ));

        let library = StepLibrary::standard();
        let scenario = ScenarioDefinition::new(
            "huge",
            "",
            vec![Step::new("w", "wait").with("duration", 1e20)],
        );
        assert!(matches!(
            scenario.validate(&library),
            Err(PowerError::Configuration(_))
        ));
    }

    #[test]
    fn test_nominal_duration_saturates() {
        let scenario = ScenarioDefinition::new(
            "long",
            "",
            vec![
                Step::new("a", "wait").lasting(Duration::MAX),
                Step::new("b", "wait").lasting(Duration::from_secs(1)),
            ],
        );
        assert_eq!(scenario.nominal_duration(), Duration::MAX);
    }

    #[test]
    fn test_parameter_strings() {
        let step = Step::new("a", "acquire")
            .with("list", vec!["ai0", "ai1"])
            .with("csv", "ai2, ai3");
        assert_eq!(step.parameters.strings("list").unwrap(), vec!["ai0", "ai1"]);
        assert_eq!(step.parameters.strings("csv").unwrap(), vec!["ai2", "ai3"]);
    }

    #[test]
    fn test_builtins_registered() {
        let library = StepLibrary::standard();
        let registry = ScenarioRegistry::with_builtins(&library).unwrap();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["idle_wait", "phone_app", "screen_on_off"]);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let library = StepLibrary::standard();
        let mut registry = ScenarioRegistry::new();
        let bad = ScenarioDefinition::new("bad", "", vec![Step::new("x", "teleport")]);
        assert!(matches!(
            registry.register(bad, &library),
            Err(PowerError::UnknownAction { .. })
        ));
        assert!(matches!(
            registry.get("bad"),
            Err(PowerError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_step_deserialize() {
        let step: Step = serde_json::from_str(
            r#"{"name": "stabilize", "action": "wait", "nominal_duration": "20s"}"#,
        )
        .unwrap();
        assert_eq!(step.action_id, "wait");
        assert_eq!(step.nominal_duration, Duration::from_secs(20));
        assert!(step.parameters.u64("anything").is_none());
    }

    #[test]
    fn test_scenario_from_toml() {
        let scenario: ScenarioDefinition = toml::from_str(
            r#"
            name = "bench_check"
            description = "supply and a short capture"

            [[steps]]
            name = "supply"
            action = "set_voltage"
            nominal_duration = "2s"
            parameters = { voltage = 3.8 }

            [[steps]]
            name = "capture"
            action = "acquire"
            parameters = { duration = "10s", channels = ["VBAT"] }
            "#,
        )
        .unwrap();
        assert_eq!(scenario.steps.len(), 2);
        assert_eq!(scenario.steps[0].parameters.f64("voltage"), Some(3.8));
        assert_eq!(
            scenario.steps[1].parameters.duration("duration").unwrap(),
            Some(Duration::from_secs(10))
        );
        scenario.validate(&StepLibrary::standard()).unwrap();
    }
}
