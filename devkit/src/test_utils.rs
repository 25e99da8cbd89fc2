/*!
Test harness for the agent

Bundles source fixtures and an optional stub collector, builds the
environment the agent reads its configuration from, and offers polling
waits plus assertions on nested fields of delivered records.
*/

use crate::collector_stub::StubCollector;
use crate::source_fixtures::SourceFixtures;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct TestHarness {
    pub fixtures: SourceFixtures,
    pub collector: Option<StubCollector>,
}

impl TestHarness {
    /// Harness with an empty source directory
    pub fn new() -> Self {
        env_logger::try_init().ok();

        Self {
            fixtures: SourceFixtures::new().expect("failed to create fixture directory"),
            collector: None,
        }
    }

    /// Harness with a running stub collector for push tests
    pub async fn with_collector() -> Result<Self> {
        let mut harness = Self::new();
        harness.collector = Some(StubCollector::start().await?);
        Ok(harness)
    }

    pub fn collector(&self) -> &StubCollector {
        self.collector
            .as_ref()
            .expect("harness was built without a collector")
    }

    /// Environment for the agent: fast intervals, fixture sources, and the
    /// stub collector as push endpoint when there is one. `overrides` win.
    pub fn agent_env(&self, overrides: &[(&str, &str)]) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = [
            ("POLL_INTERVAL", "20ms".to_string()),
            ("DELIVERY_INTERVAL", "50ms".to_string()),
            ("SOURCE_TIMEOUT", "500ms".to_string()),
            ("DELIVERY_TIMEOUT", "500ms".to_string()),
            ("CPU_SOURCE", self.fixtures.cpu_path().display().to_string()),
            ("RAM_SOURCE", self.fixtures.ram_path().display().to_string()),
            (
                "PROCESSES_SOURCE",
                self.fixtures.processes_path().display().to_string(),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        if let Some(collector) = &self.collector {
            env.insert("API_URL".into(), collector.url());
        }
        for (key, value) in overrides {
            env.insert(key.to_string(), value.to_string());
        }
        env
    }

    /// Assert that a dotted path exists in `record`
    pub fn assert_field_exists(&self, record: &Value, field_path: &str) -> Result<()> {
        if get_nested_field(record, field_path).is_some() {
            return Ok(());
        }
        anyhow::bail!("Field '{}' not found in {}", field_path, record);
    }

    /// Assert that a dotted path holds `expected`
    pub fn assert_field_equals(
        &self,
        record: &Value,
        field_path: &str,
        expected: &Value,
    ) -> Result<()> {
        match get_nested_field(record, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!(
                "Field '{}' mismatch: expected {:?}, got {:?}",
                field_path,
                expected,
                actual
            ),
            None => anyhow::bail!("Field '{}' not found in {}", field_path, record),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= timeout {
            log::warn!("⏰ Condition still false after {:?}", timeout);
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_field_assertions() {
        let harness = TestHarness::new();
        let record = json!({"cpu": {"usage": 42.0}, "timestamp": 1});

        harness.assert_field_exists(&record, "cpu.usage").unwrap();
        harness.assert_field_equals(&record, "timestamp", &json!(1)).unwrap();
        assert!(harness.assert_field_exists(&record, "ram.usage").is_err());
        assert!(harness.assert_field_equals(&record, "cpu.usage", &json!(1.0)).is_err());
        assert!(get_nested_field(&record, "timestamp.value").is_none());
    }

    #[tokio::test]
    async fn test_agent_env_points_at_fixtures() {
        let harness = TestHarness::with_collector().await.unwrap();
        let env = harness.agent_env(&[("DELIVERY_MODE", "push"), ("POLL_INTERVAL", "5ms")]);

        assert_eq!(env["POLL_INTERVAL"], "5ms");
        assert_eq!(env["API_URL"], harness.collector().url());
        assert!(env["CPU_SOURCE"].starts_with(&harness.fixtures.dir().display().to_string()));
    }

    #[tokio::test]
    async fn test_wait_until() {
        let mut calls = 0;
        assert!(
            wait_until(Duration::from_secs(1), || {
                calls += 1;
                calls >= 3
            })
            .await
        );
        assert!(!wait_until(Duration::from_millis(30), || false).await);
    }
}
