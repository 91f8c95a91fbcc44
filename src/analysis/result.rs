//! 分析结果容器：成功标志、数据包、摘要、警告/错误列表与元数据.
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::error::AnalysisError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub success: bool,
    pub data: IndexMap<String, Value>,
    pub summary: String,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub metadata: IndexMap<String, Value>,
}

impl Default for AnalysisResult {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisResult {
    pub fn new() -> Self {
        Self {
            success: true,
            data: IndexMap::new(),
            summary: String::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            metadata: IndexMap::new(),
        }
    }

    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), AnalysisError> {
        self.data.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Flattens a typed report into `data`, one key per top-level field.
    pub fn set_report<T: Serialize>(&mut self, report: &T) -> Result<(), AnalysisError> {
        match serde_json::to_value(report)? {
            Value::Object(fields) => {
                self.data.extend(fields);
                Ok(())
            }
            other => {
                self.data.insert("report".to_string(), other);
                Ok(())
            }
        }
    }

    /// Decodes the typed report previously stored with [`set_report`](Self::set_report).
    pub fn report<T: DeserializeOwned>(&self) -> Result<T, AnalysisError> {
        let object = self
            .data
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<serde_json::Map<_, _>>();
        Ok(serde_json::from_value(Value::Object(object))?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.warnings.push(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.success = false;
        self.errors.push(message.into());
    }

    pub fn fail(&mut self, err: &AnalysisError) {
        self.error(err.to_string());
    }

    pub fn set_metadata<T: Serialize>(&mut self, key: &str, value: &T) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.metadata.insert(key.to_string(), value);
    }

    pub fn analysis_time(&self) -> Option<f64> {
        self.metadata.get("analysis_time").and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        count: usize,
        labels: Vec<String>,
    }

    #[test]
    fn report_round_trips_through_data_bag() {
        let mut result = AnalysisResult::new();
        let sample = Sample {
            count: 2,
            labels: vec!["a".into(), "b".into()],
        };
        result.set_report(&sample).unwrap();

        assert_eq!(result.get("count"), Some(&Value::from(2)));
        assert_eq!(result.report::<Sample>().unwrap(), sample);
    }

    #[test]
    fn errors_clear_success_but_warnings_do_not() {
        let mut result = AnalysisResult::new();
        result.warn("low coverage");
        assert!(result.success);

        result.fail(&AnalysisError::UnknownNode("X".into()));
        assert!(!result.success);
        assert_eq!(result.errors, vec!["unknown node 'X'".to_string()]);
    }
}
