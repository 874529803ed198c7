use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Outcome of a test as reported by the test runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestStatus {
	Running,
	Passed,
	Failed,
}

impl TestStatus {
	fn parse(value: &str) -> Option<Self> {
		match value {
			"running" => Some(TestStatus::Running),
			"passed" => Some(TestStatus::Passed),
			"failed" => Some(TestStatus::Failed),
			_ => None,
		}
	}
}

/// The test a lifecycle hook is called for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
	pub title: String,
	pub full_name: String,
	pub status: TestStatus,
}

impl TestSummary {
	pub fn new(title: impl Into<String>, full_name: impl Into<String>, status: TestStatus) -> Self {
		Self {
			title: title.into(),
			full_name: full_name.into(),
			status,
		}
	}

	pub fn running(title: impl Into<String>, full_name: impl Into<String>) -> Self {
		Self::new(title, full_name, TestStatus::Running)
	}

	/// Validates a summary coming from the test runner.
	///
	/// # Errors
	///
	/// [`Error::InvalidTestSummary`] naming the first offending field.
	pub fn parse(value: &Value) -> Result<Self> {
		let Some(object) = value.as_object() else {
			return Err(Error::InvalidTestSummary(format!(
				"expected an object, got {value}"
			)));
		};

		let field = |name: &str| -> Result<&str> {
			match object.get(name) {
				Some(Value::String(s)) => Ok(s.as_str()),
				Some(other) => Err(Error::InvalidTestSummary(format!(
					"{name} should be a string, got {other}"
				))),
				None => Err(Error::InvalidTestSummary(format!("{name} is missing"))),
			}
		};

		let title = field("title")?;
		let full_name = field("fullName")?;
		let status = field("status")?;
		let status = TestStatus::parse(status).ok_or_else(|| {
			Error::InvalidTestSummary(format!(
				"status should be one of running, passed, failed; got {status:?}"
			))
		})?;

		Ok(Self::new(title, full_name, status))
	}
}
