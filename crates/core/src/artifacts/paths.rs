use std::path::{Path, PathBuf};

use super::TestSummary;

/// Longest directory name written for a test.
const MAX_NAME_BYTES: usize = 255;

/// Decides where artifacts end up on the machine running the tests.
///
/// Every test gets its own directory under the root, named after the test's
/// full name with characters that are not portable in file names replaced.
#[derive(Debug, Clone)]
pub struct ArtifactPathBuilder {
	root: PathBuf,
}

impl ArtifactPathBuilder {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	/// `artifacts/<configuration>.<timestamp>` relative to the working directory.
	pub fn default_root(configuration: &str) -> PathBuf {
		let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%SZ");
		PathBuf::from("artifacts").join(format!("{}.{}", sanitize(configuration), timestamp))
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Path of an artifact that belongs to the whole run.
	pub fn run_artifact(&self, file_name: &str) -> PathBuf {
		self.root.join(sanitize(file_name))
	}

	/// Path of an artifact of one test.
	pub fn test_artifact(&self, test: &TestSummary, file_name: &str) -> PathBuf {
		self.root
			.join(sanitize(&test.full_name))
			.join(sanitize(file_name))
	}
}

fn sanitize(name: &str) -> String {
	let mut cleaned: String = name
		.trim()
		.chars()
		.map(|c| match c {
			'/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
			c if c.is_control() => '_',
			c => c,
		})
		.collect();

	if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
		cleaned = "_".repeat(cleaned.len().max(1));
	}

	if cleaned.len() > MAX_NAME_BYTES {
		let mut end = MAX_NAME_BYTES;
		while !cleaned.is_char_boundary(end) {
			end -= 1;
		}
		cleaned.truncate(end);
	}
	cleaned
}
