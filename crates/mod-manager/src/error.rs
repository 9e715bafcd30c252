//! Library error type.

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("reqwest error: {0}")]
	Reqwest(#[from] reqwest::Error),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	SerdeJSON(#[from] serde_json::Error),
	#[error("zip error: {0}")]
	Zip(#[from] zip::result::ZipError),
	#[error("regex error: {0}")]
	Regex(#[from] regex::Error),
	#[error("parsing error: {0}")]
	Parse(String),
	#[error("incompatible dependencies: `{0}` and `{1}`")]
	IncompatibleDependencies(crate::dependency::Dependency, crate::dependency::Dependency),
	#[error("unresolved dependency: `{0}`")]
	UnresolvedDependency(crate::dependency::Dependency),
	#[error("mod not installed: {0}")]
	NotInstalled(String),
	#[error("not found: {0}")]
	NotFound(String),
	#[error("scan error: {0}")]
	Scan(#[from] crate::package::ScanError),
	#[error("hash mismatch for {file}: expected {expected} got {got}")]
	HashMismatch {
		file: String,
		expected: String,
		got: String,
	},
}
