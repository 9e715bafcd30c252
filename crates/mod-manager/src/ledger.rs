//! The `mod-list.json` enablement ledger.

use serde::Deserialize;
use serde::Serialize;

/// Enabled state and optional pinned version for one mod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
	pub name: String,
	pub enabled: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFile {
	pub mods: Vec<LedgerEntry>,
}

/// Reads the ledger; a missing file is an empty ledger.
pub fn load(path: &std::path::Path) -> crate::Result<LedgerFile> {
	match std::fs::read_to_string(path) {
		Ok(text) => Ok(serde_json::from_str(&text)?),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LedgerFile::default()),
		Err(e) => Err(e.into()),
	}
}

pub fn save(path: &std::path::Path, ledger: &LedgerFile) -> crate::Result<()> {
	let text = serde_json::to_string_pretty(ledger)?;
	std::fs::write(path, text)?;
	Ok(())
}
