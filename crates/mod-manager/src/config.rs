//! Runtime options for the mod manager.

use std::sync::OnceLock;

use regex::Regex;

use crate::registry::Credentials;

pub const DEFAULT_PORTAL_URL: &str = "https://mods.factorio.com";

/// Directories, versions and policies the manager runs against.
pub struct ManagerOptions {
	/// Writable directory holding user mods and `mod-list.json`.
	mods_dir: std::path::PathBuf,
	/// Read-only directory of content shipped with the game.
	read_dir: std::path::PathBuf,
	/// Full version of the running game, e.g. `"1.1.101"`.
	game_version: String,
	/// Whether newly discovered mods start out enabled.
	enable_new_mods: bool,
	portal_url: String,
	credentials: Option<Credentials>,
}

impl ManagerOptions {
	pub fn new(
		mods_dir: impl Into<std::path::PathBuf>,
		read_dir: impl Into<std::path::PathBuf>,
		game_version: impl Into<String>,
	) -> Self {
		ManagerOptions {
			mods_dir: mods_dir.into(),
			read_dir: read_dir.into(),
			game_version: game_version.into(),
			enable_new_mods: false,
			portal_url: DEFAULT_PORTAL_URL.to_string(),
			credentials: None,
		}
	}

	pub fn mods_dir(&self) -> &std::path::Path {
		&self.mods_dir
	}

	pub fn read_dir(&self) -> &std::path::Path {
		&self.read_dir
	}

	pub fn ledger_path(&self) -> std::path::PathBuf {
		self.mods_dir.join("mod-list.json")
	}

	pub fn game_version(&self) -> &str {
		&self.game_version
	}

	/// The `major.minor` prefix of the game version, which is what mods
	/// declare compatibility against.
	pub fn host_version(&self) -> String {
		static RE: OnceLock<Regex> = OnceLock::new();
		let re = RE.get_or_init(|| Regex::new(r"\d+\.\d+").expect("static regex"));
		re.find(&self.game_version)
			.map(|m| m.as_str().to_string())
			.unwrap_or_else(|| self.game_version.clone())
	}

	pub fn enable_new_mods(&self) -> bool {
		self.enable_new_mods
	}

	pub fn set_enable_new_mods(&mut self, enable_new_mods: bool) {
		self.enable_new_mods = enable_new_mods;
	}

	pub fn portal_url(&self) -> &str {
		&self.portal_url
	}

	pub fn set_portal_url(&mut self, portal_url: impl Into<String>) {
		self.portal_url = portal_url.into();
	}

	pub fn credentials(&self) -> Option<&Credentials> {
		self.credentials.as_ref()
	}

	pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
		self.credentials = credentials;
	}
}
