//! The remote mod portal.
//!
//! The manager only needs two metadata operations and a download; they are a
//! trait so tests can drive resolution against an in-memory portal.

use serde::Deserialize;
use serde::Serialize;

/// The manifest excerpt a release carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseInfo {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub game_version: Option<String>,
	/// Only present in the full metadata form.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dependencies: Option<Vec<String>>,
}

/// One downloadable version of a mod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
	/// Portal-relative download path.
	pub download_url: String,
	/// Always `{name}_{version}.zip` in practice.
	pub file_name: String,
	pub version: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sha256: Option<String>,
	pub info_json: ReleaseInfo,
}

/// Portal metadata for one mod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalMod {
	pub name: String,
	pub releases: Vec<Release>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalListResult {
	pub results: Vec<PortalMod>,
}

/// Credentials appended to download requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
	pub username: String,
	pub token: String,
}

/// Metadata and archive access to the mod portal.
pub trait Registry {
	/// Batched metadata lookup. Releases carry no dependency lists; names the
	/// portal does not know are silently absent from the result.
	fn fetch_batch(&self, names: &[String]) -> crate::Result<Vec<PortalMod>>;
	/// Full metadata for one mod, releases include dependency lists.
	fn fetch_full(&self, name: &str) -> crate::Result<PortalMod>;
	/// Downloads a release archive to `dest`, verifying the declared hash
	/// when present.
	fn download(&self, release: &Release, dest: &std::path::Path) -> crate::Result<()>;
}

/// [`Registry`] implementation over the portal's HTTP API.
///
/// Dependency expansion issues many small sequential requests, so a single
/// pooled client is kept for the life of the registry and a request failing
/// on a dropped connection is re-issued once before the error surfaces.
pub struct PortalRegistry {
	base_url: String,
	client: reqwest::blocking::Client,
	credentials: Option<Credentials>,
}

impl PortalRegistry {
	pub fn new(base_url: impl Into<String>, credentials: Option<Credentials>) -> crate::Result<Self> {
		let base_url = base_url.into();
		let base_url = base_url.trim_end_matches('/').to_string();
		let client = reqwest::blocking::Client::builder().build()?;
		Ok(PortalRegistry {
			base_url,
			client,
			credentials,
		})
	}

	fn get(&self, url: &str, query: &[(&str, &str)]) -> crate::Result<reqwest::blocking::Response> {
		match self.client.get(url).query(query).send() {
			Ok(response) => Ok(response.error_for_status()?),
			Err(e) if e.is_connect() || e.is_timeout() => {
				log::debug!("Retrying {} after connection error: {}", url, e);
				Ok(self.client.get(url).query(query).send()?.error_for_status()?)
			}
			Err(e) => Err(e.into()),
		}
	}
}

impl Registry for PortalRegistry {
	fn fetch_batch(&self, names: &[String]) -> crate::Result<Vec<PortalMod>> {
		if names.is_empty() {
			return Ok(Vec::new());
		}
		let namelist = names.join(",");
		log::debug!("Fetching portal metadata for {}", namelist);
		let response = self.get(&format!("{}/api/mods", self.base_url), &[("namelist", &namelist)])?;
		let list: PortalListResult = response.json()?;
		Ok(list.results)
	}

	fn fetch_full(&self, name: &str) -> crate::Result<PortalMod> {
		log::debug!("Fetching full portal metadata for {}", name);
		let response = self.get(&format!("{}/api/mods/{}/full", self.base_url, name), &[])?;
		Ok(response.json()?)
	}

	fn download(&self, release: &Release, dest: &std::path::Path) -> crate::Result<()> {
		log::info!("Downloading {} to {}", release.file_name, dest.display());
		let url = format!("{}{}", self.base_url, release.download_url);
		let mut query = Vec::new();
		if let Some(credentials) = &self.credentials {
			query.push(("username", credentials.username.as_str()));
			query.push(("token", credentials.token.as_str()));
		}
		let mut response = self.get(&url, &query)?;
		let mut file = std::fs::File::create(dest)?;
		response.copy_to(&mut file)?;
		drop(file);
		verify_download(release, dest)?;
		Ok(())
	}
}

/// Checks a downloaded archive against the release's declared hash, deleting
/// the file on mismatch.
pub fn verify_download(release: &Release, path: &std::path::Path) -> crate::Result<()> {
	let Some(expected) = &release.sha256 else {
		return Ok(());
	};
	let content = std::fs::read(path)?;
	let got = sha256::digest(content.as_slice());
	if &got != expected {
		log::warn!("Discarding corrupt download {}", path.display());
		let _ = std::fs::remove_file(path);
		return Err(crate::Error::HashMismatch {
			file: release.file_name.clone(),
			expected: expected.clone(),
			got,
		});
	}
	Ok(())
}
