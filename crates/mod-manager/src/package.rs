//! Local and remote mod representations.
//!
//! Installed mods live either as plain directories or as zip archives with a
//! single top level directory; both are driven through [`PackageSource`] so
//! nothing above this module branches on the storage kind.

use std::io::Read;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::dependency::DependencySet;
use crate::registry::Release;
use crate::version::ModVersion;

/// A mod's `info.json` manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModInfo {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub game_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dependencies: Option<Vec<String>>,
}

/// Errors from scanning a local path for a mod.
///
/// `NotAModPath` and `GameVersionMismatch` are expected during a storage scan
/// and are skipped there; everything else propagates.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
	#[error("not a mod path: {0}")]
	NotAModPath(std::path::PathBuf),
	#[error("mod {0} targets game version {1:?}")]
	GameVersionMismatch(String, Option<String>),
	#[error("mod path {path} does not match manifest {name} {version}")]
	PathNameMismatch {
		path: std::path::PathBuf,
		name: String,
		version: String,
	},
	#[error("invalid manifest: {0}")]
	Manifest(#[source] Box<crate::Error>),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("zip error: {0}")]
	Zip(#[from] zip::result::ZipError),
}

/// One segment of a file search pattern inside a mod's tree.
#[derive(Debug, Clone)]
pub enum PathSegment {
	Literal(String),
	Pattern(Regex),
}

fn fancy_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| Regex::new(r"[*.?()\[\]]").expect("static regex"))
}

impl PathSegment {
	/// Splits a `/` separated pattern. Segments containing regex
	/// metacharacters match as anchored regexes, the rest literally.
	pub fn parse_pattern(pattern: &str) -> crate::Result<Vec<PathSegment>> {
		pattern
			.split('/')
			.map(|part| {
				if fancy_regex().is_match(part) {
					Ok(PathSegment::Pattern(Regex::new(&format!("^(?:{})$", part))?))
				} else {
					Ok(PathSegment::Literal(part.to_string()))
				}
			})
			.collect()
	}

	pub fn matches(&self, name: &str) -> bool {
		match self {
			PathSegment::Literal(literal) => literal == name,
			PathSegment::Pattern(re) => re.is_match(name),
		}
	}
}

/// A file found inside a mod, on disk or inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoundFile {
	Disk(std::path::PathBuf),
	Zipped {
		archive: std::path::PathBuf,
		entry: String,
	},
}

impl FoundFile {
	pub fn file_name(&self) -> Option<&str> {
		match self {
			FoundFile::Disk(path) => path.file_name().and_then(|n| n.to_str()),
			FoundFile::Zipped { entry, .. } => entry.rsplit('/').next(),
		}
	}

	pub fn read(&self) -> crate::Result<Vec<u8>> {
		match self {
			FoundFile::Disk(path) => Ok(std::fs::read(path)?),
			FoundFile::Zipped { archive, entry } => {
				let file = std::fs::File::open(archive)?;
				let mut zip = zip::ZipArchive::new(file)?;
				let mut entry = zip.by_name(entry)?;
				let mut buffer = Vec::new();
				entry.read_to_end(&mut buffer)?;
				Ok(buffer)
			}
		}
	}
}

/// Storage backing an installed mod.
pub trait PackageSource: std::fmt::Debug {
	/// Reads the manifest at the package root, `None` when absent.
	fn read_manifest(&self) -> Result<Option<ModInfo>, ScanError>;
	/// Enumerates files whose path under the package root matches `parts`.
	fn find_files(&self, parts: &[PathSegment]) -> Result<Vec<FoundFile>, ScanError>;
}

/// A mod stored as a plain directory.
#[derive(Debug)]
pub struct DirSource {
	root: std::path::PathBuf,
}

impl DirSource {
	pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
		DirSource { root: root.into() }
	}
}

impl PackageSource for DirSource {
	fn read_manifest(&self) -> Result<Option<ModInfo>, ScanError> {
		let manifest_path = self.root.join("info.json");
		let text = match std::fs::read_to_string(&manifest_path) {
			Ok(text) => text,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		Ok(Some(serde_json::from_str(&text)?))
	}

	fn find_files(&self, parts: &[PathSegment]) -> Result<Vec<FoundFile>, ScanError> {
		fn descend(
			parts: &[PathSegment],
			path: &std::path::Path,
			found: &mut Vec<FoundFile>,
		) -> Result<(), ScanError> {
			let Some(part) = parts.first() else {
				if path.is_file() {
					found.push(FoundFile::Disk(path.to_path_buf()));
				}
				return Ok(());
			};
			if !path.is_dir() {
				return Ok(());
			}
			match part {
				PathSegment::Literal(name) => descend(&parts[1..], &path.join(name), found),
				PathSegment::Pattern(_) => {
					for entry in std::fs::read_dir(path)? {
						let entry = entry?;
						if let Some(name) = entry.file_name().to_str() {
							if part.matches(name) {
								descend(&parts[1..], &entry.path(), found)?;
							}
						}
					}
					Ok(())
				}
			}
		}
		let mut found = Vec::new();
		descend(parts, &self.root, &mut found)?;
		Ok(found)
	}
}

/// A mod stored as a zip archive with a single top level directory.
#[derive(Debug)]
pub struct ZipSource {
	archive: std::path::PathBuf,
	/// Top level directory inside the archive, with trailing slash.
	root: String,
}

impl ZipSource {
	pub fn open(path: &std::path::Path) -> Result<Self, ScanError> {
		let file = std::fs::File::open(path)?;
		let zip = zip::ZipArchive::new(file).map_err(|e| match e {
			zip::result::ZipError::InvalidArchive(_) => ScanError::NotAModPath(path.to_path_buf()),
			other => ScanError::Zip(other),
		})?;
		let root = zip
			.file_names()
			.next()
			.and_then(|name| name.split('/').next())
			.filter(|first| !first.is_empty())
			.map(|first| format!("{}/", first))
			.ok_or_else(|| ScanError::NotAModPath(path.to_path_buf()))?;
		Ok(ZipSource {
			archive: path.to_path_buf(),
			root,
		})
	}
}

impl PackageSource for ZipSource {
	fn read_manifest(&self) -> Result<Option<ModInfo>, ScanError> {
		let file = std::fs::File::open(&self.archive)?;
		let mut zip = zip::ZipArchive::new(file)?;
		let entry = match zip.by_name(&format!("{}info.json", self.root)) {
			Ok(entry) => entry,
			Err(zip::result::ZipError::FileNotFound) => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		Ok(Some(serde_json::from_reader(entry)?))
	}

	fn find_files(&self, parts: &[PathSegment]) -> Result<Vec<FoundFile>, ScanError> {
		let file = std::fs::File::open(&self.archive)?;
		let zip = zip::ZipArchive::new(file)?;
		let mut found = Vec::new();
		for name in zip.file_names() {
			if name.ends_with('/') {
				continue;
			}
			let Some(relative) = name.strip_prefix(&self.root) else {
				continue;
			};
			let components: Vec<&str> = relative.split('/').collect();
			if components.len() != parts.len() {
				continue;
			}
			if components.iter().copied().zip(parts).all(|(component, part)| part.matches(component)) {
				found.push(FoundFile::Zipped {
					archive: self.archive.clone(),
					entry: name.to_string(),
				});
			}
		}
		Ok(found)
	}
}

/// Host state a scan validates against.
#[derive(Debug, Clone)]
pub struct ScanContext {
	/// `major.minor` version mods declare compatibility against.
	pub host_version: String,
	/// Full version of the running game, used for the `core` package.
	pub game_version: String,
	/// Directory of content shipped with the game itself.
	pub read_dir: std::path::PathBuf,
}

/// A mod present on disk.
#[derive(Debug)]
pub struct InstalledMod {
	pub info: ModInfo,
	pub version: ModVersion,
	pub dependencies: DependencySet,
	/// The scanned path, directory or archive.
	pub path: std::path::PathBuf,
	/// Lives in the read dir, shipped with the game and never updated.
	pub built_in: bool,
	source: Box<dyn PackageSource + Send + Sync>,
}

impl InstalledMod {
	/// Reads a mod from a directory or zip archive.
	///
	/// The path's file name must agree with the manifest as
	/// `name(_version(.zip)?)?`. Mods under the read dir are pinned to the
	/// host's version; the `core` package takes its version from the host.
	pub fn scan(path: &std::path::Path, ctx: &ScanContext) -> Result<InstalledMod, ScanError> {
		let source: Box<dyn PackageSource + Send + Sync> = if path.is_file() {
			Box::new(ZipSource::open(path)?)
		} else if path.is_dir() {
			Box::new(DirSource::new(path))
		} else {
			return Err(ScanError::NotAModPath(path.to_path_buf()));
		};
		let mut info = source
			.read_manifest()?
			.ok_or_else(|| ScanError::NotAModPath(path.to_path_buf()))?;

		let file_name = path
			.file_name()
			.and_then(|n| n.to_str())
			.ok_or_else(|| ScanError::NotAModPath(path.to_path_buf()))?;
		if file_name == "core" {
			/* The core package ships without its own version, it is the game. */
			info.version = Some(ctx.game_version.clone());
		}
		let built_in = path.parent() == Some(ctx.read_dir.as_path());
		if built_in {
			info.game_version = Some(ctx.host_version.clone());
		}

		let version_text = info.version.clone().ok_or_else(|| {
			ScanError::Manifest(Box::new(crate::Error::Parse(format!(
				"manifest for {} is missing a version",
				info.name
			))))
		})?;
		let versioned = format!("{}_{}", info.name, version_text);
		if file_name != info.name && file_name != versioned && file_name != format!("{}.zip", versioned) {
			return Err(ScanError::PathNameMismatch {
				path: path.to_path_buf(),
				name: info.name.clone(),
				version: version_text,
			});
		}

		match &info.game_version {
			Some(v) if *v == ctx.host_version => {}
			other => return Err(ScanError::GameVersionMismatch(info.name.clone(), other.clone())),
		}

		let version = ModVersion::new(&version_text)
			.map_err(|e| ScanError::Manifest(Box::new(e)))?;
		let dependency_strings = info
			.dependencies
			.clone()
			.unwrap_or_else(|| vec!["base".to_string()]);
		let dependencies = DependencySet::parse_all(&dependency_strings)
			.map_err(|e| ScanError::Manifest(Box::new(e)))?;

		Ok(InstalledMod {
			info,
			version,
			dependencies,
			path: path.to_path_buf(),
			built_in,
			source,
		})
	}

	pub fn name(&self) -> &str {
		&self.info.name
	}

	pub fn find_files(&self, parts: &[PathSegment]) -> crate::Result<Vec<FoundFile>> {
		Ok(self.source.find_files(parts)?)
	}
}

/// A mod known only from registry metadata.
#[derive(Debug, Clone)]
pub struct RemoteMod {
	pub name: String,
	pub version: ModVersion,
	/// `None` when the release came from the batched metadata form, which
	/// omits dependency lists; the expansion loop keys off this.
	pub dependencies: Option<DependencySet>,
	pub release: Release,
}

impl RemoteMod {
	pub fn from_release(name: &str, release: Release) -> crate::Result<Self> {
		let version = ModVersion::new(&release.version)?;
		let dependencies = match &release.info_json.dependencies {
			Some(strings) => Some(DependencySet::parse_all(strings)?),
			None => None,
		};
		Ok(RemoteMod {
			name: name.to_string(),
			version,
			dependencies,
			release,
		})
	}
}

/// An entry in the package index, installed locally or known from the registry.
#[derive(Debug)]
pub enum Mod {
	Installed(InstalledMod),
	Remote(RemoteMod),
}

impl Mod {
	pub fn name(&self) -> &str {
		match self {
			Mod::Installed(m) => m.name(),
			Mod::Remote(m) => &m.name,
		}
	}

	pub fn version(&self) -> ModVersion {
		match self {
			Mod::Installed(m) => m.version,
			Mod::Remote(m) => m.version,
		}
	}

	/// Declared dependencies, `None` when they are not known yet.
	pub fn dependencies(&self) -> Option<&DependencySet> {
		match self {
			Mod::Installed(m) => Some(&m.dependencies),
			Mod::Remote(m) => m.dependencies.as_ref(),
		}
	}

	pub fn is_installed(&self) -> bool {
		matches!(self, Mod::Installed(_))
	}

	pub fn as_installed(&self) -> Option<&InstalledMod> {
		match self {
			Mod::Installed(m) => Some(m),
			Mod::Remote(_) => None,
		}
	}
}
