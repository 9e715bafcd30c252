//! Mod state tracking and the dependency resolution algorithms.
//!
//! # Usage
//! 1. [`ModSession::open`] to load the ledger and scan local storage.
//! 1. [`ModManager::expand_dependencies`] to grow a requirement set to its
//!    transitive closure, fetching portal metadata as needed.
//! 1. [`ModManager::check_dependency_set`] to plan actions, then
//!    [`ModManager::apply_actions`] to carry them out.
//! 1. Drop or [`ModSession::close`] to persist the ledger.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;

use regex::Regex;

use crate::config::ManagerOptions;
use crate::dependency::Dependency;
use crate::dependency::DependencyKind;
use crate::dependency::DependencySet;
use crate::ledger;
use crate::ledger::LedgerEntry;
use crate::ledger::LedgerFile;
use crate::package::FoundFile;
use crate::package::InstalledMod;
use crate::package::Mod;
use crate::package::PathSegment;
use crate::package::RemoteMod;
use crate::package::ScanContext;
use crate::package::ScanError;
use crate::registry::PortalMod;
use crate::registry::Registry;
use crate::registry::Release;
use crate::version::ModVersion;

/// What has to happen for a checked dependency to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
	/// Already satisfied, nothing to do.
	Ok,
	Enable,
	Disable,
	Install,
	SwitchVersion,
}

/// Planned actions from a dependency check, keyed by action kind.
///
/// The per-name check logic emits exactly one action per mod name, so the
/// sets never plan contradictory work for the same mod.
pub type CheckOutcome = BTreeMap<Action, HashSet<Dependency>>;

/// Owns the enablement ledger, the package index and the resolution
/// algorithms.
///
/// Construction scans the read dir and the mods dir; paths without a
/// manifest and mods built for another game version are skipped. Ledger
/// entries with no matching mod on disk are dropped.
pub struct ModManager {
	options: ManagerOptions,
	registry: Box<dyn Registry>,
	/// `major.minor` of the running game.
	host_version: String,
	ledger: BTreeMap<String, LedgerEntry>,
	/// name -> version -> record; only ever grows within a session.
	index: HashMap<String, BTreeMap<ModVersion, Mod>>,
	modified: bool,
}

impl ModManager {
	pub fn new(options: ManagerOptions, registry: Box<dyn Registry>) -> crate::Result<Self> {
		let host_version = options.host_version();
		let ledger_file = ledger::load(&options.ledger_path())?;
		let mut ledger = BTreeMap::new();
		for entry in ledger_file.mods {
			ledger.insert(entry.name.clone(), entry);
		}
		let mut manager = ModManager {
			options,
			registry,
			host_version,
			ledger,
			index: Default::default(),
			modified: false,
		};
		manager.scan_local()?;
		manager.prune_ledger();
		Ok(manager)
	}

	pub fn options(&self) -> &ManagerOptions {
		&self.options
	}

	fn scan_context(&self) -> ScanContext {
		ScanContext {
			host_version: self.host_version.clone(),
			game_version: self.options.game_version().to_string(),
			read_dir: self.options.read_dir().to_path_buf(),
		}
	}

	fn scan_local(&mut self) -> crate::Result<()> {
		for dir in [self.options.read_dir().to_path_buf(), self.options.mods_dir().to_path_buf()] {
			for entry in std::fs::read_dir(&dir)? {
				let path = entry?.path();
				match self.add_installed_mod(&path) {
					Ok(_) => {}
					Err(ScanError::NotAModPath(path)) => {
						log::debug!("Skipping non-mod path {}", path.display());
					}
					Err(ScanError::GameVersionMismatch(name, version)) => {
						log::debug!("Skipping {}: built for game version {:?}", name, version);
					}
					Err(e) => return Err(e.into()),
				}
			}
		}
		Ok(())
	}

	/// Scans one path into the index, creating a ledger entry the first time
	/// a mod name is seen. The `core` package is never ledgered.
	fn add_installed_mod(&mut self, path: &std::path::Path) -> Result<(String, ModVersion), ScanError> {
		let ctx = self.scan_context();
		let m = InstalledMod::scan(path, &ctx)?;
		let name = m.name().to_string();
		let version = m.version;
		log::trace!("Indexed installed mod {} {}", name, version);
		self.index.entry(name.clone()).or_default().insert(version, Mod::Installed(m));
		if name != "core" && !self.ledger.contains_key(&name) {
			self.ledger.insert(
				name.clone(),
				LedgerEntry {
					name: name.clone(),
					enabled: self.options.enable_new_mods(),
					version: None,
				},
			);
			self.modified = true;
		}
		Ok((name, version))
	}

	fn prune_ledger(&mut self) {
		let before = self.ledger.len();
		let index = &self.index;
		self.ledger.retain(|name, _| index.contains_key(name));
		if self.ledger.len() != before {
			self.modified = true;
		}
	}

	/// Writes the ledger back if anything changed this session.
	pub fn persist(&self) -> crate::Result<()> {
		if !self.modified {
			return Ok(());
		}
		let file = LedgerFile {
			mods: self.ledger.values().cloned().collect(),
		};
		ledger::save(&self.options.ledger_path(), &file)?;
		log::info!("Wrote mod list to {}", self.options.ledger_path().display());
		Ok(())
	}

	/* Ledger mutations */

	pub fn enabled_names(&self) -> Vec<String> {
		self.ledger.values().filter(|m| m.enabled).map(|m| m.name.clone()).collect()
	}

	pub fn is_enabled(&self, name: &str) -> bool {
		self.ledger.get(name).map(|m| m.enabled).unwrap_or(false)
	}

	pub fn set_enabled(&mut self, name: &str, enabled: bool) -> crate::Result<()> {
		let entry = self
			.ledger
			.get_mut(name)
			.ok_or_else(|| crate::Error::NotInstalled(name.to_string()))?;
		log::trace!("Setting {} enabled = {}", name, enabled);
		entry.enabled = enabled;
		self.modified = true;
		Ok(())
	}

	pub fn enable(&mut self, name: &str) -> crate::Result<()> {
		self.set_enabled(name, true)
	}

	pub fn disable(&mut self, name: &str) -> crate::Result<()> {
		self.set_enabled(name, false)
	}

	/// Pins a mod to a specific installed version.
	pub fn select_version(&mut self, name: &str, version: ModVersion) -> crate::Result<()> {
		let entry = self
			.ledger
			.get_mut(name)
			.ok_or_else(|| crate::Error::NotInstalled(name.to_string()))?;
		log::trace!("Pinning {} to {}", name, version);
		entry.version = Some(version.to_string());
		self.modified = true;
		Ok(())
	}

	/* Lookups */

	/// The version of a mod that would load: the pinned version when set,
	/// otherwise the highest installed one.
	pub fn installed_version(&self, name: &str) -> crate::Result<ModVersion> {
		let entry = self
			.ledger
			.get(name)
			.ok_or_else(|| crate::Error::NotInstalled(name.to_string()))?;
		if let Some(pinned) = &entry.version {
			return ModVersion::new(pinned);
		}
		if let Some(versions) = self.index.get(name) {
			for (version, m) in versions.iter().rev() {
				if m.is_installed() {
					return Ok(*version);
				}
			}
		}
		Err(crate::Error::NotInstalled(name.to_string()))
	}

	pub fn current_mod(&self, name: &str) -> crate::Result<&InstalledMod> {
		let version = self.installed_version(name)?;
		self.index
			.get(name)
			.and_then(|versions| versions.get(&version))
			.and_then(Mod::as_installed)
			.ok_or_else(|| crate::Error::NotInstalled(name.to_string()))
	}

	/// The highest indexed record meeting the dependency, optionally limited
	/// to locally installed records.
	pub fn find_dep(&self, dep: &Dependency, installed_only: bool) -> Option<&Mod> {
		debug_assert!(dep.kind != DependencyKind::Conflict);
		let versions = self.index.get(&dep.name)?;
		for (version, m) in versions.iter().rev() {
			if !dep.meets(*version) {
				continue;
			}
			if installed_only && !m.is_installed() {
				continue;
			}
			return Some(m);
		}
		None
	}

	fn dep_from_mod(m: &Mod) -> Dependency {
		Dependency::exactly(m.name(), m.version())
	}

	/* Resolution */

	/// Decides what has to happen for one dependency to hold.
	///
	/// The returned dependency is the one the action applies to; for installs
	/// and version switches it is pinned to the exact version chosen.
	pub fn check_dependency(
		&self,
		dep: &Dependency,
		require_optional: bool,
	) -> crate::Result<(Action, Dependency)> {
		if dep.kind == DependencyKind::Conflict {
			if self.is_enabled(&dep.name) {
				return Ok((Action::Disable, dep.clone()));
			}
			return Ok((Action::Ok, dep.clone()));
		}
		let required = dep.kind >= DependencyKind::Unordered
			|| (dep.kind == DependencyKind::Optional && require_optional);
		match self.installed_version(&dep.name) {
			Ok(current) => {
				if dep.meets(current) {
					return Ok((Action::Ok, dep.clone()));
				}
				if let Some(m) = self.find_dep(dep, true) {
					return Ok((Action::SwitchVersion, Self::dep_from_mod(m)));
				}
			}
			Err(crate::Error::NotInstalled(_)) => {
				if !required {
					return Ok((Action::Ok, dep.clone()));
				}
			}
			Err(e) => return Err(e),
		}
		if let Some(m) = self.find_dep(dep, false) {
			return Ok((Action::Install, Self::dep_from_mod(m)));
		}
		if required {
			return Err(crate::Error::UnresolvedDependency(dep.clone()));
		}
		/* Nothing satisfies it and nothing strictly needs it: keep it out. */
		Ok((Action::Disable, Dependency::conflict(&dep.name)))
	}

	/// Checks every dependency in the set independently, partitioned by the
	/// action required.
	pub fn check_dependency_set(
		&self,
		deps: &DependencySet,
		require_optional: bool,
	) -> crate::Result<CheckOutcome> {
		let mut outcome = CheckOutcome::new();
		for dep in deps.values() {
			let (action, dep) = self.check_dependency(dep, require_optional)?;
			outcome.entry(action).or_default().insert(dep);
		}
		Ok(outcome)
	}

	/// Carries out a planned outcome, mutating the ledger and downloading
	/// where installation is required.
	pub fn apply_actions(&mut self, outcome: &CheckOutcome) -> crate::Result<()> {
		if let Some(deps) = outcome.get(&Action::Enable) {
			for dep in deps {
				self.enable(&dep.name)?;
			}
		}
		if let Some(deps) = outcome.get(&Action::Disable) {
			for dep in deps {
				/* A mod that is not even ledgered is already as disabled as it gets. */
				if self.ledger.contains_key(&dep.name) {
					self.disable(&dep.name)?;
				}
			}
		}
		if let Some(deps) = outcome.get(&Action::SwitchVersion) {
			for dep in deps {
				self.select_version(&dep.name, dep.min.version)?;
			}
		}
		if let Some(deps) = outcome.get(&Action::Install) {
			for dep in deps {
				self.install(dep)?;
			}
		}
		Ok(())
	}

	/// Makes a satisfying version of the dependency present on disk,
	/// fetching metadata and downloading through the registry as needed.
	pub fn install(&mut self, dep: &Dependency) -> crate::Result<()> {
		if self.find_dep(dep, false).is_none() {
			self.fetch_metadata(&[dep.name.clone()])?;
		}
		let release = match self.find_dep(dep, false) {
			Some(Mod::Installed(_)) => return Ok(()),
			Some(Mod::Remote(remote)) => remote.release.clone(),
			None => return Err(crate::Error::UnresolvedDependency(dep.clone())),
		};
		self.download_mod(&release)
	}

	fn download_mod(&mut self, release: &Release) -> crate::Result<()> {
		let dest = self.options.mods_dir().join(&release.file_name);
		self.registry.download(release, &dest)?;
		let (name, version) = self.add_installed_mod(&dest)?;
		log::info!("Installed {} {}", name, version);
		self.enable(&name)?;
		Ok(())
	}

	/* Portal metadata */

	/// Batched metadata refresh; releases from this form carry no dependency
	/// lists.
	fn fetch_metadata(&mut self, names: &[String]) -> crate::Result<()> {
		let results = self.registry.fetch_batch(names)?;
		for result in results {
			self.ingest_portal_mod(result)?;
		}
		Ok(())
	}

	/// Per-name metadata fetch including dependency lists.
	fn fetch_full_metadata(&mut self, name: &str) -> crate::Result<()> {
		let result = self.registry.fetch_full(name)?;
		self.ingest_portal_mod(result)
	}

	fn ingest_portal_mod(&mut self, result: PortalMod) -> crate::Result<()> {
		for release in result.releases {
			if release.info_json.game_version.as_deref() == Some(self.host_version.as_str()) {
				self.ingest_release(&result.name, release)?;
			}
		}
		Ok(())
	}

	fn ingest_release(&mut self, name: &str, release: Release) -> crate::Result<()> {
		let remote = RemoteMod::from_release(name, release)?;
		let versions = self.index.entry(name.to_string()).or_default();
		/* An installed copy of the same version always wins over metadata. */
		if !matches!(versions.get(&remote.version), Some(Mod::Installed(_))) {
			versions.insert(remote.version, Mod::Remote(remote));
		}
		Ok(())
	}

	/// Expands a set of requirements to the transitive closure needed to
	/// validate them.
	///
	/// Hard dependencies are expanded through their target's own dependency
	/// list, which may only be known to the portal; the loop therefore runs
	/// in rounds, deferring unknown targets to a between-round metadata
	/// fetch. A target still unknown after its fetch fails the expansion.
	/// Soft dependencies and conflicts are collected but never traversed.
	pub fn expand_dependencies<I>(&mut self, deps: I) -> crate::Result<DependencySet>
	where
		I: IntoIterator<Item = Dependency>,
	{
		let mut collected = HashSet::<Dependency>::new();
		let mut pending: HashSet<Dependency> = deps.into_iter().collect();
		let mut looked_up = HashSet::<Dependency>::new();
		while !pending.is_empty() {
			let mut expanding: Vec<Dependency> = pending.drain().collect();
			while let Some(dep) = expanding.pop() {
				if dep.kind > DependencyKind::Optional {
					let sub_deps = self.find_dep(&dep, false).and_then(Mod::dependencies).cloned();
					match sub_deps {
						None => {
							/* Either the target is unknown or only its batched
							 * metadata is, which lacks dependency lists. */
							if looked_up.contains(&dep) {
								return Err(crate::Error::UnresolvedDependency(dep));
							}
							pending.insert(dep);
							continue;
						}
						Some(sub_deps) => {
							for sub_dep in sub_deps.into_values() {
								if collected.contains(&sub_dep)
									|| pending.contains(&sub_dep)
									|| expanding.contains(&sub_dep)
								{
									continue;
								}
								expanding.push(sub_dep);
							}
						}
					}
				}
				collected.insert(dep);
			}
			if pending.is_empty() {
				break;
			}
			let names: HashSet<String> = pending.iter().map(|d| d.name.clone()).collect();
			log::debug!("Expansion round needs metadata for {} mods", names.len());
			for name in names {
				self.fetch_full_metadata(&name)?;
			}
			looked_up.extend(pending.iter().cloned());
		}
		let mut set = DependencySet::new();
		set.add_all(collected)?;
		Ok(set)
	}

	/* Updates */

	/// Checks the portal for newer versions of installed mods, returning one
	/// exact-version dependency per mod with an update available.
	pub fn get_updatable(&mut self, require_enabled: bool) -> crate::Result<HashSet<Dependency>> {
		let mut check = Vec::<String>::new();
		for m in self.iter_installed_mods(require_enabled, None)? {
			if m.built_in {
				/* Content shipped with the game has no portal releases. */
				continue;
			}
			check.push(m.name().to_string());
		}
		self.fetch_metadata(&check)?;
		let mut deps = HashSet::new();
		for m in self.iter_installed_mods(require_enabled, None)? {
			let versions = match self.index.get(m.name()) {
				Some(versions) => versions,
				None => continue,
			};
			let latest = match versions.keys().next_back() {
				Some(latest) => *latest,
				None => continue,
			};
			if latest > m.version {
				deps.insert(Dependency::exactly(m.name(), latest));
			}
		}
		Ok(deps)
	}

	/// [`ModManager::get_updatable`], expanded and checked.
	pub fn check_updates(&mut self, require_enabled: bool) -> crate::Result<CheckOutcome> {
		let updatable = self.get_updatable(require_enabled)?;
		let expanded = self.expand_dependencies(updatable)?;
		self.check_dependency_set(&expanded, false)
	}

	/* Enumeration */

	/// Ledgered mods resolved to their loaded version, optionally limited to
	/// enabled mods and to names fully matching `name_filter`.
	pub fn iter_installed_mods(
		&self,
		require_enabled: bool,
		name_filter: Option<&str>,
	) -> crate::Result<Vec<&InstalledMod>> {
		let filter = match name_filter {
			Some(pattern) => Some(Regex::new(&format!("^(?:{})$", pattern))?),
			None => None,
		};
		let mut mods = Vec::new();
		for entry in self.ledger.values() {
			if require_enabled && !entry.enabled {
				continue;
			}
			if let Some(filter) = &filter {
				if !filter.is_match(&entry.name) {
					continue;
				}
			}
			mods.push(self.current_mod(&entry.name)?);
		}
		Ok(mods)
	}

	/// Files inside installed mods matching a `/` separated pattern, walked
	/// transparently through directory and archive storage.
	pub fn iter_mod_files(
		&self,
		inner_path: &str,
		require_enabled: bool,
		name_filter: Option<&str>,
	) -> crate::Result<Vec<FoundFile>> {
		let parts = PathSegment::parse_pattern(inner_path)?;
		let mut found = Vec::new();
		for m in self.iter_installed_mods(require_enabled, name_filter)? {
			found.extend(m.find_files(&parts)?);
		}
		Ok(found)
	}
}

/// Scoped resolution session.
///
/// Opening loads the ledger and scans local storage; dropping persists the
/// ledger on every exit path. Use [`ModSession::close`] to observe write
/// errors or [`ModSession::discard`] to abandon changes. Only one session may
/// be open against a ledger file at a time; that discipline is the caller's.
pub struct ModSession {
	manager: Option<ModManager>,
}

impl ModSession {
	pub fn open(options: ManagerOptions, registry: Box<dyn Registry>) -> crate::Result<Self> {
		Ok(ModSession {
			manager: Some(ModManager::new(options, registry)?),
		})
	}

	/// Persists the ledger and consumes the session.
	pub fn close(mut self) -> crate::Result<()> {
		match self.manager.take() {
			Some(manager) => manager.persist(),
			None => Ok(()),
		}
	}

	/// Consumes the session without writing the ledger.
	pub fn discard(mut self) {
		self.manager.take();
	}
}

impl Drop for ModSession {
	fn drop(&mut self) {
		if let Some(manager) = self.manager.take() {
			if let Err(e) = manager.persist() {
				log::error!("Failed to persist mod ledger: {}", e);
			}
		}
	}
}

impl std::ops::Deref for ModSession {
	type Target = ModManager;
	fn deref(&self) -> &ModManager {
		self.manager.as_ref().expect("session already closed")
	}
}

impl std::ops::DerefMut for ModSession {
	fn deref_mut(&mut self) -> &mut ModManager {
		self.manager.as_mut().expect("session already closed")
	}
}
