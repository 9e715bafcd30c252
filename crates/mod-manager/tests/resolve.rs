//! End to end resolution tests against a fake portal and on-disk mods.

use std::collections::HashMap;
use std::io::Write;

use mod_manager::dependency::Dependency;
use mod_manager::dependency::DependencyKind;
use mod_manager::ledger;
use mod_manager::manager::Action;
use mod_manager::registry::PortalMod;
use mod_manager::registry::Registry;
use mod_manager::registry::Release;
use mod_manager::registry::ReleaseInfo;
use mod_manager::version::ModVersion;
use mod_manager::Error;
use mod_manager::ManagerOptions;
use mod_manager::ModSession;

const GAME_VERSION: &str = "1.1.101";
const HOST_VERSION: &str = "1.1";

/// In-memory portal. The batched form strips dependency lists, like the real
/// portal's `namelist` endpoint.
#[derive(Default)]
struct FakeRegistry {
	mods: HashMap<String, PortalMod>,
	/// file_name -> archive bytes
	archives: HashMap<String, Vec<u8>>,
}

impl FakeRegistry {
	fn add_mod(&mut self, name: &str, releases: Vec<Release>) {
		self.mods.insert(
			name.to_string(),
			PortalMod {
				name: name.to_string(),
				releases,
			},
		);
	}

	fn add_archive(&mut self, file_name: &str, bytes: Vec<u8>) {
		self.archives.insert(file_name.to_string(), bytes);
	}
}

impl Registry for FakeRegistry {
	fn fetch_batch(&self, names: &[String]) -> mod_manager::Result<Vec<PortalMod>> {
		Ok(names
			.iter()
			.filter_map(|name| self.mods.get(name))
			.map(|m| {
				let mut m = m.clone();
				for release in &mut m.releases {
					release.info_json.dependencies = None;
				}
				m
			})
			.collect())
	}

	fn fetch_full(&self, name: &str) -> mod_manager::Result<PortalMod> {
		self.mods
			.get(name)
			.cloned()
			.ok_or_else(|| Error::NotFound(name.to_string()))
	}

	fn download(&self, release: &Release, dest: &std::path::Path) -> mod_manager::Result<()> {
		let bytes = self
			.archives
			.get(&release.file_name)
			.ok_or_else(|| Error::NotFound(release.file_name.clone()))?;
		std::fs::write(dest, bytes)?;
		mod_manager::registry::verify_download(release, dest)?;
		Ok(())
	}
}

fn release(name: &str, version: &str, dependencies: Option<&[&str]>) -> Release {
	Release {
		download_url: format!("/download/{}/{}", name, version),
		file_name: format!("{}_{}.zip", name, version),
		version: version.to_string(),
		sha256: None,
		info_json: ReleaseInfo {
			game_version: Some(HOST_VERSION.to_string()),
			dependencies: dependencies.map(|deps| deps.iter().map(|d| d.to_string()).collect()),
		},
	}
}

fn manifest(name: &str, version: Option<&str>, game_version: Option<&str>, dependencies: Option<&[&str]>) -> String {
	let mut value = serde_json::json!({ "name": name });
	if let Some(version) = version {
		value["version"] = version.into();
	}
	if let Some(game_version) = game_version {
		value["game_version"] = game_version.into();
	}
	if let Some(dependencies) = dependencies {
		value["dependencies"] = dependencies.into();
	}
	value.to_string()
}

fn write_dir_mod(
	parent: &std::path::Path,
	dir_name: &str,
	manifest_text: &str,
) -> std::path::PathBuf {
	let root = parent.join(dir_name);
	std::fs::create_dir_all(&root).unwrap();
	std::fs::write(root.join("info.json"), manifest_text).unwrap();
	root
}

fn zip_mod_bytes(name: &str, version: &str, manifest_text: &str) -> Vec<u8> {
	let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
	let options = zip::write::FileOptions::default();
	let root = format!("{}_{}", name, version);
	writer.start_file(format!("{}/info.json", root), options).unwrap();
	writer.write_all(manifest_text.as_bytes()).unwrap();
	writer.finish().unwrap().into_inner()
}

/// A game install with `base` and `core` in the read dir and an empty mods
/// dir; new mods start enabled.
fn fixture() -> (tempfile::TempDir, ManagerOptions) {
	let _ = env_logger::builder().is_test(true).try_init();
	let dir = tempfile::tempdir().unwrap();
	let read_dir = dir.path().join("data");
	let mods_dir = dir.path().join("mods");
	std::fs::create_dir_all(&read_dir).unwrap();
	std::fs::create_dir_all(&mods_dir).unwrap();
	write_dir_mod(&read_dir, "base", &manifest("base", Some(GAME_VERSION), None, Some(&[])));
	write_dir_mod(&read_dir, "core", &manifest("core", None, None, None));
	let mut options = ManagerOptions::new(mods_dir, read_dir, GAME_VERSION);
	options.set_enable_new_mods(true);
	(dir, options)
}

fn open(options: ManagerOptions, registry: FakeRegistry) -> ModSession {
	ModSession::open(options, Box::new(registry)).unwrap()
}

fn dep(s: &str) -> Dependency {
	Dependency::parse(s).unwrap()
}

#[test]
fn scan_builds_index_and_prunes_stale_ledger_entries() {
	let (_dir, options) = fixture();
	write_dir_mod(
		options.mods_dir(),
		"helper_1.0.0",
		&manifest("helper", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"])),
	);
	write_dir_mod(
		options.mods_dir(),
		"old_1.0.0",
		&manifest("old", Some("1.0.0"), Some("0.17"), Some(&["base"])),
	);
	std::fs::write(options.mods_dir().join("notes.txt"), "not a mod").unwrap();
	ledger::save(
		&options.ledger_path(),
		&ledger::LedgerFile {
			mods: vec![ledger::LedgerEntry {
				name: "ghost".into(),
				enabled: true,
				version: None,
			}],
		},
	)
	.unwrap();
	let ledger_path = options.ledger_path();

	let session = open(options, FakeRegistry::default());
	let names: Vec<&str> = session
		.iter_installed_mods(false, None)
		.unwrap()
		.iter()
		.map(|m| m.name())
		.collect();
	assert!(names.contains(&"base"));
	assert!(names.contains(&"helper"));
	assert!(!names.contains(&"old"), "wrong game version must be excluded");
	assert!(!names.contains(&"core"), "core is never ledgered");
	session.close().unwrap();

	let written = ledger::load(&ledger_path).unwrap();
	assert!(!written.mods.iter().any(|m| m.name == "ghost"));
	assert!(written.mods.iter().any(|m| m.name == "helper" && m.enabled));
}

#[test]
fn new_mods_follow_the_enable_policy() {
	let (_dir, mut options) = fixture();
	options.set_enable_new_mods(false);
	write_dir_mod(
		options.mods_dir(),
		"helper_1.0.0",
		&manifest("helper", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"])),
	);
	let session = open(options, FakeRegistry::default());
	assert!(!session.is_enabled("helper"));
	session.discard();
}

#[test]
fn expand_then_check_plans_an_install_from_the_registry() {
	let (_dir, options) = fixture();
	let mut registry = FakeRegistry::default();
	registry.add_mod("helper", vec![release("helper", "1.0.0", Some(&["base"]))]);
	registry.add_archive(
		"helper_1.0.0.zip",
		zip_mod_bytes("helper", "1.0.0", &manifest("helper", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"]))),
	);

	let mut session = open(options, registry);
	let expanded = session.expand_dependencies([dep("helper = 1.0.0")]).unwrap();
	let outcome = session.check_dependency_set(&expanded, false).unwrap();

	let installs = outcome.get(&Action::Install).unwrap();
	assert_eq!(installs.len(), 1);
	assert!(installs.contains(&Dependency::exactly("helper", ModVersion::new("1.0.0").unwrap())));

	session.apply_actions(&outcome).unwrap();
	assert!(session.is_enabled("helper"));
	let installed = session.current_mod("helper").unwrap();
	assert_eq!(installed.version, ModVersion::new("1.0.0").unwrap());
	assert!(session.options().mods_dir().join("helper_1.0.0.zip").exists());
	session.discard();
}

#[test]
fn version_switch_prefers_an_installed_version() {
	let (_dir, options) = fixture();
	write_dir_mod(
		options.mods_dir(),
		"foo_1.0.0",
		&manifest("foo", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"])),
	);
	write_dir_mod(
		options.mods_dir(),
		"foo_0.9.0",
		&manifest("foo", Some("0.9.0"), Some(HOST_VERSION), Some(&["base"])),
	);
	let mut session = open(options, FakeRegistry::default());
	assert_eq!(session.installed_version("foo").unwrap(), ModVersion::new("1.0.0").unwrap());

	let (action, chosen) = session.check_dependency(&dep("foo < 1.0.0"), false).unwrap();
	assert_eq!(action, Action::SwitchVersion);
	assert_eq!(chosen, Dependency::exactly("foo", ModVersion::new("0.9.0").unwrap()));

	let mut outcome = mod_manager::manager::CheckOutcome::new();
	outcome.entry(action).or_default().insert(chosen);
	session.apply_actions(&outcome).unwrap();
	assert_eq!(session.installed_version("foo").unwrap(), ModVersion::new("0.9.0").unwrap());
	session.discard();
}

#[test]
fn unsatisfiable_version_falls_back_to_a_remote_install() {
	let (_dir, options) = fixture();
	write_dir_mod(
		options.mods_dir(),
		"foo_1.0.0",
		&manifest("foo", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"])),
	);
	let mut registry = FakeRegistry::default();
	registry.add_mod("foo", vec![
		release("foo", "0.8.0", Some(&["base"])),
		release("foo", "1.0.0", Some(&["base"])),
	]);
	let mut session = open(options, registry);

	let expanded = session.expand_dependencies([dep("foo < 1.0.0")]).unwrap();
	let outcome = session.check_dependency_set(&expanded, false).unwrap();
	let installs = outcome.get(&Action::Install).unwrap();
	assert!(installs.contains(&Dependency::exactly("foo", ModVersion::new("0.8.0").unwrap())));
	session.discard();
}

#[test]
fn expansion_fails_only_after_a_lookup_round() {
	let (_dir, options) = fixture();
	write_dir_mod(
		options.mods_dir(),
		"foo_1.0.0",
		&manifest("foo", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"])),
	);
	/* The portal only knows the version that is already installed. */
	let mut registry = FakeRegistry::default();
	registry.add_mod("foo", vec![release("foo", "1.0.0", Some(&["base"]))]);
	let mut session = open(options, registry);

	let result = session.expand_dependencies([dep("foo < 1.0.0")]);
	match result {
		Err(Error::UnresolvedDependency(unresolved)) => assert_eq!(unresolved.name, "foo"),
		other => panic!("expected UnresolvedDependency, got {:?}", other.map(|_| ())),
	}
	session.discard();
}

#[test]
fn duplicate_conflicts_plan_a_single_disable() {
	let (_dir, options) = fixture();
	for name in ["alpha", "beta"] {
		write_dir_mod(
			options.mods_dir(),
			&format!("{}_1.0.0", name),
			&manifest(name, Some("1.0.0"), Some(HOST_VERSION), Some(&["base", "! bar"])),
		);
	}
	write_dir_mod(
		options.mods_dir(),
		"bar_1.0.0",
		&manifest("bar", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"])),
	);
	let mut session = open(options, FakeRegistry::default());
	assert!(session.is_enabled("bar"));

	let expanded = session
		.expand_dependencies([dep("alpha = 1.0.0"), dep("beta = 1.0.0")])
		.unwrap();
	assert_eq!(expanded.get("bar").unwrap().kind, DependencyKind::Conflict);

	let outcome = session.check_dependency_set(&expanded, false).unwrap();
	let disables = outcome.get(&Action::Disable).unwrap();
	assert_eq!(disables.len(), 1, "one Disable for bar, not one per declaring mod");

	session.apply_actions(&outcome).unwrap();
	assert!(!session.is_enabled("bar"));
	session.discard();
}

#[test]
fn diamond_dependencies_merge_to_the_intersected_range() {
	let (_dir, options) = fixture();
	let mut registry = FakeRegistry::default();
	registry.add_mod("a", vec![release("a", "1.0.0", Some(&["b", "c"]))]);
	registry.add_mod("b", vec![release("b", "1.0.0", Some(&["d >= 1.0"]))]);
	registry.add_mod("c", vec![release("c", "1.0.0", Some(&["d <= 1.5"]))]);
	registry.add_mod("d", vec![
		release("d", "1.0.0", Some(&[])),
		release("d", "1.2.0", Some(&[])),
		release("d", "2.0.0", Some(&[])),
	]);
	let mut session = open(options, registry);

	let expanded = session.expand_dependencies([dep("a")]).unwrap();
	let d = expanded.get("d").expect("exactly one merged entry for d");
	assert!(d.meets(ModVersion::new("1.2.0").unwrap()));
	assert!(d.meets(ModVersion::new("1.0.0").unwrap()));
	assert!(!d.meets(ModVersion::new("0.9.0").unwrap()));
	assert!(!d.meets(ModVersion::new("2.0.0").unwrap()));
	session.discard();
}

#[test]
fn cyclic_dependencies_terminate() {
	let (_dir, options) = fixture();
	let mut registry = FakeRegistry::default();
	registry.add_mod("a", vec![release("a", "1.0.0", Some(&["b"]))]);
	registry.add_mod("b", vec![release("b", "1.0.0", Some(&["a"]))]);
	let mut session = open(options, registry);

	let expanded = session.expand_dependencies([dep("a")]).unwrap();
	assert!(expanded.contains("a"));
	assert!(expanded.contains("b"));

	let outcome = session.check_dependency_set(&expanded, false).unwrap();
	assert_eq!(outcome.get(&Action::Install).unwrap().len(), 2);
	session.discard();
}

#[test]
fn soft_dependencies_are_collected_but_never_looked_up() {
	let (_dir, options) = fixture();
	write_dir_mod(
		options.mods_dir(),
		"x_1.0.0",
		&manifest("x", Some("1.0.0"), Some(HOST_VERSION), Some(&["base", "? unknown-helper"])),
	);
	/* The registry knows nothing; a lookup of the optional would error. */
	let mut session = open(options, FakeRegistry::default());

	let expanded = session.expand_dependencies([dep("x = 1.0.0")]).unwrap();
	assert!(expanded.contains("unknown-helper"));

	let outcome = session.check_dependency_set(&expanded, false).unwrap();
	assert!(outcome
		.get(&Action::Ok)
		.unwrap()
		.iter()
		.any(|d| d.name == "unknown-helper"));
	session.discard();
}

#[test]
fn update_check_installs_the_newer_version() {
	let (_dir, options) = fixture();
	write_dir_mod(
		options.mods_dir(),
		"helper_1.0.0",
		&manifest("helper", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"])),
	);
	let mut registry = FakeRegistry::default();
	registry.add_mod("helper", vec![
		release("helper", "1.0.0", Some(&["base"])),
		release("helper", "1.1.0", Some(&["base"])),
	]);
	registry.add_archive(
		"helper_1.1.0.zip",
		zip_mod_bytes("helper", "1.1.0", &manifest("helper", Some("1.1.0"), Some(HOST_VERSION), Some(&["base"]))),
	);
	let mut session = open(options, registry);

	let outcome = session.check_updates(true).unwrap();
	let installs = outcome.get(&Action::Install).unwrap();
	assert!(installs.contains(&Dependency::exactly("helper", ModVersion::new("1.1.0").unwrap())));

	session.apply_actions(&outcome).unwrap();
	assert_eq!(session.installed_version("helper").unwrap(), ModVersion::new("1.1.0").unwrap());
	session.discard();
}

#[test]
fn built_in_content_is_never_update_checked() {
	let (_dir, options) = fixture();
	/* A portal mod that happens to share the base name; it must be ignored. */
	let mut registry = FakeRegistry::default();
	registry.add_mod("base", vec![release("base", "99.0.0", Some(&[]))]);
	let mut session = open(options, registry);
	session.enable("base").unwrap();

	let updatable = session.get_updatable(true).unwrap();
	assert!(updatable.is_empty());
	session.discard();
}

#[test]
fn download_verifies_the_declared_hash() {
	let (_dir, options) = fixture();
	let bytes = zip_mod_bytes("helper", "1.0.0", &manifest("helper", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"])));
	let good_hash = sha256::digest(bytes.as_slice());

	let mut good = release("helper", "1.0.0", Some(&["base"]));
	good.sha256 = Some(good_hash);
	let mut registry = FakeRegistry::default();
	registry.add_mod("helper", vec![good]);
	registry.add_archive("helper_1.0.0.zip", bytes.clone());

	let mut session = open(options, registry);
	session.install(&dep("helper = 1.0.0")).unwrap();
	assert!(session.current_mod("helper").is_ok());
	session.discard();

	/* Same archive, wrong declared hash. */
	let (_dir2, options2) = fixture();
	let mut bad = release("helper", "1.0.0", Some(&["base"]));
	bad.sha256 = Some("0".repeat(64));
	let mut registry = FakeRegistry::default();
	registry.add_mod("helper", vec![bad]);
	registry.add_archive("helper_1.0.0.zip", bytes);
	let mods_dir = options2.mods_dir().to_path_buf();

	let mut session = open(options2, registry);
	let result = session.install(&dep("helper = 1.0.0"));
	assert!(matches!(result, Err(Error::HashMismatch { .. })));
	assert!(!mods_dir.join("helper_1.0.0.zip").exists(), "corrupt download is discarded");
	session.discard();
}

#[test]
fn mod_files_are_enumerated_across_directories_and_archives() {
	let (_dir, options) = fixture();
	let helper = write_dir_mod(
		options.mods_dir(),
		"helper_1.0.0",
		&manifest("helper", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"])),
	);
	std::fs::create_dir_all(helper.join("locale/en")).unwrap();
	std::fs::create_dir_all(helper.join("locale/de")).unwrap();
	std::fs::write(helper.join("locale/en/strings.cfg"), "hello=Hello").unwrap();
	std::fs::write(helper.join("locale/de/strings.cfg"), "hello=Hallo").unwrap();
	std::fs::write(helper.join("locale/en/readme.txt"), "not a cfg").unwrap();

	let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
	let zip_options = zip::write::FileOptions::default();
	writer.start_file("zmod_1.0.0/info.json", zip_options).unwrap();
	writer
		.write_all(manifest("zmod", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"])).as_bytes())
		.unwrap();
	writer.start_file("zmod_1.0.0/locale/en/strings.cfg", zip_options).unwrap();
	writer.write_all(b"hello=Howdy").unwrap();
	let bytes = writer.finish().unwrap().into_inner();
	std::fs::write(options.mods_dir().join("zmod_1.0.0.zip"), bytes).unwrap();

	let session = open(options, FakeRegistry::default());
	let found = session
		.iter_mod_files(r"locale/.*/strings\.cfg", true, None)
		.unwrap();
	assert_eq!(found.len(), 3);
	let contents: Vec<Vec<u8>> = found.iter().map(|f| f.read().unwrap()).collect();
	assert!(contents.contains(&b"hello=Howdy".to_vec()));
	assert!(contents.contains(&b"hello=Hallo".to_vec()));

	let only_helper = session
		.iter_mod_files(r"locale/.*/strings\.cfg", true, Some("helper"))
		.unwrap();
	assert_eq!(only_helper.len(), 2);
	session.discard();
}

#[test]
fn session_persists_the_ledger_on_drop() {
	let (_dir, options) = fixture();
	write_dir_mod(
		options.mods_dir(),
		"helper_1.0.0",
		&manifest("helper", Some("1.0.0"), Some(HOST_VERSION), Some(&["base"])),
	);
	let ledger_path = options.ledger_path();
	{
		let mut session = open(options, FakeRegistry::default());
		session.disable("helper").unwrap();
		/* Dropped here; the ledger must still land on disk. */
	}
	let written = ledger::load(&ledger_path).unwrap();
	assert!(written.mods.iter().any(|m| m.name == "helper" && !m.enabled));
}
