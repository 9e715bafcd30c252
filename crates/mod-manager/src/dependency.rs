//! The dependency constraint algebra.
//!
//! Mods declare their relationships in a compact textual syntax: an optional
//! kind marker, the target name and an optional comparator with a version,
//! e.g. `"! stop"`, `"? bobs >= 1.2"`, `"base = 1.1.0"`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::OnceLock;

use regex::Regex;

use crate::version::ModVersion;
use crate::version::VersionBound;

/// How strongly a mod needs its target.
///
/// Declaration order is the rank order used by [`Dependency::merge`], weakest
/// first, so the derived `Ord` is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DependencyKind {
	/// The target must not be enabled (`!`).
	Conflict,
	/// Affects load order without showing up in listings (`(?)`).
	HiddenOptional,
	/// Used when present, never required (`?`).
	Optional,
	/// Required but does not constrain load order (`~`).
	Unordered,
	/// Required (no marker).
	Normal,
}

impl DependencyKind {
	pub fn marker(self) -> &'static str {
		match self {
			DependencyKind::Conflict => "!",
			DependencyKind::HiddenOptional => "(?)",
			DependencyKind::Optional => "?",
			DependencyKind::Unordered => "~",
			DependencyKind::Normal => "",
		}
	}
}

fn dependency_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| {
		Regex::new(r"^(!|\(\?\)|\?|~)?\s*([-\w ]+?)(?:\s*([><=]+)\s*(\d+\.\d+(?:\.\d+)?))?$")
			.expect("static regex")
	})
}

/// One declared constraint against a named mod.
///
/// The range is always the closed interval `[min, max]`; open comparators are
/// folded into the endpoints through [`VersionBound`] epsilons. A conflict
/// pins `max` below `min` so [`Dependency::meets`] is vacuously false,
/// conflicts are matched by name and enabled state only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
	pub kind: DependencyKind,
	pub name: String,
	pub min: VersionBound,
	pub max: VersionBound,
}

impl Dependency {
	/// A conflict on `name`, the form every unsatisfiable-but-unneeded
	/// constraint collapses to.
	pub fn conflict(name: &str) -> Self {
		Dependency {
			kind: DependencyKind::Conflict,
			name: name.to_string(),
			min: VersionBound::inclusive(ModVersion::MIN),
			max: VersionBound::below(ModVersion::MIN),
		}
	}

	/// An exact requirement `name = version`.
	pub fn exactly(name: &str, version: ModVersion) -> Self {
		let bound = VersionBound::inclusive(version);
		Dependency {
			kind: DependencyKind::Normal,
			name: name.to_string(),
			min: bound,
			max: bound,
		}
	}

	pub fn parse(text: &str) -> crate::Result<Self> {
		let caps = dependency_regex()
			.captures(text)
			.ok_or_else(|| crate::Error::Parse(format!("unmatched mod dependency {:?}", text)))?;
		let kind = match caps.get(1).map(|m| m.as_str()) {
			Some("!") => DependencyKind::Conflict,
			Some("(?)") => DependencyKind::HiddenOptional,
			Some("?") => DependencyKind::Optional,
			Some("~") => DependencyKind::Unordered,
			_ => DependencyKind::Normal,
		};
		let name = caps[2].to_string();

		/* Start with the full range and narrow as specified. */
		let mut min = VersionBound::inclusive(ModVersion::MIN);
		let mut max = VersionBound::inclusive(ModVersion::MAX);
		if kind == DependencyKind::Conflict {
			/* Conflicts ignore any version suffix. */
			max = VersionBound::below(ModVersion::MIN);
		} else if let (Some(comparator), Some(version)) = (caps.get(3), caps.get(4)) {
			let version = ModVersion::new(version.as_str())?;
			match comparator.as_str() {
				"<" => max = VersionBound::below(version),
				"<=" => max = VersionBound::inclusive(version),
				">" => min = VersionBound::above(version),
				">=" => min = VersionBound::inclusive(version),
				"=" => {
					min = VersionBound::inclusive(version);
					max = min;
				}
				other => {
					return Err(crate::Error::Parse(format!(
						"bad comparator {:?} in dependency {:?}",
						other, text
					)))
				}
			}
		}
		Ok(Dependency { kind, name, min, max })
	}

	pub fn meets(&self, version: ModVersion) -> bool {
		let version = VersionBound::inclusive(version);
		self.min <= version && version <= self.max
	}

	/// Combines two constraints on the same mod into one that implies both.
	///
	/// A conflict colliding with a hard requirement is unsatisfiable. A
	/// conflict colliding with a soft requirement wins outright. Otherwise the
	/// stronger kind is kept and the ranges intersected; an empty intersection
	/// collapses to a conflict when the weaker side is optional-or-below and
	/// fails with [`crate::Error::IncompatibleDependencies`] when it is not.
	pub fn merge(&self, other: &Dependency) -> crate::Result<Dependency> {
		if self.name != other.name {
			return Err(crate::Error::Parse(format!(
				"mod names must match: {} != {}",
				self.name, other.name
			)));
		}
		let (weaker, stronger) = if self.kind <= other.kind {
			(self, other)
		} else {
			(other, self)
		};
		if weaker.kind == DependencyKind::Conflict {
			if stronger.kind >= DependencyKind::Unordered {
				return Err(crate::Error::IncompatibleDependencies(self.clone(), other.clone()));
			}
			return Ok(weaker.clone());
		}
		/* At this point neither is a conflict. */
		let kind = stronger.kind;
		let min = std::cmp::max(self.min, other.min);
		let max = std::cmp::min(self.max, other.max);
		if min > max {
			/* Mutually exclusive ranges. */
			if weaker.kind <= DependencyKind::Optional {
				/* The overlap is irreconcilable but nothing strictly needs the
				 * mod, so the pair means "keep it out". */
				return Ok(Dependency::conflict(&weaker.name));
			}
			return Err(crate::Error::IncompatibleDependencies(self.clone(), other.clone()));
		}
		Ok(Dependency {
			kind,
			name: weaker.name.clone(),
			min,
			max,
		})
	}
}

impl std::str::FromStr for Dependency {
	type Err = crate::Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl std::fmt::Display for Dependency {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let prefix = format!("{} {}", self.kind.marker(), self.name);
		let prefix = prefix.trim();
		/* "= 1.2.3" for a closed endpoint, " 1.2.3" for an open one, so that
		 * ">" and "<" below read as ">=" / "<=" when the bound is inclusive. */
		let endpoint = |bound: &VersionBound| {
			if bound.epsilon == 0 {
				format!("= {}", bound.version)
			} else {
				format!(" {}", bound.version)
			}
		};
		let open_min = VersionBound::inclusive(ModVersion::MIN);
		let open_max = VersionBound::inclusive(ModVersion::MAX);
		if self.min == self.max {
			return write!(f, "{} = {}", prefix, self.min.version);
		}
		if open_min < self.max && self.max < open_max {
			if self.min == open_min {
				return write!(f, "{} <{}", prefix, endpoint(&self.max));
			}
			return write!(f, "{} >{},{} <{}", prefix, endpoint(&self.min), prefix, endpoint(&self.max));
		}
		if self.min == open_min {
			return write!(f, "{}", prefix);
		}
		write!(f, "{} >{}", prefix, endpoint(&self.min))
	}
}

/// A collection of dependencies that are all mutually compatible.
///
/// Adding a dependency whose name is already present merges the two with
/// [`Dependency::merge`], so the stored entry is always the conjunction of
/// everything added for that name.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DependencySet(HashMap<String, Dependency>);

impl DependencySet {
	pub fn new() -> Self {
		Default::default()
	}

	pub fn parse_all<I, S>(strings: I) -> crate::Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut set = DependencySet::new();
		for s in strings {
			set.add(Dependency::parse(s.as_ref())?)?;
		}
		Ok(set)
	}

	pub fn add(&mut self, dep: Dependency) -> crate::Result<()> {
		match self.0.entry(dep.name.clone()) {
			Entry::Occupied(mut existing) => {
				let merged = existing.get().merge(&dep)?;
				existing.insert(merged);
			}
			Entry::Vacant(slot) => {
				slot.insert(dep);
			}
		}
		Ok(())
	}

	pub fn add_all<I>(&mut self, deps: I) -> crate::Result<()>
	where
		I: IntoIterator<Item = Dependency>,
	{
		for dep in deps {
			self.add(dep)?;
		}
		Ok(())
	}

	pub fn get(&self, name: &str) -> Option<&Dependency> {
		self.0.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.0.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn values(&self) -> impl Iterator<Item = &Dependency> {
		self.0.values()
	}

	pub fn into_values(self) -> impl Iterator<Item = Dependency> {
		self.0.into_values()
	}
}
