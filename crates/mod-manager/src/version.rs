//! Mod version triples and range endpoints.

/// A mod version as three numeric components compared in order.
///
/// Short forms pad with zeros so `"2"` parses the same as `"2.0.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModVersion(pub u16, pub u16, pub u16);

impl ModVersion {
	pub const MIN: ModVersion = ModVersion(0, 0, 0);
	pub const MAX: ModVersion = ModVersion(u16::MAX, u16::MAX, u16::MAX);

	pub fn new(version: &str) -> crate::Result<Self> {
		let mut ver = [0u16; 3];
		for (i, component) in version.splitn(3, '.').enumerate() {
			ver[i] = component.parse::<u16>().map_err(|_| {
				crate::Error::Parse(format!("bad version component {:?} in {:?}", component, version))
			})?;
		}
		Ok(ModVersion(ver[0], ver[1], ver[2]))
	}
}

impl TryFrom<&str> for ModVersion {
	type Error = crate::Error;
	fn try_from(value: &str) -> Result<Self, Self::Error> { Self::new(value) }
}

impl std::str::FromStr for ModVersion {
	type Err = crate::Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::new(s) }
}

impl std::fmt::Display for ModVersion {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}.{}", self.0, self.1, self.2)
	}
}

/// A range endpoint.
///
/// `epsilon` offsets the comparison so that open bounds reuse the closed
/// ordering: `< 1.2.3` becomes the max endpoint `(1.2.3, -1)` which correctly
/// excludes `1.2.3` itself, `> 1.2.3` becomes the min endpoint `(1.2.3, +1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionBound {
	pub version: ModVersion,
	pub epsilon: i8,
}

impl VersionBound {
	pub fn inclusive(version: ModVersion) -> Self {
		VersionBound { version, epsilon: 0 }
	}

	pub fn below(version: ModVersion) -> Self {
		VersionBound { version, epsilon: -1 }
	}

	pub fn above(version: ModVersion) -> Self {
		VersionBound { version, epsilon: 1 }
	}
}
