/// Target platform a provider package is built for.
///
/// The string form is `os_arch` using Go-style names, which is how every
/// registry and mirror protocol spells it.
///
/// # Example
///
/// ```
/// use lockstep_schema::Platform;
///
/// let p: Platform = "linux_amd64".parse().unwrap();
/// assert_eq!(p.os, "linux");
/// println!("Running on: {}", Platform::current());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Platform {
    /// Operating system name (e.g. `linux`, `darwin`, `windows`).
    pub os: String,
    /// CPU architecture name (e.g. `amd64`, `arm64`).
    pub arch: String,
}

impl Platform {
    /// Build a platform from its parts.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this process is running on.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(os, arch)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((os, arch)) = s.split_once('_') else {
            return Err(format!("must be two words separated by an underscore: {s:?}"));
        };
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        };
        if !valid(os) {
            return Err(format!("OS portion must be lowercase letters and digits: {os:?}"));
        }
        if !valid(arch) {
            return Err(format!(
                "architecture portion must be lowercase letters and digits: {arch:?}"
            ));
        }
        Ok(Self::new(os, arch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let p: Platform = "darwin_arm64".parse().unwrap();
        assert_eq!(p, Platform::new("darwin", "arm64"));
        assert_eq!(p.to_string(), "darwin_arm64");
    }

    #[test]
    fn rejects_malformed() {
        assert!("linux".parse::<Platform>().is_err());
        assert!("linux_".parse::<Platform>().is_err());
        assert!("Linux_amd64".parse::<Platform>().is_err());
        assert!("linux_amd64_v2".parse::<Platform>().is_err());
    }

    #[test]
    fn current_is_well_formed() {
        let current = Platform::current();
        let reparsed: Platform = current.to_string().parse().unwrap();
        assert_eq!(reparsed, current);
    }
}
