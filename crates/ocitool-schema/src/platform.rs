//! Advisory platform checks. Unknown combinations are logged, never rejected.

use tracing::warn;

const VALID_PLATFORMS: &[(&str, &[&str])] = &[
    ("android", &["arm"]),
    ("darwin", &["386", "amd64", "arm", "arm64"]),
    ("dragonfly", &["amd64"]),
    ("freebsd", &["386", "amd64", "arm"]),
    (
        "linux",
        &[
            "386", "amd64", "arm", "arm64", "ppc64", "ppc64le", "mips64", "mips64le", "s390x",
            "riscv64",
        ],
    ),
    ("netbsd", &["386", "amd64", "arm"]),
    ("openbsd", &["386", "amd64", "arm"]),
    ("plan9", &["386", "amd64"]),
    ("solaris", &["amd64"]),
    ("windows", &["386", "amd64"]),
];

const VALID_VARIANTS: &[(&str, &[&str])] = &[
    ("arm", &["", "v6", "v7", "v8"]),
    ("arm64", &["", "v8"]),
    ("386", &[""]),
    ("amd64", &[""]),
    ("ppc64", &[""]),
    ("ppc64le", &[""]),
    ("mips64", &[""]),
    ("mips64le", &[""]),
    ("s390x", &[""]),
    ("riscv64", &[""]),
];

/// Returns false (after logging) when the os/architecture pair is not a known combination.
pub fn check_platform(os: &str, architecture: &str) -> bool {
    match VALID_PLATFORMS.iter().find(|(name, _)| *name == os) {
        Some((_, archs)) if archs.contains(&architecture) => true,
        Some(_) => {
            warn!("combination of os {os:?} and architecture {architecture:?} is invalid");
            false
        }
        None => {
            warn!("operating system {os:?} is not supported yet");
            false
        }
    }
}

/// Returns false (after logging) when the architecture/variant pair is not a known combination.
pub fn check_architecture(architecture: &str, variant: &str) -> bool {
    match VALID_VARIANTS.iter().find(|(name, _)| *name == architecture) {
        Some((_, variants)) if variants.contains(&variant) => true,
        Some(_) => {
            warn!("combination of architecture {architecture:?} and variant {variant:?} is not valid");
            false
        }
        None => {
            warn!("architecture {architecture:?} is not supported yet");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_platforms() {
        assert!(check_platform("linux", "amd64"));
        assert!(check_platform("windows", "386"));
        assert!(!check_platform("linux", "sparc"));
        assert!(!check_platform("beos", "amd64"));
    }

    #[test]
    fn known_variants() {
        assert!(check_architecture("arm", "v7"));
        assert!(check_architecture("amd64", ""));
        assert!(!check_architecture("arm64", "v7"));
        assert!(!check_architecture("vax", ""));
    }
}
