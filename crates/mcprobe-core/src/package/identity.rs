use serde::{Deserialize, Serialize};

/// Package a launcher command would run. `version` is `None` when the
/// invocation does not pin one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PackageIdentity {
    fn new(name: &str, version: Option<&str>) -> Option<Self> {
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            version: version.filter(|v| !v.is_empty()).map(str::to_string),
        })
    }
}

/// Recover the package behind `npx`, `bunx`, `uvx` or `pipx run`.
///
/// Returns `None` for any other launcher, and for invocations where no
/// package token can be found. This is a static heuristic; no registry is
/// consulted.
pub fn identify<S: AsRef<str>>(launcher: &str, args: &[S]) -> Option<PackageIdentity> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    match launcher {
        "npx" | "bunx" => node_package(&args),
        "uvx" => uvx_package(&args),
        "pipx" => pipx_package(&args),
        _ => None,
    }
}

fn is_flag(token: &str) -> bool {
    token.starts_with('-')
}

fn node_package(args: &[&str]) -> Option<PackageIdentity> {
    let spec = args.iter().find(|a| !is_flag(a))?;
    // A leading '@' marks a scope, not a version.
    match spec.rfind('@') {
        Some(at) if at > 0 => PackageIdentity::new(&spec[..at], Some(&spec[at + 1..])),
        _ => PackageIdentity::new(spec, None),
    }
}

fn uvx_package(args: &[&str]) -> Option<PackageIdentity> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "--from" {
            iter.next();
            continue;
        }
        if !is_flag(arg) {
            return PackageIdentity::new(arg, None);
        }
    }
    None
}

fn pipx_package(args: &[&str]) -> Option<PackageIdentity> {
    let (first, rest) = args.split_first()?;
    if *first != "run" {
        return None;
    }

    let mut spec: Option<&str> = None;
    let mut positional: Option<&str> = None;
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "--spec" => spec = iter.next().copied(),
            "--python" => {
                iter.next();
            }
            a if is_flag(a) => {}
            a => {
                if positional.is_none() {
                    positional = Some(a);
                }
            }
        }
    }

    // A pin with an empty name ("==1.0") says nothing about the package.
    let pinned = spec
        .and_then(|s| s.split_once("=="))
        .and_then(|(name, version)| PackageIdentity::new(name, Some(version)));
    pinned.or_else(|| PackageIdentity::new(positional?, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str, version: Option<&str>) -> Option<PackageIdentity> {
        Some(PackageIdentity {
            name: name.into(),
            version: version.map(Into::into),
        })
    }

    #[test]
    fn npx_splits_pinned_version() {
        assert_eq!(
            identify("npx", &["chrome-devtools-mcp@0.2.7"]),
            id("chrome-devtools-mcp", Some("0.2.7"))
        );
    }

    #[test]
    fn npx_skips_flags_and_keeps_scope() {
        assert_eq!(
            identify("npx", &["-y", "@modelcontextprotocol/server-everything"]),
            id("@modelcontextprotocol/server-everything", None)
        );
        assert_eq!(
            identify("npx", &["--yes", "--quiet", "@scope/pkg@latest", "--port", "3000"]),
            id("@scope/pkg", Some("latest"))
        );
    }

    #[test]
    fn bunx_follows_npx_rules() {
        assert_eq!(
            identify("bunx", &["@upstash/context7-mcp@1.0.0"]),
            id("@upstash/context7-mcp", Some("1.0.0"))
        );
    }

    #[test]
    fn trailing_at_yields_no_version() {
        assert_eq!(identify("npx", &["pkg@"]), id("pkg", None));
    }

    #[test]
    fn uvx_skips_from_value() {
        assert_eq!(
            identify("uvx", &["--from", "git+https://x/y", "mcp-server-git"]),
            id("mcp-server-git", None)
        );
        assert_eq!(
            identify("uvx", &["mcp-server-fetch@2.0"]),
            id("mcp-server-fetch@2.0", None)
        );
    }

    #[test]
    fn pipx_spec_with_pinned_version() {
        assert_eq!(
            identify("pipx", &["run", "--spec", "poetry==1.7.1", "poetry"]),
            id("poetry", Some("1.7.1"))
        );
    }

    #[test]
    fn pipx_without_pin_uses_first_positional() {
        assert_eq!(
            identify("pipx", &["run", "--python", "3.12", "--spec", "git+https://x", "black"]),
            id("black", None)
        );
        assert_eq!(identify("pipx", &["install", "black"]), None);
        assert_eq!(identify("pipx", &["run"]), None);
    }

    #[test]
    fn other_launchers_are_not_applicable() {
        assert_eq!(identify("python", &["-m", "some_module"]), None);
        assert_eq!(identify("node", &["server.js"]), None);
        assert_eq!(identify("NPX", &["pkg"]), None);
    }

    #[test]
    fn malformed_input_does_not_panic() {
        let empty: [&str; 0] = [];
        assert_eq!(identify("npx", &empty), None);
        assert_eq!(identify("npx", &["-y"]), None);
        assert_eq!(identify("uvx", &["--from"]), None);
        assert_eq!(identify("pipx", &["run", "--spec"]), None);
        assert_eq!(identify("pipx", &["run", "--spec", "==1.0"]), None);
    }

    #[test]
    fn pipx_nameless_pin_falls_back_to_positional() {
        assert_eq!(
            identify("pipx", &["run", "--spec", "==1.0", "poetry"]),
            id("poetry", None)
        );
    }
}
