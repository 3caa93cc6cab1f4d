use mcprobe_core::{identify, PackageIdentity};

fn describe(identity: Option<&PackageIdentity>) -> String {
    match identity {
        Some(PackageIdentity {
            name,
            version: Some(version),
        }) => format!("{}@{}", name, version),
        Some(PackageIdentity {
            name,
            version: None,
        }) => format!("{} (unpinned)", name),
        None => "not a package launcher".to_string(),
    }
}

pub fn run(launcher: &str, args: &[String]) {
    println!("{}", describe(identify(launcher, args).as_ref()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_unpinned_and_unknown() {
        let args = |a: &[&str]| a.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(
            describe(identify("npx", &args(&["-y", "@scope/pkg@1.2.3"])).as_ref()),
            "@scope/pkg@1.2.3"
        );
        assert_eq!(
            describe(identify("uvx", &args(&["mcp-server-git"])).as_ref()),
            "mcp-server-git (unpinned)"
        );
        assert_eq!(
            describe(identify("node", &args(&["server.js"])).as_ref()),
            "not a package launcher"
        );
    }
}
