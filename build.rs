fn main() {
    let hash = git_revision_hash();
    if let Some(ref rev) = hash {
        println!("cargo:rustc-env=VPNDIAG_BUILD_GIT_HASH={}", rev);
    }
    set_version(hash.as_deref());
}

/// Short hash of the checked out revision, if built from a git tree.
fn git_revision_hash() -> Option<String> {
    use std::process::Command;

    println!("cargo:rerun-if-changed=.git/HEAD");

    let args = &["rev-parse", "--short=10", "HEAD"];
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!rev.is_empty()).then_some(rev)
}

/// `--version` text: the package version, plus the revision when known.
fn set_version(hash: Option<&str>) {
    let pkg = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let version = match hash {
        Some(rev) => format!("{} (rev {})", pkg, rev),
        None => pkg,
    };
    println!("cargo:rustc-env=VPNDIAG_VERSION={}", version);
}
