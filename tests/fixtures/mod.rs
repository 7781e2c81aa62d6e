//! Shared fixtures for integration tests: stub external tools and config
//! builders.
//!
//! The compose generator and merge tool are stand-in shell scripts with the
//! paths they need baked in at write time, so parallel tests never share
//! state through the environment.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Write an executable script and return its path.
pub fn write_script(path: &Path, body: &str) -> PathBuf {
    fs::write(path, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path.to_path_buf()
}

/// Stub compose generator.
///
/// Records its argv (one argument per line) into `record_path`, then
/// produces a minimal compose tree under `--target-dir`:
/// `MBI-Java-20190206.n.0/compose/Everything/x86_64/os/` with one package
/// file, a `COMPOSE_ID`, and a `latest-<release_name>` symlink.
pub fn write_stub_compose(dir: &Path, record_path: &Path, release_name: &str) -> PathBuf {
    let body = format!(
        r#"#!/bin/sh
printf '%s\n' "$@" > "{record}"
target=""
while [ $# -gt 0 ]; do
    case "$1" in
        --target-dir) target="$2"; shift 2 ;;
        *) shift ;;
    esac
done
compose="$target/MBI-Java-20190206.n.0"
mkdir -p "$compose/compose/Everything/x86_64/os/repodata"
echo "1.0-compose" > "$compose/compose/Everything/x86_64/os/javapackages-bootstrap"
echo "compose-only" > "$compose/compose/Everything/x86_64/os/local-only-pkg"
echo "MBI-Java-20190206.n.0" > "$compose/COMPOSE_ID"
ln -sfn "$compose" "$target/latest-{release}"
"#,
        record = record_path.display(),
        release = release_name,
    );
    write_script(&dir.join("stub-compose"), &body)
}

/// Stub compose generator that fails after emitting stderr, leaving a
/// partial tree behind.
pub fn write_failing_compose(dir: &Path, exit_code: i32) -> PathBuf {
    let body = format!(
        r#"#!/bin/sh
target=""
while [ $# -gt 0 ]; do
    case "$1" in
        --target-dir) target="$2"; shift 2 ;;
        *) shift ;;
    esac
done
mkdir -p "$target/MBI-Java-partial/compose"
echo "gather phase exploded" >&2
exit {exit_code}
"#
    );
    write_script(&dir.join("stub-compose-fail"), &body)
}

/// Stub merge tool with the real tool's contract: ordered `--repo`
/// sources, later wins, refuses a pre-existing `-o` destination.
pub fn write_stub_merger(dir: &Path) -> PathBuf {
    let body = r#"#!/bin/sh
out=""
repos=""
while [ $# -gt 0 ]; do
    case "$1" in
        --repo) repos="$repos $2"; shift 2 ;;
        -o) out="$2"; shift 2 ;;
        *) shift ;;
    esac
done
mkdir "$out" || { echo "destination exists: $out" >&2; exit 1; }
for r in $repos; do
    cp -R "$r"/. "$out"/
done
"#;
    write_script(&dir.join("stub-mergerepo"), body)
}

/// A local package repository: one file per package, content is the
/// version string.
pub fn make_repo(dir: &Path, name: &str, packages: &[(&str, &str)]) -> PathBuf {
    let repo = dir.join(name);
    fs::create_dir_all(&repo).unwrap();
    for (package, version) in packages {
        fs::write(repo.join(package), version).unwrap();
    }
    repo
}

/// Write a complete config file wired to the given stub tools and layer
/// repos.
pub fn write_config(
    path: &Path,
    compose_tool: &Path,
    merge_tool: &Path,
    layer_repos: &[&str],
    skip_phases: &[&str],
) -> PathBuf {
    let repos = layer_repos
        .iter()
        .map(|r| format!("\"{r}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let phases = skip_phases
        .iter()
        .map(|p| format!("\"{p}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let contents = format!(
        r#"release_name = "MBI"
release_short = "MBI"
release_version = "Java"
release_is_layered = false
bootable = false
variants_file = "variants.xml"
sigkeys = [""]
hashed_directories = false
runroot = false
pkgset_source = "koji"
pkgset_koji_inherit = false
koji_profile = "koji"
filter_system_release_packages = false
gather_method = "deps"
check_deps = false
greedy_method = "none"
createrepo_c = true
createrepo_checksum = "sha256"
media_checksums = ["sha256"]
create_jigdo = false
skip_phases = [{phases}]

[tools]
compose = "{compose}"
mergerepo = "{merge}"

[layering]
name = "hybrid-buildroot"
variant = "Everything"
arch = "x86_64"
repos = [{repos}]
"#,
        compose = compose_tool.display(),
        merge = merge_tool.display(),
    );
    fs::write(path, contents).unwrap();
    path.to_path_buf()
}
