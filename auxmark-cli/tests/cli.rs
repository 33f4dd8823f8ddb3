use std::{fs, path::Path, process::Command};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn git_available() -> bool {
    if which::which("git").is_ok() {
        return true;
    }
    eprintln!("git not found in PATH, skipping");
    false
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed");
}

/// A minimal Hugo-ish checkout: a bundle page with an embed shortcode, a
/// standalone page with a remote image, and a config that allows every
/// image domain. Files are staged so `git ls-files` sees them; no commit
/// (or git identity) is needed.
fn seed_site(dir: &Path) {
    git(dir, &["init", "--quiet"]);

    fs::write(dir.join("hugo.toml"), "languageCode = \"en-US\"\n").unwrap();
    fs::write(
        dir.join(".auxmark.toml"),
        "[detectors.image_localizer]\nallowlist = [\"*\"]\n",
    )
    .unwrap();

    let bundle = dir.join("content").join("posts").join("launch");
    fs::create_dir_all(&bundle).unwrap();
    fs::write(
        bundle.join("index.md"),
        "# Launch\n\n{{< x user=\"NASA\" id=\"1409931320692445191\" >}}\n",
    )
    .unwrap();

    fs::write(
        dir.join("content").join("posts").join("cats.md"),
        "# Cats\n\n![a cat](https://img.example.com/cat.jpg)\n",
    )
    .unwrap();

    git(dir, &["add", "."]);
}

/// Sorted (path, bytes) pairs for every working-tree file under `root`,
/// so a dry run can be checked byte for byte. Git's own bookkeeping is
/// skipped; the discovery commands legitimately read the repository.
fn tree_snapshot(root: &Path) -> Vec<(String, Vec<u8>)> {
    fn walk(root: &Path, dir: &Path, entries: &mut Vec<(String, Vec<u8>)>) {
        for entry in fs::read_dir(dir).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                if path.file_name().is_some_and(|name| name == ".git") {
                    continue;
                }
                walk(root, &path, entries);
            } else {
                let relative = path.strip_prefix(root).unwrap();
                entries.push((
                    relative.to_string_lossy().into_owned(),
                    fs::read(&path).unwrap(),
                ));
            }
        }
    }

    let mut entries = Vec::new();
    walk(root, root, &mut entries);
    entries.sort();
    entries
}

#[test]
fn help_documents_the_surface() {
    let mut cmd = cargo_bin_cmd!("auxmark");
    let output = cmd
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("--detector"), "help missing --detector");
    assert!(text.contains("--dry-run"), "help missing --dry-run");
    assert!(text.contains("--workers"), "help missing --workers");
    assert!(text.contains("--config"), "help missing --config");
}

#[test]
fn outside_a_repository_is_a_setup_error() {
    let dir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("auxmark");
    cmd.current_dir(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("auxmark:"));
}

#[test]
fn entirely_unknown_detector_selection_fails() {
    if !git_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    seed_site(dir.path());

    let mut cmd = cargo_bin_cmd!("auxmark");
    cmd.current_dir(dir.path())
        .args(["--detector", "bogus", "--dry-run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no valid detectors"));
}

#[test]
fn dry_run_reports_without_touching_the_checkout() {
    if !git_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    seed_site(dir.path());
    let before = tree_snapshot(dir.path());

    let mut cmd = cargo_bin_cmd!("auxmark");
    let output = cmd
        .current_dir(dir.path())
        .arg("--dry-run")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);

    // The standalone page promotes virtually and is scanned again under
    // its bundle identity, so two documents produce three scans.
    assert!(
        text.contains("documents scanned:   3"),
        "unexpected scan count in:\n{text}"
    );
    assert!(
        text.contains("documents promoted:  1"),
        "missing promotion in:\n{text}"
    );
    assert!(
        text.contains("2 submitted, 2 succeeded, 0 failed"),
        "unexpected job tally in:\n{text}"
    );

    assert_eq!(tree_snapshot(dir.path()), before);
    assert!(!dir.path().join("data").exists(), "dry run created data/");
}

#[test]
fn dry_run_with_a_single_detector_skips_the_others() {
    if !git_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    seed_site(dir.path());

    let mut cmd = cargo_bin_cmd!("auxmark");
    let output = cmd
        .current_dir(dir.path())
        .args(["--detector", "embed", "--dry-run"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);

    // Without the image localizer nothing requests expansion.
    assert!(
        text.contains("documents scanned:   2"),
        "unexpected scan count in:\n{text}"
    );
    assert!(
        text.contains("documents promoted:  0"),
        "unexpected promotion in:\n{text}"
    );
    assert!(
        text.contains("1 submitted, 1 succeeded, 0 failed"),
        "unexpected job tally in:\n{text}"
    );

    let cats_bundle = dir.path().join("content").join("posts").join("cats");
    assert!(!cats_bundle.exists(), "document was promoted on disk");
}
