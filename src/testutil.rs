//! Deterministic fixture repositories for tests, built with git
//! plumbing commands so object ids and timestamps are reproducible.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use gix::ObjectId;
use tempfile::TempDir;

use crate::repo::Repository;

/// A bare repository with two commits:
///
/// * `root_commit` — tree: `hello.txt` (`hi\n`), no parent.
/// * `child_commit` — parent `root_commit`; tree: `hello.txt`, a file
///   whose name exceeds the consumer buffer chunk, a `link` symlink
///   (excluded from the projected namespace), and `sub/nested.txt`.
pub(crate) struct Fixture {
    _dir: TempDir,
    pub path: PathBuf,
    pub repo: Arc<Repository>,
    pub root_commit: ObjectId,
    pub child_commit: ObjectId,
    pub hello_blob: ObjectId,
    pub nested_len: u64,
    /// Every blob object in the store, including the symlink target.
    pub all_blobs: Vec<ObjectId>,
}

impl Fixture {
    /// Committer timestamp used for both commits (seconds since epoch).
    pub const COMMIT_TIME: u64 = 1_700_000_000;

    /// 80 bytes: longer than one 64-byte buffer increment.
    pub const LONG_NAME: &'static str =
        "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa.txt";

    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("repo.git");
        run_git(
            dir.path(),
            &[
                "init",
                "-q",
                "--bare",
                "--object-format=sha1",
                path.to_str().unwrap(),
            ],
            None,
        );

        let hello = hash_object(&path, b"hi\n");
        let long_content = hash_object(&path, b"the quick brown fox\n");
        let nested_content = b"nested content\n";
        let nested = hash_object(&path, nested_content);
        let link_target = hash_object(&path, b"hello.txt");

        let subtree = mktree(&path, &[format!("100644 blob {nested}\tnested.txt")]);
        let root_tree = mktree(&path, &[format!("100644 blob {hello}\thello.txt")]);
        let child_tree = mktree(
            &path,
            &[
                format!("100644 blob {long_content}\t{}", Self::LONG_NAME),
                format!("100644 blob {hello}\thello.txt"),
                format!("120000 blob {link_target}\tlink"),
                format!("040000 tree {subtree}\tsub"),
            ],
        );

        let root_commit = commit_tree(&path, &root_tree, None);
        let child_commit = commit_tree(&path, &child_tree, Some(&root_commit));

        let repo = Arc::new(Repository::open(&path).expect("open fixture repository"));
        Fixture {
            _dir: dir,
            path,
            repo,
            root_commit: oid(&root_commit),
            child_commit: oid(&child_commit),
            hello_blob: oid(&hello),
            nested_len: nested_content.len() as u64,
            all_blobs: vec![
                oid(&hello),
                oid(&long_content),
                oid(&nested),
                oid(&link_target),
            ],
        }
    }

    /// A well-formed id that names nothing in the fixture store.
    pub fn missing_oid() -> ObjectId {
        oid("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef")
    }
}

/// A bare repository containing no objects at all.
pub(crate) fn empty_repo() -> (TempDir, Arc<Repository>) {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("empty.git");
    run_git(
        dir.path(),
        &[
            "init",
            "-q",
            "--bare",
            "--object-format=sha1",
            path.to_str().unwrap(),
        ],
        None,
    );
    let repo = Arc::new(Repository::open(&path).expect("open fixture repository"));
    (dir, repo)
}

fn oid(hex: &str) -> ObjectId {
    ObjectId::from_hex(hex.as_bytes()).expect("valid oid")
}

fn hash_object(repo: &Path, content: &[u8]) -> String {
    run_git(
        repo,
        &["-C", repo.to_str().unwrap(), "hash-object", "-w", "--stdin"],
        Some(content),
    )
}

fn mktree(repo: &Path, lines: &[String]) -> String {
    let input = lines.join("\n") + "\n";
    run_git(
        repo,
        &["-C", repo.to_str().unwrap(), "mktree"],
        Some(input.as_bytes()),
    )
}

fn commit_tree(repo: &Path, tree: &str, parent: Option<&str>) -> String {
    let mut args = vec!["-C", repo.to_str().unwrap(), "commit-tree", "-m", "snapshot"];
    if let Some(parent) = parent {
        args.push("-p");
        args.push(parent);
    }
    args.push(tree);
    run_git(repo, &args, None)
}

/// Runs git with pinned identity and dates; panics loudly on failure.
fn run_git(cwd: &Path, args: &[&str], stdin: Option<&[u8]>) -> String {
    let date = format!("{} +0000", Fixture::COMMIT_TIME);
    let mut child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_AUTHOR_NAME", "Fixture")
        .env("GIT_AUTHOR_EMAIL", "fixture@example.com")
        .env("GIT_AUTHOR_DATE", &date)
        .env("GIT_COMMITTER_NAME", "Fixture")
        .env("GIT_COMMITTER_EMAIL", "fixture@example.com")
        .env("GIT_COMMITTER_DATE", &date)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn git");
    if let Some(bytes) = stdin {
        child
            .stdin
            .as_mut()
            .expect("git stdin")
            .write_all(bytes)
            .expect("write git stdin");
    }
    let output = child.wait_with_output().expect("run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout)
        .expect("git output is utf-8")
        .trim()
        .to_string()
}
