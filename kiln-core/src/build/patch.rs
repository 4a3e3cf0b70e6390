// kiln-core/src/build/patch.rs
// In-process application of unified diffs. A patch file may carry several
// file sections (as `git format-patch` writes them); anything outside a
// `---`/`+++` header and its hunks is commentary and ignored.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use kiln_common::error::{KilnError, Result};
use tracing::debug;

use super::extract::SourceTree;

const DEV_NULL: &str = "/dev/null";

/// A fetched and verified patch, ready to apply.
#[derive(Debug, Clone)]
pub struct PatchFile {
    pub name: String,
    pub path: PathBuf,
    pub strip: usize,
}

/// Source tree after patching, with every file a patch created, modified or
/// deleted (relative to the source root).
#[derive(Debug, Clone, Default)]
pub struct PatchedSource {
    pub root: PathBuf,
    pub touched: BTreeSet<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
struct FileSection {
    old_name: String,
    new_name: String,
    /// Hunks only, starting at the first `@@` line.
    hunks: Vec<u8>,
}

/// Applies `patches` in order. Stops at the first patch that does not apply;
/// files changed by earlier patches stay changed.
pub fn apply_patches(source: &SourceTree, patches: &[PatchFile]) -> Result<PatchedSource> {
    let mut patched = PatchedSource {
        root: source.root.clone(),
        touched: BTreeSet::new(),
    };
    for patch in patches {
        debug!("Applying patch {} (-p{})", patch.name, patch.strip);
        let failure = |reason: String| KilnError::PatchApplyFailure {
            patch: patch.name.clone(),
            reason,
        };
        let text = fs::read(&patch.path)
            .map_err(|e| failure(format!("cannot read {}: {}", patch.path.display(), e)))?;
        let sections = parse_sections(&text).map_err(failure)?;
        if sections.is_empty() {
            return Err(failure("no file sections found".to_string()));
        }
        for section in &sections {
            let touched = apply_section(&source.root, section, patch.strip).map_err(failure)?;
            debug!("  patched {}", touched.display());
            patched.touched.insert(touched);
        }
    }
    Ok(patched)
}

fn apply_section(
    root: &Path,
    section: &FileSection,
    strip: usize,
) -> std::result::Result<PathBuf, String> {
    let creates = section.old_name == DEV_NULL;
    let deletes = section.new_name == DEV_NULL;
    let name = if deletes {
        &section.old_name
    } else {
        &section.new_name
    };
    let relative = strip_path(name, strip)?;
    let target = root.join(&relative);

    let base = if creates {
        if target.exists() {
            return Err(format!("{} already exists", relative.display()));
        }
        Vec::new()
    } else {
        fs::read(&target).map_err(|e| format!("cannot read {}: {}", relative.display(), e))?
    };

    let mut diff = b"--- a\n+++ b\n".to_vec();
    diff.extend_from_slice(&section.hunks);
    let parsed = diffy::Patch::from_bytes(&diff)
        .map_err(|e| format!("malformed diff for {}: {}", relative.display(), e))?;
    let result = diffy::apply_bytes(&base, &parsed)
        .map_err(|e| format!("{} in {}", e, relative.display()))?;

    if deletes {
        fs::remove_file(&target)
            .map_err(|e| format!("cannot delete {}: {}", relative.display(), e))?;
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }
        fs::write(&target, result)
            .map_err(|e| format!("cannot write {}: {}", relative.display(), e))?;
    }
    Ok(relative)
}

/// Drops `strip` leading components and refuses anything that could leave
/// the source tree.
fn strip_path(name: &str, strip: usize) -> std::result::Result<PathBuf, String> {
    let path = Path::new(name);
    if path.is_absolute() {
        return Err(format!("absolute path '{name}' in patch"));
    }
    let mut kept = PathBuf::new();
    for comp in path.components().skip(strip) {
        match comp {
            Component::Normal(part) => kept.push(part),
            Component::CurDir => {}
            _ => return Err(format!("unsafe path '{name}' in patch")),
        }
    }
    if kept.as_os_str().is_empty() {
        return Err(format!("path '{name}' is empty after stripping {strip} components"));
    }
    Ok(kept)
}

// File name from a `---`/`+++` header line, minus any timestamp.
fn header_name(rest: &[u8]) -> String {
    let rest = String::from_utf8_lossy(rest);
    let rest = rest.trim_end_matches(['\n', '\r']);
    rest.split('\t').next().unwrap_or(rest).trim_end().to_string()
}

fn is_binary_marker(line: &[u8]) -> bool {
    line.starts_with(b"GIT binary patch")
        || (line.starts_with(b"Binary files ") && line.trim_ascii_end().ends_with(b" differ"))
}

fn show(line: &[u8]) -> String {
    String::from_utf8_lossy(line).trim_end().to_string()
}

// (old count, new count) from `@@ -a[,b] +c[,d] @@`.
fn hunk_counts(line: &str) -> Option<(usize, usize)> {
    let body = line.strip_prefix("@@ ")?;
    let end = body.find(" @@")?;
    let mut ranges = body[..end].split(' ');
    let old = ranges.next()?.strip_prefix('-')?;
    let new = ranges.next()?.strip_prefix('+')?;
    let count = |range: &str| -> Option<usize> {
        match range.split_once(',') {
            Some((_, len)) => len.parse().ok(),
            None => range.parse::<usize>().ok().map(|_| 1),
        }
    };
    Some((count(old)?, count(new)?))
}

fn parse_sections(text: &[u8]) -> std::result::Result<Vec<FileSection>, String> {
    let lines: Vec<&[u8]> = text.split_inclusive(|b| *b == b'\n').collect();
    let mut sections = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if is_binary_marker(lines[i]) {
            return Err(format!("binary patches are not supported ('{}')", show(lines[i])));
        }
        let is_header = lines[i].starts_with(b"--- ")
            && lines.get(i + 1).is_some_and(|next| next.starts_with(b"+++ "));
        if !is_header {
            i += 1;
            continue;
        }
        let old_name = header_name(&lines[i][4..]);
        let new_name = header_name(&lines[i + 1][4..]);
        i += 2;

        let mut hunks = Vec::new();
        while let Some(line) = lines.get(i).copied().filter(|l| l.starts_with(b"@@ ")) {
            let (mut old_left, mut new_left) = std::str::from_utf8(line)
                .ok()
                .and_then(hunk_counts)
                .ok_or_else(|| format!("bad hunk header '{}'", show(line)))?;
            hunks.extend_from_slice(line);
            i += 1;
            while old_left > 0 || new_left > 0 {
                let line = lines
                    .get(i)
                    .copied()
                    .ok_or_else(|| format!("truncated hunk for {new_name}"))?;
                match line.first() {
                    Some(b' ') => {
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                    }
                    Some(b'-') => old_left = old_left.saturating_sub(1),
                    Some(b'+') => new_left = new_left.saturating_sub(1),
                    Some(b'\\') => {}
                    // Some mailers eat the space of an empty context line.
                    Some(b'\n') | Some(b'\r') => {
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                        hunks.push(b' ');
                    }
                    _ => return Err(format!("unexpected line in hunk: '{}'", show(line))),
                }
                hunks.extend_from_slice(line);
                i += 1;
            }
            if let Some(marker) = lines.get(i).copied().filter(|l| l.starts_with(b"\\")) {
                hunks.extend_from_slice(marker);
                i += 1;
            }
        }
        if hunks.is_empty() {
            return Err(format!("no hunks for {new_name}"));
        }
        sections.push(FileSection {
            old_name,
            new_name,
            hunks,
        });
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\nnine\nten\neleven\ntwelve\n";

    // A git-style file section for `name` turning `old` into `new`.
    fn section(name: &str, old: &str, new: &str) -> String {
        let diff = diffy::create_patch(old, new).to_string();
        let hunks: String = diff.split_inclusive('\n').skip(2).collect();
        format!("diff --git a/{name} b/{name}\nindex 1111111..2222222 100644\n--- a/{name}\n+++ b/{name}\n{hunks}")
    }

    fn format_patch(sections: &[String]) -> String {
        format!(
            "From 0123456789abcdef Mon Sep 17 00:00:00 2001\nFrom: Dev <dev@example.org>\nSubject: [PATCH] change things\n\n---\n src/a.txt | 2 +-\n\n{}-- \n2.11.0\n",
            sections.concat()
        )
    }

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, SourceTree) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("src-root");
        for (name, content) in files {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        (dir, SourceTree { root })
    }

    fn write_patch(dir: &Path, name: &str, text: &str) -> PatchFile {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        PatchFile {
            name: name.to_string(),
            path,
            strip: 1,
        }
    }

    #[test]
    fn applies_multi_file_format_patch() {
        let (dir, tree) = setup(&[("src/a.txt", BASE), ("configure.ac", "AC_INIT\nAC_OUTPUT\n")]);
        let text = format_patch(&[
            section("src/a.txt", BASE, &BASE.replace("two\n", "TWO\n")),
            section("configure.ac", "AC_INIT\nAC_OUTPUT\n", "AC_INIT\nAC_PROG_CXX\nAC_OUTPUT\n"),
        ]);
        let patch = write_patch(dir.path(), "0001.patch", &text);

        let patched = apply_patches(&tree, &[patch]).unwrap();
        assert_eq!(
            fs::read_to_string(tree.root.join("src/a.txt")).unwrap(),
            BASE.replace("two\n", "TWO\n")
        );
        assert_eq!(
            fs::read_to_string(tree.root.join("configure.ac")).unwrap(),
            "AC_INIT\nAC_PROG_CXX\nAC_OUTPUT\n"
        );
        let touched: Vec<_> = patched.touched.iter().cloned().collect();
        assert_eq!(
            touched,
            vec![PathBuf::from("configure.ac"), PathBuf::from("src/a.txt")]
        );
    }

    #[test]
    fn disjoint_patches_commute() {
        let early = section("a.txt", BASE, &BASE.replace("two\n", "TWO\n"));
        let late = section("a.txt", BASE, &BASE.replace("eleven\n", "ELEVEN\n"));

        let run = |order: [&str; 2]| {
            let (dir, tree) = setup(&[("a.txt", BASE)]);
            let patches: Vec<PatchFile> = order
                .iter()
                .enumerate()
                .map(|(i, text)| write_patch(dir.path(), &format!("{i}.patch"), text))
                .collect();
            apply_patches(&tree, &patches).unwrap();
            fs::read_to_string(tree.root.join("a.txt")).unwrap()
        };
        let forward = run([&early, &late]);
        assert_eq!(forward, run([&late, &early]));
        assert!(forward.contains("TWO\n") && forward.contains("ELEVEN\n"));
    }

    #[test]
    fn overlapping_patches_out_of_order_fail() {
        let first_result = BASE.replace("five\n", "FIVE\n");
        let first = section("a.txt", BASE, &first_result);
        let second = section("a.txt", &first_result, &first_result.replace("FIVE\n", "5\n"));

        let (dir, tree) = setup(&[("a.txt", BASE)]);
        let patches = vec![
            write_patch(dir.path(), "0002.patch", &second),
            write_patch(dir.path(), "0001.patch", &first),
        ];
        match apply_patches(&tree, &patches).unwrap_err() {
            KilnError::PatchApplyFailure { patch, .. } => assert_eq!(patch, "0002.patch"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fs::read_to_string(tree.root.join("a.txt")).unwrap(), BASE);

        let (dir, tree) = setup(&[("a.txt", BASE)]);
        let patches = vec![
            write_patch(dir.path(), "0001.patch", &first),
            write_patch(dir.path(), "0002.patch", &second),
        ];
        apply_patches(&tree, &patches).unwrap();
        assert!(fs::read_to_string(tree.root.join("a.txt")).unwrap().contains("5\n"));
    }

    #[test]
    fn creates_and_deletes_through_dev_null() {
        let (dir, tree) = setup(&[("old.txt", "bye\n")]);
        let created = diffy::create_patch("", "hello\nworld\n").to_string();
        let created: String = created.split_inclusive('\n').skip(2).collect();
        let deleted = diffy::create_patch("bye\n", "").to_string();
        let deleted: String = deleted.split_inclusive('\n').skip(2).collect();
        let text = format!(
            "--- /dev/null\n+++ b/new/file.txt\n{created}--- a/old.txt\n+++ /dev/null\n{deleted}"
        );
        let patch = write_patch(dir.path(), "files.patch", &text);

        let patched = apply_patches(&tree, &[patch]).unwrap();
        assert_eq!(
            fs::read_to_string(tree.root.join("new/file.txt")).unwrap(),
            "hello\nworld\n"
        );
        assert!(!tree.root.join("old.txt").exists());
        assert!(patched.touched.contains(Path::new("old.txt")));
    }

    #[test]
    fn blank_context_lines_are_tolerated() {
        let text = "--- a/f.txt\n+++ b/f.txt\n@@ -1,3 +1,3 @@\n a\n\n-b\n+B\n";
        let sections = parse_sections(text.as_bytes()).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].hunks, b"@@ -1,3 +1,3 @@\n a\n \n-b\n+B\n");
    }

    #[test]
    fn patches_files_that_are_not_utf8() {
        let (dir, tree) = setup(&[]);
        let latin1: &[u8] = b"caf\xe9\nold line\nend\n";
        fs::create_dir_all(&tree.root).unwrap();
        fs::write(tree.root.join("names.txt"), latin1).unwrap();

        let mut text = b"--- a/names.txt\n+++ b/names.txt\n@@ -1,3 +1,3 @@\n caf\xe9\n".to_vec();
        text.extend_from_slice(b"-old line\n+new line\n end\n");
        let path = dir.path().join("latin1.patch");
        fs::write(&path, &text).unwrap();
        let patch = PatchFile {
            name: "latin1.patch".to_string(),
            path,
            strip: 1,
        };

        apply_patches(&tree, &[patch]).unwrap();
        assert_eq!(
            fs::read(tree.root.join("names.txt")).unwrap(),
            b"caf\xe9\nnew line\nend\n"
        );
    }

    #[test]
    fn binary_sections_fail_instead_of_being_skipped() {
        let (dir, tree) = setup(&[("a.txt", BASE)]);
        let text = format!(
            "{}diff --git a/logo.png b/logo.png\nindex 1111111..2222222 100644\nGIT binary patch\nliteral 4\nLcmZ?d00001\n\n",
            section("a.txt", BASE, &BASE.replace("two\n", "TWO\n"))
        );
        let patch = write_patch(dir.path(), "binary.patch", &text);
        match apply_patches(&tree, &[patch]).unwrap_err() {
            KilnError::PatchApplyFailure { patch, reason } => {
                assert_eq!(patch, "binary.patch");
                assert!(reason.contains("binary"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fs::read_to_string(tree.root.join("a.txt")).unwrap(), BASE);

        let (dir, tree) = setup(&[("a.txt", BASE)]);
        let text = "diff --git a/logo.png b/logo.png\nBinary files a/logo.png and b/logo.png differ\n";
        let patch = write_patch(dir.path(), "short.patch", text);
        assert!(matches!(
            apply_patches(&tree, &[patch]),
            Err(KilnError::PatchApplyFailure { .. })
        ));
    }

    #[test]
    fn escaping_paths_are_rejected() {
        assert!(strip_path("a/../../etc/passwd", 1).is_err());
        assert!(strip_path("/etc/passwd", 0).is_err());
        assert!(strip_path("a", 1).is_err());
        assert_eq!(strip_path("a/poppler/Form.cc", 1).unwrap(), PathBuf::from("poppler/Form.cc"));
    }

    #[test]
    fn missing_target_names_the_patch() {
        let (dir, tree) = setup(&[]);
        let text = section("absent.txt", "x\n", "y\n");
        let patch = write_patch(dir.path(), "absent.patch", &text);
        let err = apply_patches(&tree, &[patch]).unwrap_err();
        assert!(err.to_string().contains("absent.patch"));
    }

    #[test]
    fn hunk_header_counts() {
        assert_eq!(hunk_counts("@@ -1,3 +1,4 @@ fn main"), Some((3, 4)));
        assert_eq!(hunk_counts("@@ -5 +5 @@"), Some((1, 1)));
        assert_eq!(hunk_counts("@@ -0,0 +1,2 @@"), Some((0, 2)));
        assert_eq!(hunk_counts("@@ nonsense"), None);
    }
}
