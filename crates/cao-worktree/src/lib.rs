//! Worktree manager: one isolated git worktree per code-mutating subtask,
//! merged back into the base checkout when the subtask succeeds.
//!
//! All git interaction shells out to the `git` binary with `--` guards;
//! when git or a repository is missing the caller gets a capability
//! answer and falls back to serialised execution under the file locks.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const WORKTREES_DIR: &str = "worktrees";

/// How a finished worktree is folded back into the base checkout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// `git merge --squash` + one commit.
    Squash,
    /// `git merge --no-ff`.
    Merge,
    /// Check out only the declared files from the worktree branch.
    Selective,
}

/// Whether worktrees can be used at all in this working directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Available,
    GitMissing,
    NotARepository,
}

/// Result of a merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// The worktree produced no changes.
    NothingToMerge,
    /// Conflicting paths; the base checkout was restored.
    Conflict { files: Vec<String> },
}

/// An isolated working copy for one subtask.
#[derive(Debug, Clone)]
pub struct Worktree {
    pub subtask_id: String,
    pub path: PathBuf,
    pub branch: String,
    repo: PathBuf,
}

/// Detect whether worktrees are usable for `repo`.
pub fn capability(repo: &Path) -> Capability {
    let Ok(output) = Command::new("git").arg("--version").output() else {
        return Capability::GitMissing;
    };
    if !output.status.success() {
        return Capability::GitMissing;
    }

    match git(repo, &["rev-parse", "--git-dir"]) {
        Ok(_) => Capability::Available,
        Err(_) => Capability::NotARepository,
    }
}

/// Create a worktree for a subtask under `<task_dir>/worktrees/<subtask_id>`,
/// branched from the current HEAD.
pub fn create(repo: &Path, task_dir: &Path, subtask_id: &str) -> Result<Worktree> {
    let worktrees = task_dir.join(WORKTREES_DIR);
    std::fs::create_dir_all(&worktrees)
        .with_context(|| format!("failed to create {}", worktrees.display()))?;

    let path = worktrees.join(subtask_id);
    let branch = format!("cao/{subtask_id}");
    git(
        repo,
        &[
            "worktree",
            "add",
            "-b",
            &branch,
            path.to_str().context("worktree path is not UTF-8")?,
            "HEAD",
        ],
    )
    .with_context(|| format!("failed to add worktree for subtask '{subtask_id}'"))?;

    debug!(subtask_id, path = %path.display(), "worktree created");
    Ok(Worktree {
        subtask_id: subtask_id.to_string(),
        path,
        branch,
        repo: repo.to_path_buf(),
    })
}

impl Worktree {
    /// Stage and commit everything the subtask changed.
    /// Returns false when there was nothing to commit.
    pub fn commit_all(&self, message: &str) -> Result<bool> {
        git(&self.path, &["add", "-A"])?;

        // Exit codes for `git diff --cached --quiet`: 0 = clean, 1 = dirty.
        let status = Command::new("git")
            .args(["diff", "--cached", "--quiet"])
            .current_dir(&self.path)
            .output()
            .context("failed to run git diff --cached")?;
        match status.status.code() {
            Some(0) => return Ok(false),
            Some(1) => {}
            code => bail!("git diff --cached failed (exit {code:?})"),
        }

        git(&self.path, &["commit", "-m", message])?;
        Ok(true)
    }

    /// Fold the worktree branch back into the base checkout.
    ///
    /// Conflicts restore the base checkout (`merge --abort` /
    /// `reset --merge`) and are reported with the conflicting paths.
    pub fn merge(&self, strategy: MergeStrategy, files: &BTreeSet<String>) -> Result<MergeOutcome> {
        let message = format!("merge subtask {}", self.subtask_id);
        match strategy {
            MergeStrategy::Squash => {
                if let Err(e) = git(&self.repo, &["merge", "--squash", &self.branch]) {
                    return self.conflict_outcome("reset", e);
                }
                // Squash with no content changes stages nothing.
                let status = Command::new("git")
                    .args(["diff", "--cached", "--quiet"])
                    .current_dir(&self.repo)
                    .output()
                    .context("failed to run git diff --cached")?;
                if status.status.code() == Some(0) {
                    return Ok(MergeOutcome::NothingToMerge);
                }
                git(&self.repo, &["commit", "-m", &message])?;
            }
            MergeStrategy::Merge => {
                if let Err(e) = git(&self.repo, &["merge", "--no-ff", "-m", &message, &self.branch])
                {
                    return self.conflict_outcome("abort", e);
                }
            }
            MergeStrategy::Selective => {
                if files.is_empty() {
                    return Ok(MergeOutcome::NothingToMerge);
                }
                let mut args = vec!["checkout", self.branch.as_str(), "--"];
                args.extend(files.iter().map(String::as_str));
                git(&self.repo, &args)?;
                git(&self.repo, &["add", "-A"])?;
                git(&self.repo, &["commit", "-m", &message])?;
            }
        }
        Ok(MergeOutcome::Merged)
    }

    fn conflict_outcome(&self, recovery: &str, source: anyhow::Error) -> Result<MergeOutcome> {
        let conflicted = git(&self.repo, &["diff", "--name-only", "--diff-filter=U"])
            .unwrap_or_default();
        let files: Vec<String> = conflicted
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        if files.is_empty() {
            // Not a conflict after all; surface the original failure.
            return Err(source);
        }

        // Restore the base checkout.
        let restore = match recovery {
            "abort" => git(&self.repo, &["merge", "--abort"]),
            _ => git(&self.repo, &["reset", "--merge"]),
        };
        if let Err(e) = restore {
            warn!(error = %e, "failed to restore base checkout after merge conflict");
        }

        debug!(subtask_id = %self.subtask_id, ?files, "merge conflict");
        Ok(MergeOutcome::Conflict { files })
    }

    /// Remove the worktree and its branch.
    pub fn remove(&self) -> Result<()> {
        git(
            &self.repo,
            &[
                "worktree",
                "remove",
                "--force",
                self.path.to_str().context("worktree path is not UTF-8")?,
            ],
        )?;
        if let Err(e) = git(&self.repo, &["branch", "-D", &self.branch]) {
            warn!(branch = %self.branch, error = %e, "failed to delete worktree branch");
        }
        Ok(())
    }
}

/// Remove every worktree left under a task directory (task cleanup).
pub fn cleanup_task_worktrees(repo: &Path, task_dir: &Path) -> Result<()> {
    let worktrees = task_dir.join(WORKTREES_DIR);
    if !worktrees.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(&worktrees)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(path_str) = path.to_str() {
            if let Err(e) = git(repo, &["worktree", "remove", "--force", path_str]) {
                warn!(path = %path.display(), error = %e, "failed to remove worktree");
            }
        }
    }
    let _ = git(repo, &["worktree", "prune"]);
    Ok(())
}

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed (exit {:?}): {}",
            args.join(" "),
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) {
        run(dir, &["init", "-b", "main"]);
        run(dir, &["config", "user.email", "cao@localhost"]);
        run(dir, &["config", "user.name", "cao test"]);
        std::fs::write(dir.join("base.txt"), "base\n").unwrap();
        run(dir, &["add", "-A"]);
        run(dir, &["commit", "-m", "initial"]);
    }

    fn run(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    #[test]
    fn test_capability_detection() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(capability(tmp.path()), Capability::NotARepository);
        init_repo(tmp.path());
        assert_eq!(capability(tmp.path()), Capability::Available);
    }

    #[test]
    fn test_create_commit_and_squash_merge() {
        let repo = tempfile::tempdir().unwrap();
        let task_dir = tempfile::tempdir().unwrap();
        init_repo(repo.path());

        let wt = create(repo.path(), task_dir.path(), "s1").unwrap();
        assert!(wt.path.join("base.txt").exists());

        std::fs::write(wt.path.join("new.txt"), "from subtask\n").unwrap();
        assert!(wt.commit_all("subtask change").unwrap());

        let outcome = wt.merge(MergeStrategy::Squash, &BTreeSet::new()).unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(
            std::fs::read_to_string(repo.path().join("new.txt")).unwrap(),
            "from subtask\n"
        );
    }

    #[test]
    fn test_no_changes_yields_nothing_to_merge() {
        let repo = tempfile::tempdir().unwrap();
        let task_dir = tempfile::tempdir().unwrap();
        init_repo(repo.path());

        let wt = create(repo.path(), task_dir.path(), "s1").unwrap();
        assert!(!wt.commit_all("noop").unwrap());
        let outcome = wt.merge(MergeStrategy::Squash, &BTreeSet::new()).unwrap();
        assert_eq!(outcome, MergeOutcome::NothingToMerge);
    }

    #[test]
    fn test_merge_conflict_is_reported_and_base_restored() {
        let repo = tempfile::tempdir().unwrap();
        let task_dir = tempfile::tempdir().unwrap();
        init_repo(repo.path());

        let wt = create(repo.path(), task_dir.path(), "s1").unwrap();

        // Divergent edits to the same file.
        std::fs::write(wt.path.join("base.txt"), "subtask version\n").unwrap();
        assert!(wt.commit_all("subtask edit").unwrap());
        std::fs::write(repo.path().join("base.txt"), "main version\n").unwrap();
        run(repo.path(), &["add", "-A"]);
        run(repo.path(), &["commit", "-m", "main edit"]);

        let outcome = wt.merge(MergeStrategy::Merge, &BTreeSet::new()).unwrap();
        match outcome {
            MergeOutcome::Conflict { files } => {
                assert_eq!(files, vec!["base.txt".to_string()]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        // Base checkout restored to its own version.
        assert_eq!(
            std::fs::read_to_string(repo.path().join("base.txt")).unwrap(),
            "main version\n"
        );
    }

    #[test]
    fn test_selective_merge_takes_only_declared_files() {
        let repo = tempfile::tempdir().unwrap();
        let task_dir = tempfile::tempdir().unwrap();
        init_repo(repo.path());

        let wt = create(repo.path(), task_dir.path(), "s1").unwrap();
        std::fs::write(wt.path.join("wanted.txt"), "wanted\n").unwrap();
        std::fs::write(wt.path.join("ignored.txt"), "ignored\n").unwrap();
        assert!(wt.commit_all("two files").unwrap());

        let declared: BTreeSet<String> = ["wanted.txt".to_string()].into_iter().collect();
        let outcome = wt.merge(MergeStrategy::Selective, &declared).unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);
        assert!(repo.path().join("wanted.txt").exists());
        assert!(!repo.path().join("ignored.txt").exists());
    }

    #[test]
    fn test_remove_and_cleanup() {
        let repo = tempfile::tempdir().unwrap();
        let task_dir = tempfile::tempdir().unwrap();
        init_repo(repo.path());

        let wt = create(repo.path(), task_dir.path(), "s1").unwrap();
        let path = wt.path.clone();
        wt.remove().unwrap();
        assert!(!path.exists());

        let _wt2 = create(repo.path(), task_dir.path(), "s2").unwrap();
        cleanup_task_worktrees(repo.path(), task_dir.path()).unwrap();
        assert!(!task_dir.path().join(WORKTREES_DIR).join("s2").exists());
    }
}
