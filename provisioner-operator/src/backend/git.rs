//! Backend over a remote git repository
//!
//! Reads come from a bare mirror of the branch, fetched whenever files are
//! listed, diffed or the head revision is asked for. Writes go through a
//! throwaway clone: files are edited in its working tree, committed, and
//! pushed back to the branch.

use async_trait::async_trait;
use git2::build::RepoBuilder;
use git2::{
    Delta, DiffFindOptions, Direction, ErrorCode, FetchOptions, IndexAddOption, ObjectType, Oid,
    PushOptions, RemoteCallbacks, Repository, Signature, TreeWalkMode, TreeWalkResult,
};
use provisioner_core::domain::job::FileAction;
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::TempDir;
use tracing::{debug, info};

use super::{
    Backend, BackendError, FileChange, LocalBackend, StageMode, StageOptions, StagedBackend,
};

const DEFAULT_BRANCH: &str = "main";
const COMMITTER_NAME: &str = "Provisioner";
const COMMITTER_EMAIL: &str = "provisioner@localhost";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn push_options<'a>() -> PushOptions<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.push_update_reference(|refname, status| match status {
        Some(message) => Err(git2::Error::from_str(&format!(
            "push of {} rejected: {}",
            refname, message
        ))),
        None => Ok(()),
    });
    let mut options = PushOptions::new();
    options.remote_callbacks(callbacks);
    options
}

/// Runs blocking git work off the async runtime
async fn blocking<T, F>(f: F) -> Result<T, BackendError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::Other(format!("git task failed: {}", e)))?
}

struct Mirror {
    _dir: TempDir,
    repo: Repository,
}

struct Remote {
    url: String,
    branch: String,
    /// Directory inside the repository holding the resource files
    prefix: Option<String>,
    mirror: Mutex<Option<Mirror>>,
}

impl Remote {
    fn tracking_ref(&self) -> String {
        format!("refs/remotes/origin/{}", self.branch)
    }

    fn full_path(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, path),
            None => path.to_string(),
        }
    }

    /// Repository path relative to the prefix, for resource files only
    fn resource_path<'a>(&self, full: &'a str) -> Option<&'a str> {
        let relative = match &self.prefix {
            Some(prefix) => full.strip_prefix(prefix.as_str())?.strip_prefix('/')?,
            None => full,
        };
        let hidden = relative.split('/').any(|part| part.starts_with('.'));
        (!hidden && relative.ends_with(".json")).then_some(relative)
    }

    /// Hands over the mirror and the branch head. The branch is fetched
    /// first when `refresh` is set or nothing was fetched yet.
    fn with_head<T>(
        &self,
        refresh: bool,
        f: impl FnOnce(&Repository, Oid) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut guard = lock(&self.mirror);
        let fresh = guard.is_none();
        if fresh {
            let dir = TempDir::new()?;
            let repo = Repository::init_bare(dir.path())?;
            *guard = Some(Mirror { _dir: dir, repo });
        }
        let Some(mirror) = guard.as_ref() else {
            return Err(BackendError::Other("git mirror unavailable".to_string()));
        };

        if refresh || fresh {
            let refspec = format!("+refs/heads/{}:{}", self.branch, self.tracking_ref());
            mirror
                .repo
                .remote_anonymous(&self.url)?
                .fetch(&[refspec.as_str()], Some(&mut FetchOptions::new()), None)?;
        }

        let head = mirror
            .repo
            .refname_to_id(&self.tracking_ref())
            .map_err(|_| {
                BackendError::Other(format!("branch '{}' not found at {}", self.branch, self.url))
            })?;
        f(&mirror.repo, head)
    }

    fn list_files(&self) -> Result<Vec<String>, BackendError> {
        self.with_head(true, |repo, head| {
            let tree = repo.find_commit(head)?.tree()?;
            let mut files = Vec::new();
            tree.walk(TreeWalkMode::PreOrder, |root, entry| {
                let name = entry.name().unwrap_or_default();
                match entry.kind() {
                    Some(ObjectType::Tree) if name.starts_with('.') => TreeWalkResult::Skip,
                    Some(ObjectType::Blob) => {
                        let full = format!("{}{}", root, name);
                        if let Some(path) = self.resource_path(&full) {
                            files.push(path.to_string());
                        }
                        TreeWalkResult::Ok
                    }
                    _ => TreeWalkResult::Ok,
                }
            })?;
            files.sort();
            Ok(files)
        })
    }

    fn read_file(&self, path: &str) -> Result<JsonValue, BackendError> {
        let full = self.full_path(path);
        // Reads follow the revision of the last listing
        self.with_head(false, |repo, head| {
            let tree = repo.find_commit(head)?.tree()?;
            let entry = tree.get_path(Path::new(&full)).map_err(|e| {
                if e.code() == ErrorCode::NotFound {
                    BackendError::NotFound(path.to_string())
                } else {
                    BackendError::Git(e)
                }
            })?;
            let blob = repo
                .find_blob(entry.id())
                .map_err(|_| BackendError::NotFound(path.to_string()))?;
            serde_json::from_slice(blob.content()).map_err(|e| BackendError::InvalidFile {
                path: path.to_string(),
                message: e.to_string(),
            })
        })
    }

    fn changes_since(&self, since: &str) -> Result<Option<Vec<FileChange>>, BackendError> {
        let Ok(since) = Oid::from_str(since) else {
            return Ok(None);
        };
        self.with_head(true, |repo, head| {
            // History rewritten or never fetched: the caller falls back to a full sync
            let Ok(base) = repo.find_commit(since) else {
                return Ok(None);
            };
            let old_tree = base.tree()?;
            let new_tree = repo.find_commit(head)?.tree()?;
            let mut diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)?;
            let mut find = DiffFindOptions::new();
            find.renames(true);
            diff.find_similar(Some(&mut find))?;

            let mut changes = Vec::new();
            for delta in diff.deltas() {
                let old = delta.old_file().path().and_then(Path::to_str);
                let new = delta.new_file().path().and_then(Path::to_str);
                let old = old.and_then(|p| self.resource_path(p)).map(str::to_string);
                let new = new.and_then(|p| self.resource_path(p)).map(str::to_string);

                // Moves across the path boundary look like creations or deletions
                let (action, path, previous_path) = match (delta.status(), old, new) {
                    (Delta::Added | Delta::Copied, _, Some(p)) => (FileAction::Created, p, None),
                    (Delta::Modified | Delta::Typechange, _, Some(p)) => (FileAction::Updated, p, None),
                    (Delta::Deleted, Some(p), _) => (FileAction::Deleted, p, None),
                    (Delta::Renamed, Some(from), Some(to)) => (FileAction::Moved, to, Some(from)),
                    (Delta::Renamed, None, Some(to)) => (FileAction::Created, to, None),
                    (Delta::Renamed, Some(from), None) => (FileAction::Deleted, from, None),
                    _ => continue,
                };
                changes.push(FileChange {
                    action,
                    path,
                    previous_path,
                });
            }
            Ok(Some(changes))
        })
    }

    fn check(&self) -> Result<(), BackendError> {
        let mut remote = git2::Remote::create_detached(self.url.as_str())?;
        let connection = remote.connect_auth(Direction::Fetch, None, None)?;
        let wanted = format!("refs/heads/{}", self.branch);
        if connection.list()?.iter().any(|head| head.name() == wanted) {
            Ok(())
        } else {
            Err(BackendError::Other(format!(
                "branch '{}' not found at {}",
                self.branch, self.url
            )))
        }
    }

    /// Clones the branch and switches to `git_ref` when it names another branch
    fn checkout(&self, git_ref: Option<&str>) -> Result<Worktree, BackendError> {
        let dir = TempDir::new()?;
        let repo = RepoBuilder::new()
            .branch(&self.branch)
            .clone(&self.url, dir.path())?;
        let branch = git_ref
            .filter(|r| !r.is_empty())
            .unwrap_or(self.branch.as_str())
            .to_string();

        if branch != self.branch {
            let tracking = format!("refs/remotes/origin/{}", branch);
            let refspec = format!("+refs/heads/{}:{}", branch, tracking);
            let base = match repo
                .find_remote("origin")?
                .fetch(&[refspec.as_str()], None, None)
                .ok()
                .and_then(|()| repo.refname_to_id(&tracking).ok())
            {
                Some(existing) => repo.find_commit(existing)?,
                None => repo.head()?.peel_to_commit()?,
            };
            repo.branch(&branch, &base, true)?;
            repo.set_head(&format!("refs/heads/{}", branch))?;
            repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
            debug!("Staging on branch {} from {}", branch, base.id());
        }

        let root = match &self.prefix {
            Some(prefix) => dir.path().join(prefix),
            None => dir.path().to_path_buf(),
        };
        std::fs::create_dir_all(&root)?;

        Ok(Worktree {
            files: LocalBackend::new(root),
            repo: Mutex::new(repo),
            branch,
            _dir: dir,
        })
    }
}

/// Working tree of a staged clone
struct Worktree {
    files: LocalBackend,
    repo: Mutex<Repository>,
    branch: String,
    _dir: TempDir,
}

impl Worktree {
    /// Commits every working tree change; `None` when there is nothing to commit
    fn commit(&self, message: &str) -> Result<Option<Oid>, BackendError> {
        let repo = lock(&self.repo);
        let mut index = repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let parent = repo.head()?.peel_to_commit()?;
        if parent.tree_id() == tree_id {
            return Ok(None);
        }
        let tree = repo.find_tree(tree_id)?;
        let signature = Signature::now(COMMITTER_NAME, COMMITTER_EMAIL)?;
        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &[&parent])?;
        debug!("Committed {} on {}", oid, self.branch);
        Ok(Some(oid))
    }

    fn push(&self) -> Result<(), BackendError> {
        let repo = lock(&self.repo);
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", self.branch);
        repo.find_remote("origin")?
            .push(&[refspec.as_str()], Some(&mut push_options()))?;
        info!("Pushed branch {}", self.branch);
        Ok(())
    }
}

/// Git repository backend
pub struct GitBackend {
    remote: Arc<Remote>,
}

impl GitBackend {
    pub fn new(url: impl Into<String>, branch: Option<String>, path: Option<String>) -> Self {
        let prefix = path
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self {
            remote: Arc::new(Remote {
                url: url.into(),
                branch: branch
                    .filter(|b| !b.is_empty())
                    .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
                prefix,
                mirror: Mutex::new(None),
            }),
        }
    }

    async fn open_stage(&self, options: &StageOptions) -> Result<GitStage, BackendError> {
        let remote = Arc::clone(&self.remote);
        let git_ref = options.git_ref.clone();
        let worktree = blocking(move || remote.checkout(git_ref.as_deref())).await?;
        Ok(GitStage {
            files: StagedFiles {
                worktree: Arc::new(worktree),
                mode: options.mode,
                push_on_writes: options.push_on_writes,
            },
            commit_message: options.commit_message.clone(),
        })
    }

    /// Applies one change in a fresh clone and pushes it as a single commit
    async fn write_through(&self, message: &str, change: DirectChange<'_>) -> Result<(), BackendError> {
        let stage = self.open_stage(&StageOptions::commit_once(message)).await?;
        let files = stage.writer();
        match change {
            DirectChange::Write { path, body } => files.write_file(path, body, message).await?,
            DirectChange::Delete { path } => files.delete_file(path, message).await?,
            DirectChange::Move { from, to } => files.move_file(from, to, message).await?,
        }
        stage.push().await
    }
}

enum DirectChange<'a> {
    Write { path: &'a str, body: &'a JsonValue },
    Delete { path: &'a str },
    Move { from: &'a str, to: &'a str },
}

#[async_trait]
impl Backend for GitBackend {
    async fn list_files(&self) -> Result<Vec<String>, BackendError> {
        let remote = Arc::clone(&self.remote);
        blocking(move || remote.list_files()).await
    }

    async fn read_file(&self, path: &str) -> Result<JsonValue, BackendError> {
        let remote = Arc::clone(&self.remote);
        let path = path.to_string();
        blocking(move || remote.read_file(&path)).await
    }

    async fn write_file(
        &self,
        path: &str,
        body: &JsonValue,
        message: &str,
    ) -> Result<(), BackendError> {
        self.write_through(message, DirectChange::Write { path, body })
            .await
    }

    async fn delete_file(&self, path: &str, message: &str) -> Result<(), BackendError> {
        self.write_through(message, DirectChange::Delete { path })
            .await
    }

    async fn move_file(&self, from: &str, to: &str, message: &str) -> Result<(), BackendError> {
        self.write_through(message, DirectChange::Move { from, to })
            .await
    }

    async fn test(&self) -> Result<(), BackendError> {
        let remote = Arc::clone(&self.remote);
        blocking(move || remote.check()).await
    }

    async fn latest_ref(&self) -> Result<Option<String>, BackendError> {
        let remote = Arc::clone(&self.remote);
        blocking(move || remote.with_head(true, |_, head| Ok(Some(head.to_string())))).await
    }

    async fn changes_since(&self, since: &str) -> Result<Option<Vec<FileChange>>, BackendError> {
        let remote = Arc::clone(&self.remote);
        let since = since.to_string();
        blocking(move || remote.changes_since(&since)).await
    }

    async fn stage(
        &self,
        options: &StageOptions,
    ) -> Result<Option<Box<dyn StagedBackend>>, BackendError> {
        Ok(Some(Box::new(self.open_stage(options).await?)))
    }
}

/// Files of a staged clone; commits follow the stage mode
struct StagedFiles {
    worktree: Arc<Worktree>,
    mode: StageMode,
    push_on_writes: bool,
}

impl StagedFiles {
    async fn after_write(&self, message: &str) -> Result<(), BackendError> {
        if self.mode != StageMode::CommitPerWrite && !self.push_on_writes {
            return Ok(());
        }
        let worktree = Arc::clone(&self.worktree);
        let message = message.to_string();
        let push = self.push_on_writes;
        blocking(move || {
            worktree.commit(&message)?;
            if push {
                worktree.push()?;
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl Backend for StagedFiles {
    async fn list_files(&self) -> Result<Vec<String>, BackendError> {
        self.worktree.files.list_files().await
    }

    async fn read_file(&self, path: &str) -> Result<JsonValue, BackendError> {
        self.worktree.files.read_file(path).await
    }

    async fn write_file(
        &self,
        path: &str,
        body: &JsonValue,
        message: &str,
    ) -> Result<(), BackendError> {
        self.worktree.files.write_file(path, body, message).await?;
        self.after_write(message).await
    }

    async fn delete_file(&self, path: &str, message: &str) -> Result<(), BackendError> {
        self.worktree.files.delete_file(path, message).await?;
        self.after_write(message).await
    }

    async fn move_file(&self, from: &str, to: &str, message: &str) -> Result<(), BackendError> {
        self.worktree.files.move_file(from, to, message).await?;
        self.after_write(message).await
    }

    async fn test(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// A clone whose writes reach the remote on `push`
pub struct GitStage {
    files: StagedFiles,
    commit_message: String,
}

#[async_trait]
impl StagedBackend for GitStage {
    fn writer(&self) -> &dyn Backend {
        &self.files
    }

    async fn push(&self) -> Result<(), BackendError> {
        let worktree = Arc::clone(&self.files.worktree);
        let message = self.commit_message.clone();
        blocking(move || {
            worktree.commit(&message)?;
            worktree.push()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::RepositoryInitOptions;
    use serde_json::json;

    fn init_bare(path: &Path, branch: &str) {
        let mut options = RepositoryInitOptions::new();
        options.bare(true).initial_head(branch);
        Repository::init_opts(path, &options).unwrap();
    }

    /// A bare remote seeded with one commit on `main`
    struct Origin {
        dir: TempDir,
    }

    impl Origin {
        fn seed(files: &[(&str, JsonValue)]) -> Self {
            let dir = TempDir::new().unwrap();
            init_bare(dir.path(), "main");

            let work = TempDir::new().unwrap();
            let mut options = RepositoryInitOptions::new();
            options.initial_head("main");
            let repo = Repository::init_opts(work.path(), &options).unwrap();
            for (path, body) in files {
                let full = work.path().join(path);
                std::fs::create_dir_all(full.parent().unwrap()).unwrap();
                std::fs::write(full, serde_json::to_vec_pretty(body).unwrap()).unwrap();
            }
            let mut index = repo.index().unwrap();
            index.add_all(["*"], IndexAddOption::DEFAULT, None).unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let signature = Signature::now("seed", "seed@localhost").unwrap();
            repo.commit(Some("HEAD"), &signature, &signature, "seed", &tree, &[])
                .unwrap();

            let url = dir.path().to_str().unwrap();
            repo.remote("origin", url)
                .unwrap()
                .push(&["refs/heads/main:refs/heads/main"], None)
                .unwrap();
            Self { dir }
        }

        fn url(&self) -> String {
            self.dir.path().to_str().unwrap().to_string()
        }

        fn backend(&self) -> GitBackend {
            GitBackend::new(self.url(), Some("main".to_string()), None)
        }

        fn head(&self, branch: &str) -> Option<Oid> {
            let repo = Repository::open_bare(self.dir.path()).unwrap();
            repo.refname_to_id(&format!("refs/heads/{}", branch)).ok()
        }

        fn commit_count(&self) -> usize {
            let repo = Repository::open_bare(self.dir.path()).unwrap();
            let mut walk = repo.revwalk().unwrap();
            walk.push_ref("refs/heads/main").unwrap();
            walk.count()
        }
    }

    fn dashboard(name: &str, title: &str) -> JsonValue {
        json!({"kind": "Dashboard", "metadata": {"name": name}, "spec": {"title": title}})
    }

    #[tokio::test]
    async fn test_lists_and_reads_resource_files() {
        let origin = Origin::seed(&[
            ("dashboards/a.json", dashboard("a", "A")),
            ("dashboards/b.json", dashboard("b", "B")),
            ("README.json.md", json!({})),
            (".github/ci.json", json!({})),
        ]);
        let backend = origin.backend();

        assert_eq!(
            backend.list_files().await.unwrap(),
            vec!["dashboards/a.json", "dashboards/b.json"]
        );
        assert_eq!(
            backend.read_file("dashboards/a.json").await.unwrap(),
            dashboard("a", "A")
        );
        assert!(
            backend
                .read_file("dashboards/missing.json")
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert_eq!(
            backend.latest_ref().await.unwrap(),
            origin.head("main").map(|oid| oid.to_string())
        );
        backend.test().await.unwrap();
    }

    #[tokio::test]
    async fn test_path_scopes_files() {
        let origin = Origin::seed(&[
            ("grafana/a.json", dashboard("a", "A")),
            ("other/b.json", dashboard("b", "B")),
        ]);
        let backend = GitBackend::new(origin.url(), None, Some("/grafana/".to_string()));

        assert_eq!(backend.list_files().await.unwrap(), vec!["a.json"]);
        assert_eq!(backend.read_file("a.json").await.unwrap(), dashboard("a", "A"));
    }

    #[tokio::test]
    async fn test_missing_branch_fails_health_check() {
        let origin = Origin::seed(&[("a.json", dashboard("a", "A"))]);
        let backend = GitBackend::new(origin.url(), Some("release".to_string()), None);
        let err = backend.test().await.unwrap_err();
        assert!(err.to_string().contains("branch 'release' not found"));
    }

    #[tokio::test]
    async fn test_staged_writes_land_in_one_commit_on_push() {
        let origin = Origin::seed(&[
            ("a.json", dashboard("a", "A")),
            ("b.json", dashboard("b", "B")),
        ]);
        let backend = origin.backend();

        let stage = backend
            .stage(&StageOptions::commit_once("export resources"))
            .await
            .unwrap()
            .unwrap();
        let writer = stage.writer();
        writer.write_file("c.json", &dashboard("c", "C"), "add c").await.unwrap();
        writer.write_file("a.json", &dashboard("a", "A v2"), "update a").await.unwrap();
        writer.delete_file("b.json", "remove b").await.unwrap();

        // Nothing is visible before the push
        assert_eq!(backend.list_files().await.unwrap(), vec!["a.json", "b.json"]);

        stage.push().await.unwrap();
        assert_eq!(backend.list_files().await.unwrap(), vec!["a.json", "c.json"]);
        assert_eq!(backend.read_file("a.json").await.unwrap(), dashboard("a", "A v2"));
        assert_eq!(origin.commit_count(), 2);
    }

    #[tokio::test]
    async fn test_commit_per_write_mode() {
        let origin = Origin::seed(&[("a.json", dashboard("a", "A"))]);
        let backend = origin.backend();

        let mut options = StageOptions::commit_once("unused");
        options.mode = StageMode::CommitPerWrite;
        let stage = backend.stage(&options).await.unwrap().unwrap();
        stage
            .writer()
            .write_file("b.json", &dashboard("b", "B"), "add b")
            .await
            .unwrap();
        stage
            .writer()
            .write_file("c.json", &dashboard("c", "C"), "add c")
            .await
            .unwrap();
        stage.push().await.unwrap();

        assert_eq!(origin.commit_count(), 3);
    }

    #[tokio::test]
    async fn test_changes_since_maps_file_actions() {
        let origin = Origin::seed(&[
            ("a.json", dashboard("a", "A")),
            ("b.json", dashboard("b", "B")),
            ("c.json", dashboard("c", "C")),
        ]);
        let backend = origin.backend();
        let base = backend.latest_ref().await.unwrap().unwrap();

        let stage = backend
            .stage(&StageOptions::commit_once("reshuffle"))
            .await
            .unwrap()
            .unwrap();
        let writer = stage.writer();
        writer.write_file("a.json", &dashboard("a", "A v2"), "").await.unwrap();
        writer.delete_file("b.json", "").await.unwrap();
        writer.move_file("c.json", "moved/c.json", "").await.unwrap();
        let alert = json!({
            "kind": "AlertRule",
            "metadata": {"name": "disk-usage", "labels": {"team": "storage"}},
            "spec": {"query": "disk_used_percent", "threshold": 90, "for": "5m"}
        });
        writer.write_file("e.json", &alert, "").await.unwrap();
        stage.push().await.unwrap();

        let mut changes = backend.changes_since(&base).await.unwrap().unwrap();
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        let summary: Vec<_> = changes
            .iter()
            .map(|c| (c.action, c.path.as_str(), c.previous_path.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (FileAction::Updated, "a.json", None),
                (FileAction::Deleted, "b.json", None),
                (FileAction::Created, "e.json", None),
                (FileAction::Moved, "moved/c.json", Some("c.json")),
            ]
        );

        let head = backend.latest_ref().await.unwrap().unwrap();
        assert_eq!(backend.changes_since(&head).await.unwrap(), Some(Vec::new()));
        assert_eq!(backend.changes_since("not-a-revision").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_direct_write_is_pushed() {
        let origin = Origin::seed(&[("a.json", dashboard("a", "A"))]);
        let backend = origin.backend();

        backend
            .write_file("b.json", &dashboard("b", "B"), "add b")
            .await
            .unwrap();
        backend.move_file("a.json", "old/a.json", "move a").await.unwrap();

        assert_eq!(
            backend.list_files().await.unwrap(),
            vec!["b.json", "old/a.json"]
        );
        assert_eq!(origin.commit_count(), 3);
    }

    #[tokio::test]
    async fn test_stage_on_ref_pushes_new_branch() {
        let origin = Origin::seed(&[("a.json", dashboard("a", "A"))]);
        let backend = origin.backend();
        let main = origin.head("main");

        let options = StageOptions::commit_once("on a branch").with_ref(Some("feature".to_string()));
        let stage = backend.stage(&options).await.unwrap().unwrap();
        stage
            .writer()
            .write_file("b.json", &dashboard("b", "B"), "add b")
            .await
            .unwrap();
        stage.push().await.unwrap();

        assert_eq!(origin.head("main"), main);
        assert!(origin.head("feature").is_some());
        let feature = GitBackend::new(origin.url(), Some("feature".to_string()), None);
        assert_eq!(feature.list_files().await.unwrap(), vec!["a.json", "b.json"]);
    }
}
