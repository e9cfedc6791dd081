use std::fmt::Write as _;
use std::fs;
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use camino::Utf8Path;
use gix::bstr::BString;
use gix::commit::NO_PARENT_IDS;
use gix::objs::{Tree, tree};

use crate::config::{DeployConfig, PathTable};
use crate::engine::{Task, TaskContext};
use crate::error::DeployError;
use crate::io;

/// Where the commit to publish is assembled, relative to the project root.
const STAGING: &str = ".sitepipe/deploy";

/// Runs git in `dir`, returning its trimmed standard output.
fn git(dir: &Utf8Path, args: &[&str]) -> Result<String, DeployError> {
    let command = args.join(" ");
    tracing::debug!("git {command}");

    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|source| DeployError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(DeployError::Git {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Quotes a git config value.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Creates an empty repository at `staging`, replacing whatever was there.
/// The configured identity is written into its config.
fn create_repo(staging: &Utf8Path, deploy: &DeployConfig) -> anyhow::Result<gix::Repository> {
    if staging.exists() {
        fs::remove_dir_all(staging).with_context(|| format!("Couldn't remove '{staging}'"))?;
    }
    fs::create_dir_all(staging).with_context(|| format!("Couldn't create '{staging}'"))?;

    let repo = gix::init(staging)?;

    let mut user = String::new();
    if let Some(name) = &deploy.name {
        writeln!(user, "\tname = {}", quote(name))?;
    }
    if let Some(email) = &deploy.email {
        writeln!(user, "\temail = {}", quote(email))?;
    }
    if user.is_empty() {
        return Ok(repo);
    }

    let config = repo.git_dir().join("config");
    let mut text = fs::read_to_string(&config)?;
    text.push_str("[user]\n");
    text.push_str(&user);
    fs::write(&config, text)?;

    // the identity is only picked up when the config is read again
    Ok(gix::open(staging)?)
}

/// Writes the files below `dir` as blobs and returns the tree holding them.
fn write_tree(repo: &gix::Repository, dir: &Utf8Path) -> anyhow::Result<Tree> {
    let mut entries = Vec::new();

    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        let path = entry.path();
        let filename = BString::from(entry.file_name());

        if path.is_dir() {
            let sub_tree = write_tree(repo, path)?;
            let oid = repo.write_object(&sub_tree)?.detach();
            entries.push(tree::Entry {
                mode: tree::EntryKind::Tree.into(),
                oid,
                filename,
            });
        } else if path.is_file() {
            let oid = repo.write_blob(io::read(path)?)?.detach();
            entries.push(tree::Entry {
                mode: tree::EntryKind::Blob.into(),
                oid,
                filename,
            });
        }
    }

    sort_tree_entries(&mut entries);
    Ok(Tree { entries })
}

/// Git compares directory names as if they ended with a slash.
fn sort_tree_entries(entries: &mut [tree::Entry]) {
    let tree_mode: tree::EntryMode = tree::EntryKind::Tree.into();
    entries.sort_by_cached_key(|entry| {
        let mut key = entry.filename.to_vec();
        if entry.mode == tree_mode {
            key.push(b'/');
        }
        key
    });
}

/// Commits the contents of `dist` as the parentless `HEAD` of a fresh
/// repository at `staging`.
fn commit_dist(
    dist: &Utf8Path,
    staging: &Utf8Path,
    deploy: &DeployConfig,
) -> anyhow::Result<gix::ObjectId> {
    let repo = create_repo(staging, deploy)?;
    let tree = write_tree(&repo, dist)?;
    let tree_id = repo.write_object(&tree)?;

    let commit = repo
        .commit("HEAD", &deploy.message, tree_id, NO_PARENT_IDS)
        .context("Couldn't commit the dist tree, is a git identity configured?")?;

    Ok(commit.detach())
}

/// Publishes the dist directory as the single commit of the deploy branch.
pub struct DeployTask {
    paths: Arc<PathTable>,
}

impl DeployTask {
    pub fn new(paths: Arc<PathTable>) -> Self {
        Self { paths }
    }

    /// A remote name is looked up in the project's repository, anything that
    /// looks like a URL or a path is used as is.
    fn remote_url(&self, root: &Utf8Path) -> anyhow::Result<String> {
        let remote = &self.paths.deploy.remote;
        if remote.contains([':', '/']) {
            return Ok(remote.clone());
        }

        let repo = gix::discover(root)?;
        let url = repo
            .find_remote(remote.as_str())?
            .url(gix::remote::Direction::Push)
            .map(|url| url.to_bstring().to_string())
            .ok_or_else(|| anyhow!("Remote '{remote}' has no URL"))?;

        Ok(url)
    }
}

impl Task for DeployTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        let env = ctx.env;
        let deploy = &self.paths.deploy;
        let dist = env.path(&self.paths.dist);

        let count = io::find(&dist, &["**/*".into()])?
            .iter()
            .filter(|file| file.path.is_file())
            .count();
        if count == 0 {
            return Err(DeployError::Empty(dist).into());
        }

        let url = self.remote_url(&env.root)?;

        let staging = env.root.join(STAGING);
        let commit = commit_dist(&dist, &staging, deploy)?;
        tracing::debug!("committed {commit}");

        let refspec = format!("HEAD:refs/heads/{}", deploy.branch);
        git(&staging, &["push", "--force", "--quiet", &url, &refspec])?;

        tracing::info!(
            "deployed {count} file(s) to {} ({})",
            deploy.branch,
            deploy.remote
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ChangeCache;
    use crate::core::{Environment, Mode};
    use crate::io::tests::project;

    fn identity() -> DeployConfig {
        DeployConfig {
            name: Some("Site Bot".into()),
            email: Some("bot@example.com".into()),
            ..DeployConfig::default()
        }
    }

    fn names(repo: &gix::Repository, tree: gix::ObjectId) -> Vec<String> {
        let tree = repo.find_tree(tree).unwrap();
        let decoded = tree.decode().unwrap();
        decoded
            .entries
            .iter()
            .map(|entry| entry.filename.to_string())
            .collect()
    }

    #[test]
    fn empty_dist_is_not_deployed() {
        let (_dir, root) = project(&[]);
        let env = Environment::new(&root, Mode::Build);
        let cache = ChangeCache::new();
        let ctx = TaskContext {
            env: &env,
            cache: &cache,
        };

        let err = DeployTask::new(Arc::new(PathTable::default()))
            .execute(&ctx)
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::Empty(path)) if path.ends_with("dist")
        ));
    }

    #[test]
    fn dist_becomes_a_single_parentless_commit() {
        let (_dir, root) = project(&[
            ("dist/index.html", "<html></html>"),
            ("dist/css/main.min.css", ".a{}"),
            ("dist/css.txt", "x"),
        ]);
        let staging = root.join(STAGING);

        commit_dist(&root.join("dist"), &staging, &identity()).unwrap();
        fs::write(root.join("dist/index.html"), "<html>v2</html>").unwrap();
        let id = commit_dist(&root.join("dist"), &staging, &identity()).unwrap();

        let repo = gix::open(&staging).unwrap();
        assert_eq!(repo.head_id().unwrap().detach(), id);

        let commit = repo.find_commit(id).unwrap();
        assert_eq!(commit.parent_ids().count(), 0);
        assert_eq!(commit.author().unwrap().name.to_string(), "Site Bot");

        let tree = commit.tree_id().unwrap().detach();
        assert_eq!(names(&repo, tree), vec!["css.txt", "css", "index.html"]);
    }

    #[test]
    fn config_values_are_quoted() {
        assert_eq!(quote(r#"Site "Bot""#), r#""Site \"Bot\"""#);
        assert_eq!(quote(r"C:\site"), r#""C:\\site""#);
    }

    #[test]
    fn directories_sort_as_if_they_had_a_trailing_slash() {
        let oid = gix::ObjectId::null(gix::hash::Kind::Sha1);
        let entry = |kind: tree::EntryKind, name: &str| tree::Entry {
            mode: kind.into(),
            oid,
            filename: name.into(),
        };

        let mut entries = vec![
            entry(tree::EntryKind::Blob, "foo.rs"),
            entry(tree::EntryKind::Tree, "foo"),
            entry(tree::EntryKind::Blob, "foo-bar"),
        ];
        sort_tree_entries(&mut entries);

        let sorted: Vec<_> = entries.iter().map(|e| e.filename.to_string()).collect();
        assert_eq!(sorted, vec!["foo-bar", "foo.rs", "foo"]);
    }

    #[test]
    fn urls_are_used_verbatim() {
        let paths = PathTable {
            deploy: DeployConfig {
                remote: "git@example.com:user/site.git".into(),
                ..Default::default()
            },
            ..PathTable::default()
        };

        let task = DeployTask::new(Arc::new(paths));
        assert_eq!(
            task.remote_url(Utf8Path::new("/nonexistent")).unwrap(),
            "git@example.com:user/site.git"
        );
    }
}
