use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use git2::build::CheckoutBuilder;
use git2::{FetchOptions, RemoteCallbacks, Repository};

use crate::error::{Error, Result};
use crate::types::{GitProvider, ModuleProvider};

const MAX_CLONE_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Placeholders available to clone and browse URL templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateVars<'a> {
    pub namespace: &'a str,
    pub module: &'a str,
    pub provider: &'a str,
    pub tag: Option<&'a str>,
    pub path: Option<&'a str>,
}

impl<'a> TemplateVars<'a> {
    #[must_use]
    pub fn for_module(module_provider: &'a ModuleProvider) -> Self {
        Self {
            namespace: &module_provider.namespace,
            module: &module_provider.module,
            provider: &module_provider.provider,
            tag: None,
            path: None,
        }
    }
}

#[must_use]
pub fn expand_template(template: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = template
        .replace("{namespace}", vars.namespace)
        .replace("{module}", vars.module)
        .replace("{provider}", vars.provider);
    if let Some(tag) = vars.tag {
        out = out.replace("{tag}", tag);
    }
    if let Some(path) = vars.path {
        out = out.replace("{path}", path);
    }
    out
}

/// The module's own clone template wins over its Git provider's.
#[must_use]
pub fn clone_url(module_provider: &ModuleProvider, git_provider: Option<&GitProvider>) -> Option<String> {
    let template = module_provider
        .git
        .clone_url_template
        .as_deref()
        .or_else(|| git_provider.map(|p| p.clone_url_template.as_str()))?;
    Some(expand_template(template, &TemplateVars::for_module(module_provider)))
}

#[must_use]
pub fn browse_url(
    module_provider: &ModuleProvider,
    git_provider: Option<&GitProvider>,
    tag: &str,
    path: &str,
) -> Option<String> {
    let template = module_provider
        .git
        .browse_url_template
        .as_deref()
        .or_else(|| git_provider.map(|p| p.browse_url_template.as_str()))?;
    let vars = TemplateVars {
        tag: Some(tag),
        path: Some(path),
        ..TemplateVars::for_module(module_provider)
    };
    Some(expand_template(template, &vars))
}

fn upstream(context: &str, e: &git2::Error) -> Error {
    Error::Upstream(format!("{context}: {}", e.message()))
}

fn is_local_url(url: &str) -> bool {
    url.starts_with("file://") || url.starts_with('/') || Path::new(url).exists()
}

/// Fetches `tag` from `url` into a fresh repository at `dest` and checks it out.
///
/// Returns the commit SHA the tag points at.
pub fn fetch_tag(url: &str, tag: &str, dest: &Path, deadline: Instant) -> Result<String> {
    let repo = Repository::init(dest).map_err(|e| upstream("Failed to initialise clone", &e))?;
    let mut remote = repo
        .remote_anonymous(url)
        .map_err(|e| upstream("Invalid clone URL", &e))?;

    let mut callbacks = RemoteCallbacks::new();
    callbacks.transfer_progress(move |_| Instant::now() < deadline);

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    if !is_local_url(url) {
        options.depth(1);
    }

    let refspec = format!("+refs/tags/{tag}:refs/tags/{tag}");
    remote
        .fetch(&[refspec.as_str()], Some(&mut options), None)
        .map_err(|e| {
            if Instant::now() >= deadline {
                Error::Upstream(format!("Clone of {url} timed out"))
            } else {
                upstream(&format!("Failed to fetch tag {tag}"), &e)
            }
        })?;

    let reference = repo
        .find_reference(&format!("refs/tags/{tag}"))
        .map_err(|_| Error::not_found(format!("Tag {tag} not found in repository")))?;
    let commit = reference
        .peel_to_commit()
        .map_err(|e| upstream("Tag does not point at a commit", &e))?;

    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))
        .map_err(|e| upstream("Failed to check out tag", &e))?;
    repo.set_head_detached(commit.id())
        .map_err(|e| upstream("Failed to detach HEAD", &e))?;

    Ok(commit.id().to_string())
}

/// Runs [`fetch_tag`] on the blocking pool, retrying upstream failures with backoff.
pub async fn clone_tag(url: &str, tag: &str, dest: &Path, timeout: Duration) -> Result<String> {
    let mut attempt = 1;
    let mut delay = INITIAL_BACKOFF;

    loop {
        let url_owned = url.to_string();
        let tag_owned = tag.to_string();
        let dest_owned: PathBuf = dest.to_path_buf();

        let result = tokio::task::spawn_blocking(move || {
            if dest_owned.exists() {
                std::fs::remove_dir_all(&dest_owned)?;
            }
            std::fs::create_dir_all(&dest_owned)?;
            fetch_tag(&url_owned, &tag_owned, &dest_owned, Instant::now() + timeout)
        })
        .await
        .map_err(|e| Error::internal(format!("Clone task failed: {e}")))?;

        match result {
            Err(e) if e.is_retryable() && attempt < MAX_CLONE_ATTEMPTS => {
                tracing::warn!(
                    "Clone of {} at {} failed (attempt {}/{}): {}",
                    url,
                    tag,
                    attempt,
                    MAX_CLONE_ATTEMPTS,
                    e
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    use crate::types::GitConfig;

    fn module_provider(git: GitConfig) -> ModuleProvider {
        ModuleProvider {
            id: 1,
            namespace_id: 1,
            namespace: "acme".to_string(),
            module: "widget".to_string(),
            provider: "aws".to_string(),
            verified: false,
            git,
            created_at: Utc::now(),
        }
    }

    fn tagged_repo(dir: &Path, tag: &str) -> String {
        let repo = Repository::init(dir).unwrap();
        std::fs::write(dir.join("main.tf"), "variable \"x\" {}\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("main.tf")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("Test User", "test@example.com").unwrap();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();
        let commit = repo.find_commit(oid).unwrap();
        repo.tag_lightweight(tag, commit.as_object(), false).unwrap();
        oid.to_string()
    }

    #[test]
    fn test_expand_template() {
        let mp = module_provider(GitConfig::default());
        let vars = TemplateVars {
            tag: Some("v1.0.0"),
            path: Some("modules/x"),
            ..TemplateVars::for_module(&mp)
        };
        assert_eq!(
            expand_template("https://git.example.com/{namespace}/{module}-{provider}/tree/{tag}/{path}", &vars),
            "https://git.example.com/acme/widget-aws/tree/v1.0.0/modules/x"
        );
    }

    #[test]
    fn test_module_template_wins_over_git_provider() {
        let git_provider = GitProvider {
            id: 1,
            name: "internal".to_string(),
            base_url_template: "https://git.example.com/{namespace}".to_string(),
            clone_url_template: "ssh://git.example.com/{namespace}/{module}.git".to_string(),
            browse_url_template: "https://git.example.com/{namespace}/{module}/{tag}/{path}".to_string(),
        };

        let inherits = module_provider(GitConfig::default());
        assert_eq!(
            clone_url(&inherits, Some(&git_provider)).as_deref(),
            Some("ssh://git.example.com/acme/widget.git")
        );

        let own = module_provider(GitConfig {
            clone_url_template: Some("https://mirror/{module}.git".to_string()),
            ..GitConfig::default()
        });
        assert_eq!(
            clone_url(&own, Some(&git_provider)).as_deref(),
            Some("https://mirror/widget.git")
        );
        assert!(clone_url(&inherits, None).is_none());
    }

    #[test]
    fn test_fetch_tag_from_local_repo() {
        let temp = TempDir::new().unwrap();
        let origin = temp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        let sha = tagged_repo(&origin, "v1.0.0");

        let dest = temp.path().join("clone");
        std::fs::create_dir_all(&dest).unwrap();
        let url = format!("file://{}", origin.display());
        let fetched = fetch_tag(&url, "v1.0.0", &dest, Instant::now() + Duration::from_secs(30)).unwrap();

        assert_eq!(fetched, sha);
        assert!(dest.join("main.tf").is_file());
    }

    #[test]
    fn test_fetch_missing_tag_fails() {
        let temp = TempDir::new().unwrap();
        let origin = temp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        tagged_repo(&origin, "v1.0.0");

        let dest = temp.path().join("clone");
        std::fs::create_dir_all(&dest).unwrap();
        let url = format!("file://{}", origin.display());
        assert!(fetch_tag(&url, "v9.9.9", &dest, Instant::now() + Duration::from_secs(30)).is_err());
    }
}
