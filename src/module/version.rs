use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use semver::Version;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::ModuleVersion;

pub fn parse_version(raw: &str) -> Result<Version> {
    Version::parse(raw).map_err(|e| Error::InvalidVersion(format!("{raw}: {e}")))
}

/// True iff the version carries a non-empty pre-release segment.
#[must_use]
pub fn is_prerelease(version: &Version) -> bool {
    !version.pre.is_empty()
}

/// Semver precedence: build metadata is ignored and a release outranks
/// any of its pre-releases.
#[must_use]
pub fn compare_precedence(a: &Version, b: &Version) -> Ordering {
    a.major
        .cmp(&b.major)
        .then(a.minor.cmp(&b.minor))
        .then(a.patch.cmp(&b.patch))
        .then_with(|| match (a.pre.is_empty(), b.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => a.pre.cmp(&b.pre),
        })
}

/// Total order used for listings and latest selection, highest first.
fn compare_descending(a: &ModuleVersion, b: &ModuleVersion) -> Ordering {
    let precedence = match (Version::parse(&a.version), Version::parse(&b.version)) {
        (Ok(va), Ok(vb)) => compare_precedence(&vb, &va),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => b.version.cmp(&a.version),
    };
    precedence
        .then_with(|| b.published_at.cmp(&a.published_at))
        .then_with(|| b.id.cmp(&a.id))
}

pub fn sort_descending(versions: &mut [ModuleVersion]) {
    versions.sort_by(compare_descending);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatestFilter {
    pub include_beta: bool,
    pub include_unpublished: bool,
}

impl LatestFilter {
    /// What the public registry protocol may see.
    pub const PUBLIC: LatestFilter = LatestFilter {
        include_beta: false,
        include_unpublished: false,
    };

    #[must_use]
    pub fn admits(self, version: &ModuleVersion) -> bool {
        (self.include_beta || !version.beta) && (self.include_unpublished || version.published)
    }
}

#[must_use]
pub fn select_latest(versions: &[ModuleVersion], filter: LatestFilter) -> Option<&ModuleVersion> {
    versions
        .iter()
        .filter(|v| filter.admits(v))
        .min_by(|a, b| compare_descending(a, b))
}

/// Public latest version per module-provider, holding only ids.
///
/// Writers invalidate synchronously after their commit; readers reload on miss.
/// Each invalidation bumps a per-key generation, and a reload only fills the
/// entry if no invalidation happened while it was reading the store.
#[derive(Debug, Default)]
pub struct LatestCache {
    inner: RwLock<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<i64, i64>,
    generations: HashMap<i64, u64>,
}

impl CacheState {
    fn generation(&self, module_provider_id: i64) -> u64 {
        self.generations.get(&module_provider_id).copied().unwrap_or(0)
    }
}

impl LatestCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self, module_provider_id: i64) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        state.entries.remove(&module_provider_id);
        *state.generations.entry(module_provider_id).or_insert(0) += 1;
    }

    /// Cached id and the generation it was read at.
    fn lookup(&self, module_provider_id: i64) -> (Option<i64>, u64) {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        (
            state.entries.get(&module_provider_id).copied(),
            state.generation(module_provider_id),
        )
    }

    /// Stores a reloaded result unless the key was invalidated since `generation`.
    fn fill(&self, module_provider_id: i64, generation: u64, latest: Option<i64>) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if state.generation(module_provider_id) != generation {
            return;
        }
        match latest {
            Some(version_id) => state.entries.insert(module_provider_id, version_id),
            None => state.entries.remove(&module_provider_id),
        };
    }

    pub fn latest_public(
        &self,
        store: &dyn Store,
        module_provider_id: i64,
    ) -> Result<Option<ModuleVersion>> {
        let (cached, generation) = self.lookup(module_provider_id);
        if let Some(version_id) = cached {
            match store.get_module_version_by_id(version_id)? {
                Some(version) if version.is_public() => return Ok(Some(version)),
                _ => {}
            }
        }

        let versions = store.list_module_versions(module_provider_id)?;
        let latest = select_latest(&versions, LatestFilter::PUBLIC).cloned();
        self.fill(module_provider_id, generation, latest.as_ref().map(|v| v.id));
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn version(id: i64, v: &str, published: bool) -> ModuleVersion {
        ModuleVersion {
            id,
            module_provider_id: 1,
            version: v.to_string(),
            beta: v.contains('-'),
            published,
            internal: false,
            git_sha: None,
            git_tag: None,
            git_path: None,
            published_at: published.then(Utc::now),
            extraction_version: 1,
            details_id: id,
            description: None,
            owner: None,
            archive_ext: None,
            archive_sha256: None,
            archive_size: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_latest_excludes_beta_unless_requested() {
        let versions = vec![
            version(1, "1.0.0", true),
            version(2, "1.1.0", true),
            version(3, "2.0.0-beta.1", true),
        ];

        let latest = select_latest(&versions, LatestFilter::PUBLIC).unwrap();
        assert_eq!(latest.version, "1.1.0");

        let latest = select_latest(
            &versions,
            LatestFilter {
                include_beta: true,
                include_unpublished: false,
            },
        )
        .unwrap();
        assert_eq!(latest.version, "2.0.0-beta.1");
    }

    #[test]
    fn test_latest_excludes_unpublished() {
        let versions = vec![version(1, "1.0.0", true), version(2, "3.0.0", false)];
        assert_eq!(
            select_latest(&versions, LatestFilter::PUBLIC).unwrap().version,
            "1.0.0"
        );
        let all = LatestFilter {
            include_beta: true,
            include_unpublished: true,
        };
        assert_eq!(select_latest(&versions, all).unwrap().version, "3.0.0");
    }

    #[test]
    fn test_tie_broken_by_published_at_then_id() {
        let mut a = version(1, "1.0.0+build.1", true);
        let mut b = version(2, "1.0.0+build.2", true);
        let now = Utc::now();
        a.published_at = Some(now);
        b.published_at = Some(now - Duration::hours(1));
        assert_eq!(select_latest(&[a.clone(), b.clone()], LatestFilter::PUBLIC).unwrap().id, 1);

        b.published_at = a.published_at;
        assert_eq!(select_latest(&[a, b], LatestFilter::PUBLIC).unwrap().id, 2);
    }

    #[test]
    fn test_precedence_ignores_build_metadata() {
        let a = Version::parse("1.0.0+abc").unwrap();
        let b = Version::parse("1.0.0+xyz").unwrap();
        assert_eq!(compare_precedence(&a, &b), Ordering::Equal);

        let rc = Version::parse("1.0.0-rc.1").unwrap();
        let release = Version::parse("1.0.0").unwrap();
        assert_eq!(compare_precedence(&rc, &release), Ordering::Less);

        let alpha = Version::parse("1.0.0-alpha").unwrap();
        let alpha1 = Version::parse("1.0.0-alpha.1").unwrap();
        assert_eq!(compare_precedence(&alpha, &alpha1), Ordering::Less);
    }

    #[test]
    fn test_sort_descending() {
        let mut versions = vec![
            version(1, "1.2.0", true),
            version(2, "1.10.0", true),
            version(3, "1.9.9", true),
        ];
        sort_descending(&mut versions);
        let order: Vec<&str> = versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(order, vec!["1.10.0", "1.9.9", "1.2.0"]);
    }

    #[test]
    fn test_reload_racing_an_invalidation_is_not_cached() {
        let cache = LatestCache::new();
        let (_, generation) = cache.lookup(1);
        // A publish commits and invalidates while the reader is loading.
        cache.invalidate(1);
        cache.fill(1, generation, Some(10));
        assert_eq!(cache.lookup(1).0, None);

        let (_, generation) = cache.lookup(1);
        cache.fill(1, generation, Some(11));
        assert_eq!(cache.lookup(1).0, Some(11));

        cache.invalidate(2);
        assert_eq!(cache.lookup(1).0, Some(11));
        cache.invalidate(1);
        assert_eq!(cache.lookup(1).0, None);
    }

    #[test]
    fn test_parse_version_rejects_garbage() {
        assert!(matches!(parse_version("v1.0"), Err(Error::InvalidVersion(_))));
        assert!(is_prerelease(&parse_version("1.0.0-beta").unwrap()));
        assert!(!is_prerelease(&parse_version("1.0.0+meta").unwrap()));
    }
}
