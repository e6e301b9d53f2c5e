//! Resolution from an existing PEX
//!
//! Resolves requirement names against the distributions already packaged in
//! a loose-layout PEX, following `Requires-Dist` when transitive.

use crate::build::{DistributionInfo, PexInfo};
use crate::error::{PexError, PexResult};
use crate::resolve::distribution::{read_metadata, Distribution};
use crate::resolve::marker::{evaluate, MarkerEnvironment};
use crate::resolve::requirement::{read_requirement_file, Requirement};
use crate::resolve::{InstalledDistribution, ResolveRequest, ResolveResult, ResolveTarget, Resolver};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Resolver that reads distributions out of a PEX repository
#[derive(Debug, Clone)]
pub struct PexRepositoryResolver {
    pex: PathBuf,
    transitive: bool,
}

/// A requirement waiting to be resolved
struct Pending {
    requirement: Requirement,
    /// Whether the user asked for it
    direct: bool,
    /// Extras requested of the distribution that declared it
    extras: Vec<String>,
}

/// Constraint file entries by canonical project name
type Constraints = HashMap<String, Vec<Requirement>>;

impl PexRepositoryResolver {
    pub fn new(pex: PathBuf, transitive: bool) -> Self {
        Self { pex, transitive }
    }

    fn resolve_target(
        &self,
        info: &PexInfo,
        requested: &[Requirement],
        constraints: &Constraints,
        target: &ResolveTarget,
        ignore_errors: bool,
    ) -> PexResult<Vec<InstalledDistribution>> {
        let tag = target.target_tag();
        let environment = MarkerEnvironment::for_target(target);
        let available: HashMap<&str, (&String, &DistributionInfo)> = info
            .distributions
            .iter()
            .filter(|(_, d)| d.targets.is_empty() || d.targets.contains(&tag))
            .map(|(key, d)| (d.project_name.as_str(), (key, d)))
            .collect();

        let mut queue: VecDeque<Pending> = requested
            .iter()
            .cloned()
            .map(|requirement| Pending {
                requirement,
                direct: true,
                extras: Vec::new(),
            })
            .collect();
        // Extras already expanded per project
        let mut expanded: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut installed: Vec<InstalledDistribution> = Vec::new();

        while let Some(Pending {
            requirement,
            direct,
            extras,
        }) = queue.pop_front()
        {
            // None when the marker cannot be decided for this target
            let applies = match requirement.marker() {
                None => Some(true),
                Some(marker) => match evaluate(marker, &environment, &extras) {
                    Ok(applies) => Some(applies),
                    Err(reason) => {
                        debug!("Cannot evaluate the marker of {} for {}: {}", requirement.as_str(), target, reason);
                        None
                    }
                },
            };
            if applies == Some(false) {
                debug!("Skipping {}: its marker excludes {}", requirement.as_str(), target);
                continue;
            }

            let name = requirement.name().to_string();
            let Some((key, dist)) = available.get(name.as_str()) else {
                if applies.is_none() {
                    debug!("Skipping {}: not present and its marker is undecided", requirement.as_str());
                    continue;
                }
                let err = self.unsatisfiable(target, &requirement);
                if ignore_errors {
                    warn!("Ignoring resolve error: {}", err);
                    continue;
                }
                return Err(err);
            };

            let project_constraints = constraints.get(&name).map(Vec::as_slice).unwrap_or(&[]);
            self.check_version(&requirement, project_constraints, dist, &environment, ignore_errors)?;

            let first_visit = !expanded.contains_key(&name);
            let done = expanded.entry(name.clone()).or_default();
            let mut new_extras = false;
            for extra in requirement.extras() {
                new_extras |= done.insert(extra.clone());
            }
            let all_extras: Vec<String> = done.iter().cloned().collect();

            let location = self.pex.join(".deps").join(key.as_str());
            if first_visit {
                installed.push(InstalledDistribution {
                    distribution: Distribution {
                        project_name: dist.project_name.clone(),
                        version: dist.version.clone(),
                        files: list_files(&location)?,
                        location: location.clone(),
                        fingerprint: dist.fingerprint.clone(),
                        target_tag: tag.clone(),
                    },
                    direct_requirement: direct.then(|| requirement.as_str().to_string()),
                });
            } else if direct {
                if let Some(existing) = installed
                    .iter_mut()
                    .find(|i| i.distribution.project_name == name)
                {
                    existing.direct_requirement = Some(requirement.as_str().to_string());
                }
            }

            if self.transitive && (first_visit || new_extras) {
                for dependency in read_metadata(&location)?.requires_dist {
                    queue.push_back(Pending {
                        requirement: dependency,
                        direct: false,
                        extras: all_extras.clone(),
                    });
                }
            }
        }

        Ok(installed)
    }

    /// Check `dist` against the requirement and any applicable constraints.
    fn check_version(
        &self,
        requirement: &Requirement,
        constraints: &[Requirement],
        dist: &DistributionInfo,
        environment: &MarkerEnvironment,
        ignore_errors: bool,
    ) -> PexResult<()> {
        for clause in std::iter::once(requirement).chain(constraints) {
            let excluded = clause
                .marker()
                .is_some_and(|m| evaluate(m, environment, &[]) == Ok(false));
            if excluded {
                continue;
            }
            if clause
                .contains_version(&dist.version)
                .map_err(PexError::Unsatisfiable)?
            {
                continue;
            }
            let err = PexError::Unsatisfiable(format!(
                "Failed to resolve requirements from PEX environment @ {}.\n\
                 {} is not satisfied by {} {} in the PEX.",
                self.pex.display(),
                clause.as_str(),
                dist.project_name,
                dist.version
            ));
            if !ignore_errors {
                return Err(err);
            }
            warn!("Ignoring resolve error: {}", err);
        }
        Ok(())
    }

    fn unsatisfiable(&self, target: &ResolveTarget, requirement: &Requirement) -> PexError {
        PexError::Unsatisfiable(format!(
            "Failed to resolve requirements from PEX environment @ {}.\n\
             Needed {} compatible dependencies for:\n 1: {}\n    But this pex had no {:?} distributions.",
            self.pex.display(),
            target,
            requirement.as_str(),
            requirement.name()
        ))
    }
}

fn list_files(root: &Path) -> PexResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| PexError::InvalidDistribution {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file() {
            if let Ok(relative) = entry.path().strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }
    Ok(files)
}

#[async_trait]
impl Resolver for PexRepositoryResolver {
    async fn resolve(&self, request: &ResolveRequest) -> PexResult<ResolveResult> {
        if request.is_empty() {
            return Ok(ResolveResult::default());
        }
        info!("Resolving requirements from PEX {}", self.pex.display());

        let info = PexInfo::load(&self.pex)?;

        let mut requested = request
            .requirements
            .iter()
            .map(|raw| Requirement::parse(raw).map_err(PexError::Unsatisfiable))
            .collect::<PexResult<Vec<_>>>()?;
        for file in &request.requirement_files {
            requested.extend(read_requirement_file(file)?);
        }

        let mut constraints = Constraints::new();
        for file in &request.constraint_files {
            for constraint in read_requirement_file(file)? {
                constraints
                    .entry(constraint.name().to_string())
                    .or_default()
                    .push(constraint);
            }
        }

        let mut installed_distributions = Vec::new();
        for target in &request.targets {
            installed_distributions.extend(self.resolve_target(
                &info,
                &requested,
                &constraints,
                target,
                request.ignore_errors,
            )?);
        }
        Ok(ResolveResult {
            installed_distributions,
        })
    }

    fn name(&self) -> &'static str {
        "pex-repository"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::selector::tests::cpython;
    use std::fs;
    use tempfile::TempDir;

    fn add_dist(pex: &Path, info: &mut PexInfo, name: &str, version: &str, requires: &[&str]) {
        let key = format!("{}-{}-fp{}", name, version, name);
        let dist_info = pex.join(".deps").join(&key).join(format!("{}-{}.dist-info", name, version));
        fs::create_dir_all(&dist_info).unwrap();
        let mut metadata = format!("Name: {}\nVersion: {}\n", name, version);
        for r in requires {
            metadata.push_str(&format!("Requires-Dist: {}\n", r));
        }
        fs::write(dist_info.join("METADATA"), metadata).unwrap();
        fs::write(pex.join(".deps").join(&key).join(format!("{}.py", name)), "").unwrap();
        info.distributions.insert(
            key,
            DistributionInfo {
                project_name: name.into(),
                version: version.into(),
                fingerprint: format!("fp{}", name),
                targets: vec!["cp311".into()],
            },
        );
    }

    fn repository() -> TempDir {
        let dir = TempDir::new().unwrap();
        let mut info = PexInfo::default();
        add_dist(dir.path(), &mut info, "requests", "2.31.0", &["idna<4", "pysocks; extra == \"socks\""]);
        add_dist(dir.path(), &mut info, "idna", "3.6", &[]);
        add_dist(dir.path(), &mut info, "pysocks", "1.7.1", &[]);
        add_dist(dir.path(), &mut info, "colorama", "0.4.6", &[]);
        add_dist(dir.path(), &mut info, "click", "8.1.7", &["colorama; sys_platform == \"win32\""]);
        add_dist(
            dir.path(),
            &mut info,
            "httpx",
            "0.27.0",
            &["idna", "pysocks; extra == \"socks\" and python_version < \"3.8\""],
        );
        info.write(dir.path()).unwrap();
        dir
    }

    fn request(requirements: &[&str]) -> ResolveRequest {
        ResolveRequest {
            requirements: requirements.iter().map(|r| r.to_string()).collect(),
            requirement_files: vec![],
            constraint_files: vec![],
            targets: vec![ResolveTarget::Interpreter(cpython(
                "/usr/bin/python3.11",
                "3.11.4",
                &["linux_x86_64-cp-311-cp311"],
            ))],
            runner: None,
            work_dir: PathBuf::from("/unused"),
            cache_dir: None,
            compile: false,
            ignore_errors: false,
        }
    }

    fn names(result: &ResolveResult) -> Vec<(String, bool)> {
        result
            .installed_distributions
            .iter()
            .map(|i| (i.distribution.project_name.clone(), i.direct_requirement.is_some()))
            .collect()
    }

    #[tokio::test]
    async fn transitive_resolution() {
        let repo = repository();
        let resolver = PexRepositoryResolver::new(repo.path().to_path_buf(), true);
        let result = resolver.resolve(&request(&["requests"])).await.unwrap();
        assert_eq!(
            names(&result),
            vec![("requests".to_string(), true), ("idna".to_string(), false)]
        );
        let requests = &result.installed_distributions[0].distribution;
        assert!(requests.files.iter().any(|f| f.ends_with("requests.py")));
        assert_eq!(requests.target_tag, "cp311");
    }

    #[tokio::test]
    async fn extras_pull_guarded_dependencies() {
        let repo = repository();
        let resolver = PexRepositoryResolver::new(repo.path().to_path_buf(), true);
        let result = resolver.resolve(&request(&["requests[socks]"])).await.unwrap();
        assert_eq!(result.installed_distributions.len(), 3);
    }

    #[tokio::test]
    async fn intransitive_resolution() {
        let repo = repository();
        let resolver = PexRepositoryResolver::new(repo.path().to_path_buf(), false);
        let result = resolver.resolve(&request(&["requests"])).await.unwrap();
        assert_eq!(names(&result), vec![("requests".to_string(), true)]);
    }

    #[tokio::test]
    async fn missing_project_is_unsatisfiable() {
        let repo = repository();
        let resolver = PexRepositoryResolver::new(repo.path().to_path_buf(), true);
        let err = resolver.resolve(&request(&["flask"])).await.unwrap_err();
        assert!(matches!(err, PexError::Unsatisfiable(_)));
        assert!(err.to_string().contains("flask"));
    }

    #[tokio::test]
    async fn pin_mismatch_is_unsatisfiable() {
        let repo = repository();
        let resolver = PexRepositoryResolver::new(repo.path().to_path_buf(), true);
        let err = resolver.resolve(&request(&["idna==2.0"])).await.unwrap_err();
        assert!(err.to_string().contains("3.6"));
    }

    #[tokio::test]
    async fn range_specifiers_are_checked() {
        let repo = repository();
        let resolver = PexRepositoryResolver::new(repo.path().to_path_buf(), true);

        let err = resolver.resolve(&request(&["requests>=3"])).await.unwrap_err();
        assert!(matches!(err, PexError::Unsatisfiable(_)));
        assert!(err.to_string().contains("requests>=3"));

        for satisfied in ["requests>=2,<3", "requests!=2.30.0", "requests~=2.31", "requests==2.*"] {
            let result = resolver.resolve(&request(&[satisfied])).await.unwrap();
            assert_eq!(result.installed_distributions.len(), 2, "{}", satisfied);
        }
        for unsatisfied in ["requests<2.31", "requests!=2.31.0", "requests~=2.32", "idna>3.6"] {
            assert!(
                resolver.resolve(&request(&[unsatisfied])).await.is_err(),
                "expected {} to fail",
                unsatisfied
            );
        }
    }

    #[tokio::test]
    async fn transitive_specifiers_are_checked() {
        let dir = TempDir::new().unwrap();
        let mut info = PexInfo::default();
        add_dist(dir.path(), &mut info, "requests", "2.31.0", &["idna<3"]);
        add_dist(dir.path(), &mut info, "idna", "3.6", &[]);
        info.write(dir.path()).unwrap();

        let resolver = PexRepositoryResolver::new(dir.path().to_path_buf(), true);
        let err = resolver.resolve(&request(&["requests"])).await.unwrap_err();
        assert!(err.to_string().contains("idna<3"));
    }

    #[tokio::test]
    async fn constraint_files_restrict_versions() {
        let repo = repository();
        let resolver = PexRepositoryResolver::new(repo.path().to_path_buf(), true);
        let files = TempDir::new().unwrap();

        let loose = files.path().join("loose.txt");
        fs::write(&loose, "idna>=3,<4\nflask==2.0\n").unwrap();
        let mut req = request(&["requests"]);
        req.constraint_files = vec![loose];
        assert_eq!(resolver.resolve(&req).await.unwrap().installed_distributions.len(), 2);

        let strict = files.path().join("strict.txt");
        fs::write(&strict, "idna<3.5\n").unwrap();
        req.constraint_files = vec![strict];
        let err = resolver.resolve(&req).await.unwrap_err();
        assert!(err.to_string().contains("idna<3.5"));
    }

    #[tokio::test]
    async fn markers_exclude_other_platforms() {
        let repo = repository();
        let resolver = PexRepositoryResolver::new(repo.path().to_path_buf(), true);

        let result = resolver.resolve(&request(&["click"])).await.unwrap();
        assert_eq!(names(&result), vec![("click".to_string(), true)]);

        let mut windows = request(&["click"]);
        windows.targets = vec![ResolveTarget::Platform("win_amd64-cp-311-cp311".parse().unwrap())];
        let result = resolver.resolve(&windows).await.unwrap();
        assert_eq!(
            names(&result),
            vec![("click".to_string(), true), ("colorama".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn compound_extra_markers() {
        let repo = repository();
        let resolver = PexRepositoryResolver::new(repo.path().to_path_buf(), true);
        let result = resolver.resolve(&request(&["httpx[socks]"])).await.unwrap();
        assert_eq!(
            names(&result),
            vec![("httpx".to_string(), true), ("idna".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn later_extras_are_expanded() {
        let repo = repository();
        let resolver = PexRepositoryResolver::new(repo.path().to_path_buf(), true);
        let result = resolver
            .resolve(&request(&["requests", "requests[socks]"]))
            .await
            .unwrap();
        let mut projects: Vec<_> = names(&result).into_iter().map(|(name, _)| name).collect();
        projects.sort();
        assert_eq!(projects, vec!["idna", "pysocks", "requests"]);
    }

    #[tokio::test]
    async fn ignore_errors_keeps_going() {
        let repo = repository();
        let resolver = PexRepositoryResolver::new(repo.path().to_path_buf(), true);
        let mut req = request(&["flask", "requests>=3"]);
        req.ignore_errors = true;
        let result = resolver.resolve(&req).await.unwrap();
        assert_eq!(
            names(&result),
            vec![("requests".to_string(), true), ("idna".to_string(), false)]
        );
    }
}
