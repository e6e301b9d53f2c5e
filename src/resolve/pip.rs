//! Index and find-links resolution through pip
//!
//! Runs `pip install --target <dir> --report <json>` once per resolve
//! target, at most `max_jobs` at a time, and reads the installed
//! distributions back from the report and each `RECORD`. Transitive
//! resolves are then checked for consistency against each distribution's
//! `Requires-Dist`, unless errors are ignored.

use crate::error::{PexError, PexResult};
use crate::resolve::config::{Repository, ResolveConfiguration, ResolverVersion};
use crate::resolve::distribution::{load_installed, read_installed_metadata};
use crate::resolve::marker::{evaluate, MarkerEnvironment};
use crate::resolve::requirement::{read_requirement_file, Requirement};
use crate::resolve::{
    direct_requirement_for, InstalledDistribution, ResolveRequest, ResolveResult, ResolveTarget,
    Resolver,
};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// The subset of pip's installation report we read
#[derive(Debug, Deserialize)]
struct InstallReport {
    #[serde(default)]
    install: Vec<ReportItem>,
}

#[derive(Debug, Deserialize)]
struct ReportItem {
    metadata: ReportMetadata,
    #[serde(default)]
    requested: bool,
}

#[derive(Debug, Deserialize)]
struct ReportMetadata {
    name: String,
    version: String,
}

/// Resolver backed by `pip install`
#[derive(Debug, Clone)]
pub struct PipResolver {
    config: ResolveConfiguration,
}

impl PipResolver {
    pub fn new(config: ResolveConfiguration) -> Self {
        Self { config }
    }

    /// Full `pip` argument list for one target
    fn install_args(
        &self,
        request: &ResolveRequest,
        target: &ResolveTarget,
        site_dir: &Path,
        report: &Path,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-m".into(),
            "pip".into(),
            "install".into(),
            "--disable-pip-version-check".into(),
            "--no-input".into(),
            "--quiet".into(),
            "--target".into(),
            site_dir.display().to_string(),
            "--report".into(),
            report.display().to_string(),
        ];

        if let Repository::Index {
            indexes,
            find_links,
            resolver_version,
        } = &self.config.repository
        {
            match indexes.split_first() {
                Some((first, rest)) => {
                    args.push("--index-url".into());
                    args.push(first.clone());
                    for extra in rest {
                        args.push("--extra-index-url".into());
                        args.push(extra.clone());
                    }
                }
                None => args.push("--no-index".into()),
            }
            for location in find_links {
                args.push("--find-links".into());
                args.push(location.clone());
            }
            if *resolver_version == ResolverVersion::PipLegacy {
                args.push("--use-deprecated=legacy-resolver".into());
            }
        }

        let network = &self.config.network;
        args.push("--retries".into());
        args.push(network.retries.to_string());
        args.push("--timeout".into());
        args.push(network.timeout.to_string());
        if let Some(proxy) = &network.proxy {
            args.push("--proxy".into());
            args.push(proxy.clone());
        }
        if let Some(cert) = &network.cert {
            args.push("--cert".into());
            args.push(cert.display().to_string());
        }
        if let Some(client_cert) = &network.client_cert {
            args.push("--client-cert".into());
            args.push(client_cert.display().to_string());
        }

        match &request.cache_dir {
            Some(cache_dir) => {
                args.push("--cache-dir".into());
                args.push(cache_dir.display().to_string());
            }
            None => args.push("--no-cache-dir".into()),
        }

        if !self.config.transitive {
            args.push("--no-deps".into());
        }
        if self.config.allow_prereleases {
            args.push("--pre".into());
        }
        if !request.compile {
            args.push("--no-compile".into());
        }

        match target {
            ResolveTarget::Interpreter(_) => {
                if !self.config.allow_builds {
                    args.push("--only-binary=:all:".into());
                }
                if !self.config.allow_wheels {
                    args.push("--no-binary=:all:".into());
                }
            }
            ResolveTarget::Platform(platform) => {
                if let (Some(manylinux), Some(arch)) = (
                    &self.config.assume_manylinux,
                    platform.platform.strip_prefix("linux_"),
                ) {
                    args.push("--platform".into());
                    args.push(format!("{}_{}", manylinux, arch));
                }
                args.push("--platform".into());
                args.push(platform.platform.clone());
                args.push("--implementation".into());
                args.push(platform.implementation.clone());
                args.push("--python-version".into());
                args.push(platform.dotted_version());
                args.push("--abi".into());
                args.push(platform.abi.clone());
                args.push("--only-binary=:all:".into());
            }
        }

        for file in &request.constraint_files {
            args.push("--constraint".into());
            args.push(file.display().to_string());
        }
        for file in &request.requirement_files {
            args.push("--requirement".into());
            args.push(file.display().to_string());
        }
        args.extend(request.requirements.iter().cloned());
        args
    }

    async fn resolve_target(
        &self,
        request: &ResolveRequest,
        requested: &[Requirement],
        index: usize,
        target: &ResolveTarget,
    ) -> PexResult<Vec<InstalledDistribution>> {
        let runner = match target {
            ResolveTarget::Interpreter(interpreter) => interpreter,
            ResolveTarget::Platform(platform) => request.runner.as_ref().ok_or_else(|| {
                PexError::InterpreterNotFound(format!("an interpreter to run pip for {}", platform))
            })?,
        };

        let tag = target.target_tag();
        let site_dir = request.work_dir.join(format!("{}-{}", index, tag));
        let report = request.work_dir.join(format!("{}-{}.json", index, tag));
        let args = self.install_args(request, target, &site_dir, &report);

        info!("Resolving distributions for {}", target);
        debug!("Executing: {} {:?}", runner.binary().display(), args);

        let output = Command::new(runner.binary())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PexError::command_failed(format!("{} -m pip", runner.binary().display()), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            return Err(PexError::Unsatisfiable(detail.to_string()));
        }

        let report_bytes = tokio::fs::read(&report)
            .await
            .map_err(|e| PexError::io(format!("reading pip report {}", report.display()), e))?;
        let report: InstallReport = serde_json::from_slice(&report_bytes)?;

        let installed = report
            .install
            .into_iter()
            .map(|item| {
                let distribution =
                    load_installed(&site_dir, &item.metadata.name, &item.metadata.version, &tag)?;
                let direct_requirement = item.requested.then(|| {
                    direct_requirement_for(requested, &item.metadata.name)
                        .unwrap_or_else(|| distribution.project_name.clone())
                });
                Ok(InstalledDistribution {
                    distribution,
                    direct_requirement,
                })
            })
            .collect::<PexResult<Vec<_>>>()?;

        self.verify(request, &installed, target)?;
        Ok(installed)
    }

    /// Check the resolved set for consistency unless the request tolerates
    /// errors. Intransitive resolves are incomplete by construction.
    fn verify(
        &self,
        request: &ResolveRequest,
        installed: &[InstalledDistribution],
        target: &ResolveTarget,
    ) -> PexResult<()> {
        if !self.config.transitive {
            return Ok(());
        }
        match check_consistency(installed, target) {
            Err(PexError::Unsatisfiable(reason)) if request.ignore_errors => {
                warn!("Ignoring resolve error: {}", reason);
                Ok(())
            }
            result => result,
        }
    }
}

/// Every applicable `Requires-Dist` of every resolved distribution must be
/// satisfied by another resolved distribution.
fn check_consistency(installed: &[InstalledDistribution], target: &ResolveTarget) -> PexResult<()> {
    let environment = MarkerEnvironment::for_target(target);
    let versions: HashMap<&str, &str> = installed
        .iter()
        .map(|i| (i.distribution.project_name.as_str(), i.distribution.version.as_str()))
        .collect();

    let mut problems = Vec::new();
    for item in installed {
        let dist = &item.distribution;
        let metadata = read_installed_metadata(&dist.location, &dist.project_name, &dist.version)?;
        for requirement in &metadata.requires_dist {
            if let Some(marker) = requirement.marker() {
                // Extras are not tracked here, so only unconditional and
                // environment-selected dependencies are checked.
                if evaluate(marker, &environment, &[]) != Ok(true) {
                    continue;
                }
            }
            match versions.get(requirement.name()) {
                None => problems.push(format!(
                    "{} {} requires {} but no version was resolved",
                    dist.project_name,
                    dist.version,
                    requirement.as_str()
                )),
                Some(version) => match requirement.contains_version(version) {
                    Ok(true) => {}
                    Ok(false) => problems.push(format!(
                        "{} {} requires {} but {} was resolved",
                        dist.project_name,
                        dist.version,
                        requirement.as_str(),
                        version
                    )),
                    Err(reason) => debug!("Not checking {}: {}", requirement.as_str(), reason),
                },
            }
        }
    }

    if problems.is_empty() {
        return Ok(());
    }
    let listing: Vec<String> = problems
        .iter()
        .enumerate()
        .map(|(i, problem)| format!("{}. {}", i + 1, problem))
        .collect();
    Err(PexError::Unsatisfiable(format!(
        "Failed to resolve compatible distributions for {}:\n{}",
        target,
        listing.join("\n")
    )))
}

/// Requirements the user asked for, from arguments and requirement files
fn requested_requirements(request: &ResolveRequest) -> PexResult<Vec<Requirement>> {
    let mut requested: Vec<Requirement> = request
        .requirements
        .iter()
        .filter_map(|raw| Requirement::parse(raw).ok())
        .collect();
    for file in &request.requirement_files {
        requested.extend(read_requirement_file(file)?);
    }
    Ok(requested)
}

#[async_trait]
impl Resolver for PipResolver {
    async fn resolve(&self, request: &ResolveRequest) -> PexResult<ResolveResult> {
        if request.is_empty() {
            debug!("No requirements to resolve");
            return Ok(ResolveResult::default());
        }

        let requested = requested_requirements(request)?;
        let jobs = self.config.max_jobs.max(1);

        let per_target: Vec<PexResult<Vec<InstalledDistribution>>> =
            stream::iter(0..request.targets.len())
                .map(|index| {
                    self.resolve_target(request, &requested, index, &request.targets[index])
                })
                .buffered(jobs)
                .collect()
                .await;

        let mut installed_distributions = Vec::new();
        for result in per_target {
            installed_distributions.extend(result?);
        }
        Ok(ResolveResult {
            installed_distributions,
        })
    }

    fn name(&self) -> &'static str {
        "pip"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::selector::tests::cpython;
    use crate::resolve::config::ResolveOptions;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn request(targets: Vec<ResolveTarget>) -> ResolveRequest {
        ResolveRequest {
            requirements: vec!["requests>=2".into()],
            requirement_files: vec![],
            constraint_files: vec![PathBuf::from("constraints.txt")],
            targets,
            runner: None,
            work_dir: PathBuf::from("/tmp/work"),
            cache_dir: Some(PathBuf::from("/root/.pex/pip")),
            compile: false,
            ignore_errors: false,
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn interpreter_target_args() {
        let options = ResolveOptions {
            indexes: vec!["https://example.com/simple".into()],
            find_links: vec!["/wheels".into()],
            transitive: false,
            allow_builds: false,
            ..Default::default()
        };
        let resolver = PipResolver::new(ResolveConfiguration::create(&options).unwrap());
        let target = ResolveTarget::Interpreter(cpython("/usr/bin/python3.11", "3.11.4", &[]));
        let args = resolver.install_args(
            &request(vec![target.clone()]),
            &target,
            Path::new("/tmp/work/0-cp311"),
            Path::new("/tmp/work/0-cp311.json"),
        );

        assert_eq!(&args[..3], &["-m", "pip", "install"]);
        assert!(has_pair(&args, "--target", "/tmp/work/0-cp311"));
        assert!(has_pair(&args, "--index-url", crate::resolve::PYPI));
        assert!(has_pair(&args, "--extra-index-url", "https://example.com/simple"));
        assert!(has_pair(&args, "--find-links", "/wheels"));
        assert!(has_pair(&args, "--constraint", "constraints.txt"));
        assert!(has_pair(&args, "--cache-dir", "/root/.pex/pip"));
        assert!(args.contains(&"--no-deps".to_string()));
        assert!(args.contains(&"--only-binary=:all:".to_string()));
        assert!(args.contains(&"--no-compile".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("requests>=2"));
    }

    #[test]
    fn platform_target_args() {
        let resolver = PipResolver::new(ResolveConfiguration::default());
        let target = ResolveTarget::Platform("linux_x86_64-cp-39-cp39".parse().unwrap());
        let args = resolver.install_args(
            &request(vec![target.clone()]),
            &target,
            Path::new("/tmp/site"),
            Path::new("/tmp/report.json"),
        );

        assert!(has_pair(&args, "--platform", "manylinux2014_x86_64"));
        assert!(has_pair(&args, "--platform", "linux_x86_64"));
        assert!(has_pair(&args, "--implementation", "cp"));
        assert!(has_pair(&args, "--python-version", "3.9"));
        assert!(has_pair(&args, "--abi", "cp39"));
        assert!(args.contains(&"--only-binary=:all:".to_string()));
    }

    #[test]
    fn no_index_when_pypi_disabled() {
        let options = ResolveOptions {
            pypi: false,
            ..Default::default()
        };
        let resolver = PipResolver::new(ResolveConfiguration::create(&options).unwrap());
        let target = ResolveTarget::Platform("macosx_11_0_arm64-cp-311-cp311".parse().unwrap());
        let args = resolver.install_args(
            &request(vec![]),
            &target,
            Path::new("/s"),
            Path::new("/r"),
        );
        assert!(args.contains(&"--no-index".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("manylinux")));
    }

    #[tokio::test]
    async fn empty_request_skips_pip() {
        let resolver = PipResolver::new(ResolveConfiguration::default());
        let mut empty = request(vec![ResolveTarget::Interpreter(cpython(
            "/no/such/python",
            "3.11.4",
            &[],
        ))]);
        empty.requirements.clear();
        let result = resolver.resolve(&empty).await.unwrap();
        assert!(result.installed_distributions.is_empty());
    }

    #[tokio::test]
    async fn platform_target_needs_a_runner() {
        let resolver = PipResolver::new(ResolveConfiguration::default());
        let target = ResolveTarget::Platform("linux_x86_64-cp-39-cp39".parse().unwrap());
        let err = resolver
            .resolve(&request(vec![target]))
            .await
            .unwrap_err();
        assert!(matches!(err, PexError::InterpreterNotFound(_)));
    }

    #[test]
    fn parses_install_report() {
        let report: InstallReport = serde_json::from_str(
            r#"{"version": "1", "install": [
                {"metadata": {"name": "requests", "version": "2.31.0"}, "requested": true},
                {"metadata": {"name": "idna", "version": "3.6"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(report.install.len(), 2);
        assert!(report.install[0].requested);
        assert!(!report.install[1].requested);
    }

    fn install(site: &Path, name: &str, version: &str, requires: &[&str]) -> InstalledDistribution {
        let dist_info = site.join(format!("{}-{}.dist-info", name, version));
        fs::create_dir_all(&dist_info).unwrap();
        let mut metadata = format!("Name: {}\nVersion: {}\n", name, version);
        for r in requires {
            metadata.push_str(&format!("Requires-Dist: {}\n", r));
        }
        fs::write(dist_info.join("METADATA"), metadata).unwrap();
        fs::write(site.join(format!("{}.py", name)), "").unwrap();
        fs::write(
            dist_info.join("RECORD"),
            format!("{}.py,,\n{}-{}.dist-info/METADATA,,\n", name, name, version),
        )
        .unwrap();
        InstalledDistribution {
            distribution: load_installed(site, name, version, "cp311").unwrap(),
            direct_requirement: None,
        }
    }

    fn linux() -> ResolveTarget {
        ResolveTarget::Interpreter(cpython(
            "/usr/bin/python3.11",
            "3.11.4",
            &["linux_x86_64-cp-311-cp311"],
        ))
    }

    #[test]
    fn consistent_resolve_passes() {
        let site = TempDir::new().unwrap();
        let installed = vec![
            install(
                site.path(),
                "requests",
                "2.31.0",
                &["idna<4,>=2.5", "pysocks; extra == \"socks\"", "colorama; sys_platform == \"win32\""],
            ),
            install(site.path(), "idna", "3.6", &[]),
        ];
        check_consistency(&installed, &linux()).unwrap();
    }

    #[test]
    fn inconsistent_resolve_fails() {
        let site = TempDir::new().unwrap();
        let installed = vec![
            install(site.path(), "requests", "2.31.0", &["idna<3", "urllib3>=1.21"]),
            install(site.path(), "idna", "3.6", &[]),
        ];
        let err = check_consistency(&installed, &linux()).unwrap_err();
        assert!(matches!(err, PexError::Unsatisfiable(_)));
        let message = err.to_string();
        assert!(message.contains("idna<3 but 3.6 was resolved"));
        assert!(message.contains("urllib3>=1.21 but no version was resolved"));
    }

    #[test]
    fn ignore_errors_skips_the_consistency_check() {
        let site = TempDir::new().unwrap();
        let installed = vec![
            install(site.path(), "requests", "2.31.0", &["idna<3"]),
            install(site.path(), "idna", "3.6", &[]),
        ];
        let resolver = PipResolver::new(ResolveConfiguration::default());
        let mut req = request(vec![linux()]);
        assert!(resolver.verify(&req, &installed, &linux()).is_err());

        req.ignore_errors = true;
        resolver.verify(&req, &installed, &linux()).unwrap();

        let intransitive = ResolveOptions {
            transitive: false,
            ..Default::default()
        };
        let resolver = PipResolver::new(ResolveConfiguration::create(&intransitive).unwrap());
        req.ignore_errors = false;
        resolver.verify(&req, &installed, &linux()).unwrap();
    }
}
