//! Integration tests for pex

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn pex() -> Command {
        let mut cmd = cargo_bin_cmd!("pex");
        cmd.env("PEX_IGNORE_RCFILES", "1")
            .env_remove("PEX_ROOT")
            .env_remove("PEX_VERBOSE")
            .env_remove("PEX_PYTHON_PATH");
        cmd
    }

    #[test]
    fn help_displays() {
        pex()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("relocatable Python application bundles"))
            .stdout(predicate::str::contains("--interpreter-constraint"));
    }

    #[test]
    fn version_displays() {
        pex()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("pex"));
    }

    #[test]
    fn missing_python_binary() {
        pex()
            .args(["--python", "/no/such/binary", "-o", "unused.pex"])
            .assert()
            .code(102)
            .stderr(predicate::str::contains("/no/such/binary"));
    }

    #[test]
    fn python_with_interpreter_constraint() {
        pex()
            .args(["--python", "a", "--interpreter-constraint", ">=3.8"])
            .assert()
            .code(103)
            .stderr(predicate::str::contains("cannot be used together"));
    }

    #[test]
    fn entry_point_with_script() {
        pex()
            .args(["-m", "pkg.mod:main", "-c", "somescript"])
            .assert()
            .code(103)
            .stderr(predicate::str::contains("at most one entry point or script"));
    }

    #[test]
    fn malformed_interpreter_constraint() {
        pex()
            .args(["--interpreter-constraint", "CPython>>3"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("CPython>>3"));
    }

    #[test]
    fn missing_tmpdir() {
        pex()
            .args(["--tmpdir", "/no/such/tmpdir", "-o", "unused.pex"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("does not exist"));
    }

    #[test]
    fn conflicting_repositories() {
        pex()
            .args(["--pex-repository", "deps.pex", "--no-pypi", "six"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("--pex-repository"));
    }

    #[test]
    fn help_variables_lists_environment() {
        pex()
            .arg("--help-variables")
            .assert()
            .success()
            .stdout(predicate::str::contains("PEX_ROOT"))
            .stdout(predicate::str::contains("PEX_IGNORE_RCFILES"));
    }

    #[test]
    fn bad_seed_value() {
        pex().arg("--seed=loud").assert().failure();
    }

    #[cfg(unix)]
    mod fake_interpreter {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};

        /// A shell script answering the interpreter identification probe
        fn fake_python(dir: &Path) -> PathBuf {
            let path = dir.join("python3.11");
            fs::write(
                &path,
                concat!(
                    "#!/bin/sh\n",
                    "echo '{\"binary\": \"'\"$0\"'\", \"implementation\": \"CPython\", ",
                    "\"version\": [3, 11, 4], \"platforms\": [\"linux_x86_64-cp-311-cp311\"]}'\n",
                ),
            )
            .unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        struct Fixture {
            bin: TempDir,
            root: TempDir,
            tmp: TempDir,
            out: TempDir,
            src: TempDir,
        }

        impl Fixture {
            fn new() -> Self {
                let src = TempDir::new().unwrap();
                fs::write(src.path().join("app.py"), "print('hello')\n").unwrap();
                Self {
                    bin: TempDir::new().unwrap(),
                    root: TempDir::new().unwrap(),
                    tmp: TempDir::new().unwrap(),
                    out: TempDir::new().unwrap(),
                    src,
                }
            }

            fn build(&self, extra: &[&str]) -> Command {
                let python = fake_python(self.bin.path());
                let mut cmd = pex();
                cmd.arg("--python")
                    .arg(&python)
                    .arg("--pex-root")
                    .arg(self.root.path())
                    .arg("--tmpdir")
                    .arg(self.tmp.path())
                    .arg("-D")
                    .arg(self.src.path())
                    .args(["-m", "app"])
                    .arg("-o")
                    .arg(self.out.path().join("app.pex"))
                    .args(extra);
                cmd
            }
        }

        #[test]
        fn writes_loose_pex() {
            let fixture = Fixture::new();
            fixture.build(&[]).assert().success().stdout("");

            let pex = fixture.out.path().join("app.pex");
            assert!(pex.join("__main__.py").is_file());
            assert!(pex.join("app.py").is_file());
            let info: serde_json::Value =
                serde_json::from_slice(&fs::read(pex.join("PEX-INFO")).unwrap()).unwrap();
            assert_eq!(info["entry_point"], "app");
            assert!(info["pex_hash"].is_string());

            let main = fs::read_to_string(pex.join("__main__.py")).unwrap();
            assert!(main.starts_with("#!/usr/bin/env python3.11\n"));
        }

        #[test]
        fn seed_args_is_stable() {
            let fixture = Fixture::new();
            let first = fixture.build(&["--seed=args"]).assert().success();
            let first = String::from_utf8(first.get_output().stdout.clone()).unwrap();
            let first = first.trim();
            assert!(first.ends_with("__main__.py"));
            assert!(Path::new(first).starts_with(fixture.root.path()));
            assert!(Path::new(first).is_file());

            let second = fixture.build(&["--seed=args"]).assert().success();
            let second = String::from_utf8(second.get_output().stdout.clone()).unwrap();
            assert_eq!(first, second.trim());

            let installed = fs::read_dir(fixture.root.path().join("installed_pexes"))
                .unwrap()
                .count();
            assert_eq!(installed, 1);
        }

        #[test]
        fn seed_verbose_is_json() {
            let fixture = Fixture::new();
            let assert = fixture.build(&["--seed=verbose"]).assert().success();
            let report: serde_json::Value =
                serde_json::from_slice(&assert.get_output().stdout).unwrap();
            assert!(report["pex"].as_str().unwrap().ends_with("__main__.py"));
            assert!(report["python"].as_str().unwrap().ends_with("python3.11"));
            assert_eq!(
                report["pex_root"].as_str().unwrap(),
                fixture.root.path().display().to_string()
            );
        }

        fn pex_hash(pex: &Path) -> String {
            let info: serde_json::Value =
                serde_json::from_slice(&fs::read(pex.join("PEX-INFO")).unwrap()).unwrap();
            info["pex_hash"].as_str().unwrap().to_string()
        }

        #[test]
        fn zip_safe_only_warns() {
            let fixture = Fixture::new();
            let pex = fixture.out.path().join("app.pex");

            fixture
                .build(&[])
                .assert()
                .success()
                .stderr(predicate::str::contains("deprecated").not());
            let plain = pex_hash(&pex);

            fixture
                .build(&["--zip-safe"])
                .assert()
                .success()
                .stderr(predicate::str::contains("deprecated"));
            assert!(pex.join("__main__.py").is_file());
            assert_eq!(pex_hash(&pex), plain);
        }

        #[test]
        fn unsatisfiable_constraints() {
            let fixture = Fixture::new();
            fake_python(fixture.bin.path());
            pex()
                .arg("--python-path")
                .arg(fixture.bin.path())
                .args(["--interpreter-constraint", "CPython>=3.99"])
                .arg("--tmpdir")
                .arg(fixture.tmp.path())
                .arg("-o")
                .arg(fixture.out.path().join("app.pex"))
                .assert()
                .code(102)
                .stderr(predicate::str::contains("CPython>=3.99"));
        }
    }
}
