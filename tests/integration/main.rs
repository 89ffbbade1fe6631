//! Integration tests for tcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// A project directory with its own tcache.toml and cache directory
    struct Project {
        dir: TempDir,
    }

    impl Project {
        fn new(rules: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let cache = dir.path().join("cache");
            let config = format!(
                "[project]\nname = \"it\"\n\n[cache]\ndirectory = {:?}\n\n{}",
                cache.display().to_string(),
                rules
            );
            std::fs::write(dir.path().join("tcache.toml"), config).unwrap();
            Self { dir }
        }

        fn file(&self, name: &str, content: &str) {
            std::fs::write(self.dir.path().join(name), content).unwrap();
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("tcache");
            cmd.current_dir(self.dir.path()).env_remove("TCACHE_CONFIG");
            cmd
        }
    }

    const PASSTHROUGH: &str = "[[transform]]\npattern = '\\.js$'\ntransformer = \"passthrough\"\n";
    const BANNER: &str =
        "[[transform]]\npattern = '\\.js$'\ntransformer = \"banner\"\noptions = { banner = \"// hi\" }\n";

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("tcache")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("transform and cache source files"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("tcache")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("tcache"));
    }

    #[test]
    fn transform_passthrough_prints_source() {
        let project = Project::new(PASSTHROUGH);
        project.file("banana.js", "module.exports = \"banana\";");

        project
            .cmd()
            .args(["transform", "banana.js"])
            .assert()
            .success()
            .stdout("module.exports = \"banana\";\n");
    }

    #[test]
    fn transform_banner_and_map() {
        let project = Project::new(BANNER);
        project.file("a.js", "a();");

        project
            .cmd()
            .args(["transform", "a.js", "--show-map"])
            .assert()
            .success()
            .stdout("// hi\na();\n")
            .stderr(predicate::str::contains("Source map:"));
    }

    #[test]
    fn transform_with_coverage_inlines_map() {
        let project = Project::new(BANNER);
        project.file("a.js", "a();");

        project
            .cmd()
            .args(["transform", "a.js", "--coverage", "--async"])
            .assert()
            .success()
            .stdout(
                predicate::str::contains("__tcache_coverage__")
                    .and(predicate::str::contains("//# sourceMappingURL=data:application/json")),
            );
    }

    #[test]
    fn transform_missing_file_fails() {
        let project = Project::new(PASSTHROUGH);
        project
            .cmd()
            .args(["transform", "missing.js"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read source file"));
    }

    #[test]
    fn unknown_transformer_is_configuration_error() {
        let project = Project::new("[[transform]]\npattern = 'js$'\ntransformer = \"babel-jest\"\n");
        project.file("a.js", "a();");

        project
            .cmd()
            .args(["transform", "a.js"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Transformer not found: babel-jest"));
    }

    #[test]
    fn cache_stats_and_clear() {
        let project = Project::new(PASSTHROUGH);
        project.file("a.js", "a();");

        project.cmd().args(["transform", "a.js"]).assert().success();

        project
            .cmd()
            .args(["cache", "stats", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"entries\": 1"));

        project
            .cmd()
            .args(["cache", "clear"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed"));

        project
            .cmd()
            .args(["cache", "stats", "--format", "plain"])
            .assert()
            .success()
            .stdout("0 0 0\n");
    }

    #[test]
    fn no_cache_writes_nothing() {
        let project = Project::new(PASSTHROUGH);
        project.file("a.js", "a();");

        project
            .cmd()
            .args(["transform", "a.js", "--no-cache"])
            .assert()
            .success();
        assert!(!project.dir.path().join("cache").exists());
    }

    #[test]
    fn cache_path_is_project_scoped() {
        let project = Project::new(PASSTHROUGH);
        project
            .cmd()
            .args(["cache", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("tcache-it-"));
    }

    #[test]
    fn config_path_and_show() {
        let project = Project::new(PASSTHROUGH);

        project
            .cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("tcache.toml"));

        project
            .cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[[transform]]").and(predicate::str::contains("passthrough")));
    }

    #[test]
    fn config_init_refuses_to_overwrite() {
        let project = Project::new(PASSTHROUGH);
        project
            .cmd()
            .args(["config", "init"])
            .assert()
            .success()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn explicit_missing_config_fails() {
        let project = Project::new(PASSTHROUGH);
        project
            .cmd()
            .args(["-c", "nope.toml", "cache", "path"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Configuration file not found"));
    }
}
