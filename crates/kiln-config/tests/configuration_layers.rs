//! Command-line layering tests for the shared configuration.

use std::ffi::OsString;
use std::path::PathBuf;

use kiln_config::{Config, LogFormat};
use ortho_config::OrthoConfig;
use rstest::rstest;

fn load(args: &[&str]) -> Config {
    let mut argv = vec![OsString::from("kiln-plan")];
    argv.extend(args.iter().map(OsString::from));
    match Config::load_from_iter(argv) {
        Ok(config) => config,
        Err(error) => panic!("configuration should load: {error}"),
    }
}

#[test]
fn bare_invocation_uses_defaults() {
    let config = load(&[]);
    assert_eq!(config.plugin_timeout_secs, 60);
    assert_eq!(config.max_parallel_invocations, 1);
    assert!(!config.always_invoke_plugins);
    assert!(!config.execute);
}

#[rstest]
#[case::timeout(&["--plugin-timeout-secs", "5"])]
#[case::timeout_inline(&["--plugin-timeout-secs=5"])]
fn cli_overrides_timeout(#[case] args: &[&str]) {
    let config = load(args);
    assert_eq!(config.plugin_timeout_secs, 5);
}

#[test]
fn cli_sets_paths_and_format() {
    let config = load(&[
        "--build-dir",
        "/tmp/kiln-layers",
        "--snapshot",
        "/tmp/package.json",
        "--log-format",
        "json",
    ]);
    assert_eq!(config.build_dir(), PathBuf::from("/tmp/kiln-layers"));
    assert_eq!(config.snapshot(), Some(PathBuf::from("/tmp/package.json").as_path()));
    assert_eq!(config.log_format(), LogFormat::Json);
}
