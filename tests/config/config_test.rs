//! Coverage for config parsing and key-table mapping.

use std::path::PathBuf;

use romkit::config::{ResignConfig, RomkitConfig, SignapkConfig};

#[test]
fn default_resign_values() {
    let resign = ResignConfig::default();
    assert!(resign.parallel);
    assert_eq!(resign.workers, 8);
}

#[test]
fn default_signapk_values() {
    let signapk = SignapkConfig::default();
    assert_eq!(signapk.java, PathBuf::from("java"));
    assert_eq!(signapk.max_heap_mb, 2048);
    assert!(signapk.jar.ends_with("signapk/signapk.jar"));
}

#[test]
fn empty_config_parses_to_defaults() {
    let config_parse = toml::from_str::<RomkitConfig>("");
    assert!(config_parse.is_ok());
    let config = match config_parse {
        Ok(config) => config,
        Err(err) => panic!("empty config should parse: {err}"),
    };
    assert!(config.keys.is_empty());
    assert_eq!(config.resign.workers, 8);
}

#[test]
fn parse_full_config() {
    let toml_str = r#"
[resign]
parallel = false
workers = 2

[signapk]
java = "/usr/bin/java"
jar = "/opt/signapk/signapk.jar"
libs_dir = "/opt/signapk/libs"
max_heap_mb = 4096

[keys.platform]
certificate = "/keys/platform.x509.pem"
key = "/keys/platform.pk8"

[keys.media]
certificate = "/keys/media.x509.pem"
key = "/keys/media.pk8"
"#;
    let config_parse = toml::from_str::<RomkitConfig>(toml_str);
    assert!(config_parse.is_ok());
    let config = match config_parse {
        Ok(config) => config,
        Err(err) => panic!("full config should parse: {err}"),
    };
    assert!(!config.resign.parallel);
    assert_eq!(config.resign.workers, 2);
    assert_eq!(config.signapk.java, PathBuf::from("/usr/bin/java"));
    assert_eq!(
        config.signapk.libs_dir,
        Some(PathBuf::from("/opt/signapk/libs"))
    );
    assert_eq!(config.keys.len(), 2);
}

#[test]
fn signing_keys_carry_their_label() {
    let toml_str = r#"
[keys.platform]
certificate = "/keys/platform.x509.pem"
key = "/keys/platform.pk8"
"#;
    let config = match toml::from_str::<RomkitConfig>(toml_str) {
        Ok(config) => config,
        Err(err) => panic!("config should parse: {err}"),
    };
    let keys = config.signing_keys();
    let platform = keys.get("platform").expect("platform key");
    assert_eq!(platform.label, "platform");
    assert_eq!(
        platform.certificate_path,
        PathBuf::from("/keys/platform.x509.pem")
    );
    assert_eq!(platform.key_path, PathBuf::from("/keys/platform.pk8"));
}
