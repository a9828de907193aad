use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct ConfigFile {
    pub url: Option<String>,
    pub wordlist: Option<String>,
    pub extensions: Option<String>,
    pub blank_ext: Option<bool>,
    pub skip_dirs: Option<bool>,
    pub skip_files: Option<bool>,
    pub no_recurse: Option<bool>,
    pub case_insensitive: Option<bool>,
    pub anywhere: Option<bool>,
    pub workers: Option<usize>,
    pub timeout: Option<usize>,
    pub rate: Option<u32>,
    pub proxy: Option<String>,
    pub follow_redirects: Option<bool>,
    pub header: Option<Vec<String>>,
    pub fail_case: Option<String>,
    pub fail_regex: Option<Vec<String>>,
    pub exts_to_skip: Option<String>,
    pub get_only: Option<bool>,
    pub charset: Option<String>,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub fuzz_start: Option<String>,
    pub fuzz_end: Option<String>,
    pub output: Option<String>,
    pub output_format: Option<String>,
    pub no_color: Option<bool>,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
        .or_else(|| {
            let drive = env::var_os("HOMEDRIVE")?;
            let path = env::var_os("HOMEPATH")?;
            Some(PathBuf::from(drive).join(path))
        })
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(home_dir()?.join(".dirprobe").join("config.yml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn expand_tilde_string(path: &str) -> String {
    expand_tilde(path).to_string_lossy().to_string()
}

pub fn load_config(path: &PathBuf, allow_missing: bool) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_yaml::from_str::<ConfigFile>(&contents)
            .map_err(|e| format!("failed to parse config '{}': {e}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Ok(ConfigFile::default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("config file not found '{}'", path.display()))
        }
        Err(e) => Err(format!("failed to read config '{}': {e}", path.display())),
    }
}

fn default_config_yaml() -> String {
    r#"# Dirprobe config
#
# Location (default):
#   ~/.dirprobe/config.yml

# Target
# url: https://example.com/app/

# Input
# wordlist: ./wordlists/directory-list.txt
# extensions: php,bak
# blank_ext: false

# What to probe
# skip_dirs: false
# skip_files: false
# no_recurse: false
# case_insensitive: false
# anywhere: false

# Performance
workers: 10
timeout: 10
# rate: 100

# HTTP (optional)
# proxy: http://127.0.0.1:8080
# header:
#   - "Authorization: Bearer token"
follow_redirects: false
# get_only: false

# Not-found detection
# fail_case: thereIsNoWayThat-You-CanBeThere
# fail_regex:
#   - "The page .* was not found"
# exts_to_skip: jpg,jpeg,gif,png,ico,css,svg,woff,woff2

# Brute-force generation (instead of a wordlist)
# charset: abcdefghijklmnopqrstuvwxyz0123456789
# min_len: 1
# max_len: 3

# URL fuzzing (probe template instead of recursion)
# fuzz_start: /id.php?user=
# fuzz_end: "&action=view"

# Output (optional)
# output: ./scan.json
# output_format: json
no_color: false
"#
    .to_string()
}

pub fn ensure_default_config_file(path: &PathBuf) -> Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("invalid config path '{}'", path.display()))?;
    std::fs::create_dir_all(parent).map_err(|e| {
        format!(
            "failed to create config directory '{}': {e}",
            parent.display()
        )
    })?;
    let contents = default_config_yaml();
    std::fs::write(path, contents)
        .map_err(|e| format!("failed to write config file '{}': {e}", path.display()))?;
    Ok(())
}
