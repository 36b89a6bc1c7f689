#![forbid(unsafe_code)]

//! Environment-driven configuration. Values come from the process environment
//! first and fall back to a local `.env` file, so one-off shell overrides win
//! over whatever the operator keeps on disk.

use anyhow::{Context, Result, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default single-video detail endpoint. Overridable through `DOUYIN_API_URL`
/// for proxies or mock servers.
pub const DEFAULT_DOUYIN_API_URL: &str =
    "https://api.tikhub.io/api/v1/douyin/web/fetch_video_detail";

/// Everything the binaries need to know before touching the network.
#[derive(Debug, Clone)]
pub struct Config {
    pub douyin_api_key: Option<String>,
    pub douyin_api_url: String,
    pub feishu_app_id: Option<String>,
    pub feishu_app_secret: Option<String>,
    pub groq_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub data_dir: PathBuf,
}

impl Config {
    /// Validates that the credentials a command depends on are present.
    ///
    /// The video-data API key is always required; the Feishu app credentials
    /// only matter for the spreadsheet sync flow.
    pub fn validate(&self, require_feishu: bool) -> Result<()> {
        let mut missing = Vec::new();

        if self.douyin_api_key.is_none() {
            missing.push("DOUYIN_API_KEY");
        }
        if require_feishu {
            if self.feishu_app_id.is_none() {
                missing.push("FEISHU_APP_ID");
            }
            if self.feishu_app_secret.is_none() {
                missing.push("FEISHU_APP_SECRET");
            }
        }

        if !missing.is_empty() {
            bail!("missing required environment variables: {}", missing.join(", "));
        }
        Ok(())
    }

    /// The API key, after `validate` guaranteed it exists.
    pub fn require_api_key(&self) -> Result<&str> {
        self.douyin_api_key
            .as_deref()
            .context("DOUYIN_API_KEY not set")
    }

    /// Location of the brand registry file inside the data directory.
    pub fn brands_file(&self) -> PathBuf {
        self.data_dir.join("brands_config.json")
    }

    /// Location of the externally produced transcript cache.
    pub fn transcript_cache_file(&self) -> PathBuf {
        self.data_dir.join("yuntu_scripts.json")
    }
}

pub fn load_config() -> Result<Config> {
    let file_vars = read_env_file(Path::new(DEFAULT_ENV_PATH))?;
    Ok(build_config(&file_vars, env_var_string))
}

fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Config {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    Config {
        douyin_api_key: lookup("DOUYIN_API_KEY"),
        douyin_api_url: lookup("DOUYIN_API_URL")
            .unwrap_or_else(|| DEFAULT_DOUYIN_API_URL.to_string()),
        feishu_app_id: lookup("FEISHU_APP_ID"),
        feishu_app_secret: lookup("FEISHU_APP_SECRET"),
        groq_api_key: lookup("GROQ_API_KEY"),
        openai_api_key: lookup("OPENAI_API_KEY"),
        data_dir: lookup("DOUYIN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses a `.env`-style file: `KEY=value` lines, optional `export` prefix,
/// single or double quotes, `#` comments. Missing files read as empty.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_env(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> Config {
        let file = make_env(contents);
        let vars = read_env_file(file.path()).unwrap();
        build_config(&vars, |_| None)
    }

    #[test]
    fn build_config_reads_all_keys() {
        let config = config_from(
            "DOUYIN_API_KEY=\"k\"\nFEISHU_APP_ID=\"id\"\nFEISHU_APP_SECRET=\"secret\"\n",
        );
        assert_eq!(config.douyin_api_key.as_deref(), Some("k"));
        assert_eq!(config.feishu_app_id.as_deref(), Some("id"));
        assert_eq!(config.feishu_app_secret.as_deref(), Some("secret"));
        assert_eq!(config.douyin_api_url, DEFAULT_DOUYIN_API_URL);
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
    }

    #[test]
    fn build_config_prefers_env_over_file() {
        let file = make_env("DOUYIN_API_KEY=\"file-key\"\n");
        let vars = read_env_file(file.path()).unwrap();
        let config = build_config(&vars, |key| {
            if key == "DOUYIN_API_KEY" {
                Some("env-key".to_string())
            } else {
                None
            }
        });
        assert_eq!(config.douyin_api_key.as_deref(), Some("env-key"));
    }

    #[test]
    fn build_config_honors_overrides() {
        let config = config_from(
            "DOUYIN_API_KEY=\"k\"\nDOUYIN_API_URL=\"https://proxy.local/detail\"\nDOUYIN_DATA_DIR=\"/srv/douyin\"\n",
        );
        assert_eq!(config.douyin_api_url, "https://proxy.local/detail");
        assert_eq!(config.data_dir, PathBuf::from("/srv/douyin"));
        assert_eq!(
            config.brands_file(),
            PathBuf::from("/srv/douyin/brands_config.json")
        );
        assert_eq!(
            config.transcript_cache_file(),
            PathBuf::from("/srv/douyin/yuntu_scripts.json")
        );
    }

    #[test]
    fn validate_reports_every_missing_key() {
        let config = config_from("");
        let err = config.validate(true).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("DOUYIN_API_KEY"));
        assert!(message.contains("FEISHU_APP_ID"));
        assert!(message.contains("FEISHU_APP_SECRET"));
    }

    #[test]
    fn validate_skips_feishu_when_not_required() {
        let config = config_from("DOUYIN_API_KEY=\"k\"\n");
        assert!(config.validate(false).is_ok());
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let file = make_env(
            r#"
            export DOUYIN_API_KEY="abc"
            FEISHU_APP_ID='cli_x'
            GROQ_API_KEY=raw
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(file.path()).unwrap();
        assert_eq!(vars.get("DOUYIN_API_KEY").unwrap(), "abc");
        assert_eq!(vars.get("FEISHU_APP_ID").unwrap(), "cli_x");
        assert_eq!(vars.get("GROQ_API_KEY").unwrap(), "raw");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
