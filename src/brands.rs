#![forbid(unsafe_code)]

//! Brand registry for the Yuntu dashboard scraping workflow.
//!
//! One JSON file maps brand keys to advertiser configuration. The file is
//! read wholesale on every access and rewritten wholesale on every add; there
//! is no locking, which is acceptable for a single-operator CLI.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One configured brand. The dashboard URL is always derived from the
/// advertiser id, never entered by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandEntry {
    pub name: String,
    pub aadvid: String,
    #[serde(default)]
    pub industry: String,
    pub yuntu_url: String,
}

/// Builds the brand's hot-content dashboard URL from its advertiser id.
pub fn yuntu_url_for(aadvid: &str) -> String {
    format!(
        "https://yuntu.oceanengine.com/yuntu_brand/ecom/strategy/medium/talent_markting/hotcontent?aadvid={aadvid}"
    )
}

fn default_brands() -> BTreeMap<String, BrandEntry> {
    let mut brands = BTreeMap::new();
    brands.insert(
        "lego".to_string(),
        BrandEntry {
            name: "乐高/LEGO".to_string(),
            aadvid: "1731407744628743".to_string(),
            industry: "母婴/母婴".to_string(),
            yuntu_url: yuntu_url_for("1731407744628743"),
        },
    );
    brands
}

/// The registry plus the file it came from.
#[derive(Debug)]
pub struct BrandRegistry {
    path: PathBuf,
    brands: BTreeMap<String, BrandEntry>,
}

impl BrandRegistry {
    /// Reads the registry file, or starts from the built-in defaults when no
    /// file exists yet.
    pub fn load(path: &Path) -> Result<Self> {
        let brands = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            default_brands()
        };
        Ok(Self {
            path: path.to_path_buf(),
            brands,
        })
    }

    /// Adds (or replaces) a brand and rewrites the whole file.
    pub fn add(&mut self, key: &str, name: &str, aadvid: &str, industry: &str) -> Result<()> {
        self.brands.insert(
            key.to_string(),
            BrandEntry {
                name: name.to_string(),
                aadvid: aadvid.to_string(),
                industry: industry.to_string(),
                yuntu_url: yuntu_url_for(aadvid),
            },
        );
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let payload =
            serde_json::to_string_pretty(&self.brands).context("serializing brand registry")?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    pub fn url(&self, key: &str) -> Option<&str> {
        self.brands.get(key).map(|brand| brand.yuntu_url.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&BrandEntry> {
        self.brands.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BrandEntry)> {
        self.brands.iter()
    }
}
