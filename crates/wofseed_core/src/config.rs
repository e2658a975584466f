use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::hierarchy::{DuplicatePolicy, HierarchyConfig, PlacetypeRules};
use crate::runtime::ResolvedPaths;

pub const DEFAULT_USER_AGENT: &str = "wofseed/0.1";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_GITHUB_RAW_URL: &str = "https://raw.githubusercontent.com";
pub const DEFAULT_GITHUB_ORG: &str = "whosonfirst-data";
pub const DEFAULT_GITHUB_BRANCH: &str = "master";
pub const DEFAULT_REPO_PREFIX: &str = "whosonfirst-data-admin-";
pub const DEFAULT_LEAF_FILES: [&str; 3] = ["buyers.json", "properties.json", "metadata.json"];

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SeedConfig {
    #[serde(default)]
    pub hierarchy: HierarchySection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub github: GithubSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HierarchySection {
    pub root_placetype: Option<String>,
    pub allowed_placetypes: Option<Vec<String>>,
    pub transitions: Option<BTreeMap<String, Vec<String>>>,
    pub enforce_rules: Option<bool>,
    pub strict_duplicates: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct OutputSection {
    pub dir: Option<String>,
    pub leaf_files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct GithubSection {
    pub api_url: Option<String>,
    pub raw_url: Option<String>,
    pub org: Option<String>,
    pub branch: Option<String>,
    pub repo_prefix: Option<String>,
    pub user_agent: Option<String>,
}

impl SeedConfig {
    /// Build the core's placetype rules; unset keys keep their defaults.
    pub fn hierarchy_config(&self) -> HierarchyConfig {
        let section = &self.hierarchy;
        let duplicates = if section.strict_duplicates.unwrap_or(false) {
            DuplicatePolicy::Reject
        } else {
            DuplicatePolicy::LastWriteWins
        };
        if !section.enforce_rules.unwrap_or(true) {
            return HierarchyConfig {
                rules: None,
                duplicates,
            };
        }

        let mut rules = PlacetypeRules::default();
        if let Some(root) = &section.root_placetype {
            rules.root = root.trim().to_ascii_lowercase();
        }
        if let Some(allowed) = &section.allowed_placetypes {
            rules.allowed = allowed
                .iter()
                .map(|item| item.trim().to_ascii_lowercase())
                .filter(|item| !item.is_empty())
                .collect();
        }
        if let Some(transitions) = &section.transitions {
            rules.transitions = transitions
                .iter()
                .map(|(parent, children)| {
                    (
                        parent.trim().to_ascii_lowercase(),
                        children
                            .iter()
                            .map(|child| child.trim().to_ascii_lowercase())
                            .collect(),
                    )
                })
                .collect();
        }
        HierarchyConfig {
            rules: Some(rules),
            duplicates,
        }
    }

    /// Resolve the seed output directory: env WOFSEED_OUTPUT_DIR > config > `<root>/seeded`.
    pub fn output_dir(&self, paths: &ResolvedPaths) -> PathBuf {
        if let Ok(value) = env::var("WOFSEED_OUTPUT_DIR") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return paths.project_path(Path::new(trimmed));
            }
        }
        match self.output.dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => paths.project_path(Path::new(dir)),
            _ => paths.default_output_dir.clone(),
        }
    }

    pub fn leaf_files(&self) -> Vec<String> {
        match &self.output.leaf_files {
            Some(files) if !files.is_empty() => files.clone(),
            _ => DEFAULT_LEAF_FILES
                .iter()
                .map(|item| (*item).to_string())
                .collect(),
        }
    }

    /// Resolve the GitHub API base URL: env > config > default.
    pub fn github_api_url(&self) -> String {
        env_or("WOFSEED_GITHUB_API_URL", self.github.api_url.as_deref())
            .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string())
    }

    pub fn github_raw_url(&self) -> String {
        env_or("WOFSEED_GITHUB_RAW_URL", self.github.raw_url.as_deref())
            .unwrap_or_else(|| DEFAULT_GITHUB_RAW_URL.to_string())
    }

    pub fn github_org(&self) -> String {
        env_or("WOFSEED_GITHUB_ORG", self.github.org.as_deref())
            .unwrap_or_else(|| DEFAULT_GITHUB_ORG.to_string())
    }

    pub fn github_branch(&self) -> String {
        env_or("WOFSEED_GITHUB_BRANCH", self.github.branch.as_deref())
            .unwrap_or_else(|| DEFAULT_GITHUB_BRANCH.to_string())
    }

    pub fn repo_prefix(&self) -> String {
        self.github
            .repo_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_REPO_PREFIX.to_string())
    }

    pub fn user_agent(&self) -> String {
        env_or("WOFSEED_USER_AGENT", self.github.user_agent.as_deref())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

fn env_or(key: &str, configured: Option<&str>) -> Option<String> {
    if let Ok(value) = env::var(key) {
        let trimmed = value.trim().to_string();
        if !trimmed.is_empty() {
            return Some(trimmed);
        }
    }
    configured
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

/// Load and parse a SeedConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SeedConfig> {
    if !config_path.exists() {
        return Ok(SeedConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SeedConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    format!(
        "# wofseed configuration (materialized by `wofseed init`)\n\n[hierarchy]\nroot_placetype = \"country\"\nallowed_placetypes = [\"country\", \"region\", \"county\", \"locality\", \"neighbourhood\", \"microhood\"]\n# false builds trees from raw parent links, rooted at records without a known parent\nenforce_rules = true\nstrict_duplicates = false\n\n[hierarchy.transitions]\ncountry = [\"region\"]\nregion = [\"county\", \"locality\"]\ncounty = [\"locality\"]\nlocality = [\"neighbourhood\"]\nneighbourhood = [\"microhood\"]\n\n[output]\ndir = \"seeded\"\nleaf_files = [\"buyers.json\", \"properties.json\", \"metadata.json\"]\n\n[github]\napi_url = \"{DEFAULT_GITHUB_API_URL}\"\nraw_url = \"{DEFAULT_GITHUB_RAW_URL}\"\norg = \"{DEFAULT_GITHUB_ORG}\"\nbranch = \"{DEFAULT_GITHUB_BRANCH}\"\nrepo_prefix = \"{DEFAULT_REPO_PREFIX}\"\n# user_agent = \"{DEFAULT_USER_AGENT}\"\n# Set WOFSEED_GITHUB_TOKEN in the environment or .env for authenticated requests.\n"
    )
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{SeedConfig, load_config, render_default_config};
    use crate::hierarchy::{DuplicatePolicy, HierarchyConfig};

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, SeedConfig::default());
        assert_eq!(config.hierarchy_config(), HierarchyConfig::default());
    }

    #[test]
    fn rendered_default_config_matches_builtin_defaults() {
        let parsed: SeedConfig = toml::from_str(&render_default_config()).expect("parse");
        assert_eq!(parsed.hierarchy_config(), HierarchyConfig::default());
        assert_eq!(
            parsed.leaf_files(),
            vec!["buyers.json", "properties.json", "metadata.json"]
        );
        assert_eq!(parsed.repo_prefix(), "whosonfirst-data-admin-");
    }

    #[test]
    fn hierarchy_section_overrides_rules() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[hierarchy]
root_placetype = "Region"
allowed_placetypes = ["region", "locality", ""]
strict_duplicates = true

[hierarchy.transitions]
region = ["Locality"]
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        let hierarchy = config.hierarchy_config();
        assert_eq!(hierarchy.duplicates, DuplicatePolicy::Reject);
        let rules = hierarchy.rules.expect("rules");
        assert_eq!(rules.root, "region");
        assert_eq!(rules.allowed.len(), 2);
        assert!(rules.permits("region", "locality"));
        assert!(!rules.permits("country", "region"));
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn enforce_rules_false_yields_permissive_config() {
        let config: SeedConfig =
            toml::from_str("[hierarchy]\nenforce_rules = false\n").expect("parse");
        assert!(config.hierarchy_config().rules.is_none());
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[output]\ndir = \"out\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.output.dir.as_deref(), Some("out"));
        assert_eq!(config.hierarchy_config(), HierarchyConfig::default());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[hierarchy\nroot = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}
