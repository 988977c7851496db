use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "producerbot/0.2";
pub const DEFAULT_PRODUCERS_CATEGORY: &str = "Category:Producers";
pub const DEFAULT_COMPILATION_CATEGORY: &str = "Category:Compilation albums";
pub const DEFAULT_EDIT_SUMMARY: &str = "Bot: Updating producer page discography";
pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub bot: BotSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotSection {
    pub producers_category: Option<String>,
    pub compilation_category: Option<String>,
    pub edit_summary: Option<String>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl BotConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > None.
    pub fn api_url_owned(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn producers_category(&self) -> String {
        let category = self
            .bot
            .producers_category
            .as_deref()
            .unwrap_or(DEFAULT_PRODUCERS_CATEGORY);
        with_category_prefix(category)
    }

    pub fn compilation_category(&self) -> String {
        let category = self
            .bot
            .compilation_category
            .as_deref()
            .unwrap_or(DEFAULT_COMPILATION_CATEGORY);
        with_category_prefix(category)
    }

    pub fn edit_summary(&self) -> &str {
        self.bot
            .edit_summary
            .as_deref()
            .unwrap_or(DEFAULT_EDIT_SUMMARY)
    }

    /// Category members fetched per request, clamped to the API's 1..=500.
    pub fn page_size(&self) -> usize {
        self.bot.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 500)
    }

    /// Bot credentials from BOT_USERNAME / BOT_PASSWORD, when both are set.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = env_override("BOT_USERNAME")?;
        let password = env::var("BOT_PASSWORD").ok().filter(|value| !value.is_empty())?;
        Some(Credentials { username, password })
    }
}

/// Load and parse a BotConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BotConfig> {
    if !config_path.exists() {
        return Ok(BotConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BotConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn with_category_prefix(category: &str) -> String {
    let trimmed = category.trim();
    if trimmed.starts_with("Category:") {
        trimmed.to_string()
    } else {
        format!("Category:{trimmed}")
    }
}
