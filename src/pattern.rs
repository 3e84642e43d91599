//! Publish-pattern resolution
//!
//! Platforms and modules carry a template that computes their published group
//! and artifact name, e.g. `$group.$platform` or `$name-$module`. Resolution is
//! behind a trait so a build can plug in its own naming rules.

use crate::{Error, Result};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Property overriding the default group pattern.
pub const GROUP_PATTERN_PROPERTY: &str = "xapi.publish.group.pattern";
/// Property overriding the default name pattern.
pub const NAME_PATTERN_PROPERTY: &str = "xapi.publish.name.pattern";

/// Values available to a publish pattern.
#[derive(Debug, Clone)]
pub struct PatternContext<'a> {
    pub build_name: &'a str,
    pub project_name: &'a str,
    pub group: &'a str,
    pub version: &'a str,
    pub platform: &'a str,
    pub module: &'a str,
}

impl PatternContext<'_> {
    fn lookup(&self, variable: &str) -> Option<&str> {
        match variable {
            "build" => Some(self.build_name),
            "name" | "project" => Some(self.project_name),
            "group" => Some(self.group),
            "version" => Some(self.version),
            "platform" => Some(self.platform),
            "module" => Some(self.module),
            _ => None,
        }
    }
}

/// Turns a publish pattern into a concrete group or artifact name.
pub trait PatternResolver: Send + Sync {
    /// Resolve `pattern`; `None` means "use the default pattern for this variant".
    fn resolve_group(&self, pattern: Option<&str>, ctx: &PatternContext<'_>) -> Result<String>;

    fn resolve_name(&self, pattern: Option<&str>, ctx: &PatternContext<'_>) -> Result<String>;
}

/// `$variable` / `${variable}` substitution with configurable defaults.
#[derive(Debug, Clone, Default)]
pub struct TemplateResolver {
    group_pattern: Option<String>,
    name_pattern: Option<String>,
}

fn variable_regex() -> &'static Regex {
    static VARIABLE: OnceLock<Regex> = OnceLock::new();
    VARIABLE.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("variable pattern is a valid regex")
    })
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick up pattern overrides from schema properties.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Self {
        let configured = |key: &str| {
            properties
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            group_pattern: configured(GROUP_PATTERN_PROPERTY),
            name_pattern: configured(NAME_PATTERN_PROPERTY),
        }
    }

    fn default_group_pattern(&self, platform: &str) -> &str {
        match &self.group_pattern {
            Some(pattern) => pattern.as_str(),
            None if platform == "main" => "$group",
            None => "$group.$platform",
        }
    }

    fn default_name_pattern(&self, module: &str) -> &str {
        match &self.name_pattern {
            Some(pattern) => pattern.as_str(),
            None if module == "main" => "$name",
            None => "$name-$module",
        }
    }

    /// Substitute every variable in `pattern`.
    pub fn expand(pattern: &str, ctx: &PatternContext<'_>) -> Result<String> {
        let mut unknown = None;
        let expanded = variable_regex().replace_all(pattern, |caps: &Captures<'_>| {
            let variable = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match ctx.lookup(variable) {
                Some(value) => value.to_string(),
                None => {
                    unknown.get_or_insert_with(|| variable.to_string());
                    String::new()
                }
            }
        });

        if let Some(variable) = unknown {
            return Err(Error::Resolution(format!(
                "Unknown variable ${} in pattern '{}'",
                variable, pattern
            )));
        }
        let expanded = expanded.trim();
        if expanded.is_empty() {
            return Err(Error::Resolution(format!(
                "Pattern '{}' resolved to an empty value for {}:{}",
                pattern, ctx.platform, ctx.module
            )));
        }
        Ok(expanded.to_string())
    }
}

impl PatternResolver for TemplateResolver {
    fn resolve_group(&self, pattern: Option<&str>, ctx: &PatternContext<'_>) -> Result<String> {
        let pattern = pattern
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.default_group_pattern(ctx.platform));
        Self::expand(pattern, ctx)
    }

    fn resolve_name(&self, pattern: Option<&str>, ctx: &PatternContext<'_>) -> Result<String> {
        let pattern = pattern
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.default_name_pattern(ctx.module));
        Self::expand(pattern, ctx)
    }
}
