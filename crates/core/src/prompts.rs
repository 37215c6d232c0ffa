use anyhow::{Context, Result};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;

pub const GENERATE_QUESTIONS: &str = "generate_questions";
pub const EVALUATE_RESPONSE: &str = "evaluate_response";
pub const ANALYZE_DEPTH: &str = "analyze_depth";
pub const FOLLOW_UP: &str = "follow_up";

const TEMPLATES: [&str; 4] = [GENERATE_QUESTIONS, EVALUATE_RESPONSE, ANALYZE_DEPTH, FOLLOW_UP];

/// Prompt templates keyed by name. Templates use `{name}` placeholders;
/// braces that do not name a supplied variable are left untouched, so JSON
/// examples inside a template need no escaping.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    prompts: HashMap<String, String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptLibrary {
    pub fn builtin() -> Self {
        let prompts = [
            (GENERATE_QUESTIONS, include_str!("../prompts/generate_questions.md")),
            (EVALUATE_RESPONSE, include_str!("../prompts/evaluate_response.md")),
            (ANALYZE_DEPTH, include_str!("../prompts/analyze_depth.md")),
            (FOLLOW_UP, include_str!("../prompts/follow_up.md")),
        ]
        .into_iter()
        .map(|(key, body)| (key.to_string(), body.to_string()))
        .collect();
        Self { prompts }
    }

    /// Built-in templates, with any `.md` file in `dir` replacing the template of the same stem.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let overrides = read_overrides(dir)?;
        tracing::info!(count = overrides.len(), dir = %dir.display(), "Loaded prompt overrides");
        Ok(Self::builtin().with_overrides(overrides))
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.prompts.extend(overrides);
        self
    }

    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> Result<String> {
        let template = self
            .prompts
            .get(key)
            .with_context(|| format!("No prompt template named '{key}'"))?;
        Ok(render_template(template, vars))
    }
}

fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}

/// Reads each `<template>.md` in `dir` as a replacement for that template.
/// Anything that is not a markdown file is skipped.
pub fn read_overrides(dir: &Path) -> Result<HashMap<String, String>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Prompt override directory {} is not readable", dir.display()))?;

    let mut overrides = HashMap::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list prompt overrides in {}", dir.display()))?
            .path();
        if !path.is_file() || path.extension() != Some(OsStr::new("md")) {
            continue;
        }
        let Some(template) = path.file_stem().and_then(OsStr::to_str) else {
            tracing::warn!(path = %path.display(), "Skipping prompt override with a non UTF-8 name");
            continue;
        };
        if !TEMPLATES.contains(&template) {
            tracing::warn!(template, "Prompt override does not match a known template");
        }
        let body = fs::read_to_string(&path)
            .with_context(|| format!("Prompt override {} is not readable", path.display()))?;
        overrides.insert(template.to_string(), body);
    }
    Ok(overrides)
}
