use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

const DEFAULT_ANALYSIS_SYSTEM: &str = include_str!("default_prompts/analysis-system.md");
const DEFAULT_ANALYSIS_REQUEST: &str = include_str!("default_prompts/analysis-request.md");
const DEFAULT_FIX_SYSTEM: &str = include_str!("default_prompts/fix-system.md");
const DEFAULT_FIX_REQUEST: &str = include_str!("default_prompts/fix-request.md");
const DEFAULT_RETRY: &str = include_str!("default_prompts/retry.md");

/// Template names understood by the engine. Each maps to `<name>.md`.
pub const TEMPLATE_NAMES: &[&str] = &[
    "analysis-system",
    "analysis-request",
    "fix-system",
    "fix-request",
    "retry",
];

fn default_template(name: &str) -> Option<&'static str> {
    match name {
        "analysis-system" => Some(DEFAULT_ANALYSIS_SYSTEM),
        "analysis-request" => Some(DEFAULT_ANALYSIS_REQUEST),
        "fix-system" => Some(DEFAULT_FIX_SYSTEM),
        "fix-request" => Some(DEFAULT_FIX_REQUEST),
        "retry" => Some(DEFAULT_RETRY),
        _ => None,
    }
}

/// Code fence language tag for a source extension.
pub fn fence_language(extension: &str) -> &str {
    match extension {
        "py" => "python",
        "rs" => "rust",
        "js" => "javascript",
        "ts" => "typescript",
        "rb" => "ruby",
        other => other,
    }
}

/// Prompt template engine with embedded defaults and user overrides.
pub struct PromptEngine {
    override_dir: Option<String>,
}

impl PromptEngine {
    pub fn new(override_dir: Option<String>) -> Self {
        Self { override_dir }
    }

    /// Load the source of a template. A `<name>.md` file in the override
    /// directory wins over the embedded default.
    pub fn load_template(&self, name: &str) -> Result<String> {
        let default = default_template(name)
            .ok_or_else(|| Error::Prompt(format!("unknown prompt template: {name}")))?;

        if let Some(ref dir) = self.override_dir {
            let path = Path::new(dir).join(format!("{name}.md"));
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    Error::Prompt(format!(
                        "failed to read override template {}: {e}",
                        path.display()
                    ))
                });
            }
        }

        Ok(default.to_string())
    }

    /// Load a template and render it with the given variables.
    pub fn render(&self, name: &str, vars: &HashMap<&str, String>) -> Result<String> {
        let template = self.load_template(name)?;
        render_template(&template, vars)
    }
}

/// Render a template with `{{ variable }}` placeholders. Referencing a
/// variable that is not supplied is an error.
pub fn render_template(template: &str, vars: &HashMap<&str, String>) -> Result<String> {
    let engine = upon::Engine::new();
    let compiled = engine
        .compile(template)
        .map_err(|e| Error::Prompt(format!("invalid template: {e}")))?;
    compiled
        .render(&engine, vars)
        .to_string()
        .map_err(|e| Error::Prompt(format!("render failed: {e}")))
}
