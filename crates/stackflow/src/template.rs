//! Variable expansion in stack files
//!
//! String values are rendered with Tera before references are parsed, so
//! `"{{ stage }}-assets"` and `"${bucket.arn}/*"` can be mixed freely.

use crate::loader::{LoadError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tera::{Context, Tera};

/// A template that is nothing but one variable, e.g. `{{ desired_count }}`
static SOLE_VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}$").expect("variable pattern is valid")
});

/// Variable context
pub type Variables = HashMap<String, serde_json::Value>;

pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    pub fn add_variables(&mut self, variables: Variables) {
        for (key, value) in variables {
            self.context.insert(key, &value);
        }
    }

    /// Value of the variable `template` consists of, keeping its JSON type.
    ///
    /// `None` when the template is anything more than a single variable or
    /// the variable is undefined; those go through [`Self::render_str`].
    pub fn sole_variable(&self, template: &str) -> Option<serde_json::Value> {
        let caps = SOLE_VARIABLE.captures(template.trim())?;
        self.context.get(&caps[1]).cloned()
    }

    /// Render `template`, leaving strings without Tera markup untouched
    pub fn render_str(&mut self, template: &str, location: &str) -> Result<String> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_string());
        }

        self.tera
            .render_str(template, &self.context)
            .map_err(|e| LoadError::Template {
                location: location.to_string(),
                message: describe(&e),
            })
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Tera reports the interesting part (e.g. the missing variable) as a source
fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
