use std::path::PathBuf;
use std::sync::Arc;

use assessment_core::{AssessmentError, AssessmentPayload, PipelineResult};
use dashmap::DashMap;
use serde_json::Value;

/// Loads versioned text templates and fills `{{field}}` placeholders from
/// a payload. Templates are cached after first load per name+version key.
/// A placeholder with no matching payload field is replaced with a visible
/// `[missing: <field>]` marker and logged, instead of being left verbatim.
pub struct PromptRenderer {
    template_dir: PathBuf,
    cache: DashMap<String, Arc<String>>,
}

impl PromptRenderer {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
            cache: DashMap::new(),
        }
    }

    pub fn render(
        &self,
        name: &str,
        version: &str,
        payload: &AssessmentPayload,
    ) -> PipelineResult<String> {
        let template = self.load(name, version)?;
        Ok(substitute(&template, &payload.fields))
    }

    fn load(&self, name: &str, version: &str) -> PipelineResult<Arc<String>> {
        let key = format!("{}_{}", name, version);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Arc::clone(&cached));
        }

        let path = self.template_dir.join(format!("{}.txt", key));
        let text = std::fs::read_to_string(&path).map_err(|e| {
            AssessmentError::Template(format!("failed to load {}: {}", path.display(), e))
        })?;
        tracing::info!("Loaded prompt template {}", path.display());

        let template = Arc::new(text);
        self.cache.insert(key, Arc::clone(&template));
        Ok(template)
    }
}

/// Literal `{{field}}` substitution. Strings insert as-is, other scalars
/// stringify, arrays and objects pretty-print as indented JSON.
fn substitute(template: &str, fields: &serde_json::Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated placeholder: keep the tail verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let key = after[..end].trim();
        match fields.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(value @ (Value::Array(_) | Value::Object(_))) => {
                out.push_str(&serde_json::to_string_pretty(value).unwrap_or_default())
            }
            Some(Value::Null) | None => {
                tracing::error!("Template placeholder '{}' has no payload field", key);
                out.push_str(&format!("[missing: {}]", key));
            }
            Some(value) => out.push_str(&value.to_string()),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
