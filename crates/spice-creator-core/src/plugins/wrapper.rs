//! Loader wrapper rendering.
//!
//! The wrapper template is transformed once (so minification applies to the
//! wrapper itself), then every build substitutes its markers:
//!
//! | marker                   | value                                      |
//! |--------------------------|--------------------------------------------|
//! | `__SPICE_KEY__`          | registry key, JSON string                  |
//! | `__SPICE_META__`         | `{"id","version","hash"}`, JSON object     |
//! | `__SPICE_MAX_ATTEMPTS__` | readiness poll attempt cap                 |
//! | `__SPICE_INTERVAL_MS__`  | readiness poll interval                    |
//! | `__SPICE_CSS__`          | inlined CSS as a template literal          |
//! | `__SPICE_INJECT__()`     | bundled code                               |

use serde::{Deserialize, Serialize};

use crate::assets::{escape_template_literal, substitute};
use crate::bundler::{TransformOptions, Transformer};
use crate::config::TemplateKind;
use crate::error::{Result, SpiceError};
use crate::slug::var_slugify;

pub const READY_MAX_ATTEMPTS: u32 = 1000;
pub const READY_INTERVAL_MS: u32 = 50;

const INJECT_MARKER: &str = "__SPICE_INJECT__()";
const START_COMMENT: &str = "/* --- START OF COMPILED CODE --- */";
const END_COMMENT: &str = "/* --- END OF COMPILED CODE --- */";

/// Identity the wrapper registers in the host's shared registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperMetadata {
    pub id: String,
    pub version: String,
    pub hash: String,
}

/// Registry key: project name and version slug plus the template kind, so
/// different artifacts never share a slot
pub fn registry_key(name: &str, version: &str, kind: TemplateKind) -> String {
    format!("{}-{}", var_slugify(&format!("{}_{}", name, version)), kind)
}

/// Per-build values substituted into the wrapper
#[derive(Debug, Clone)]
pub struct WrapInput<'a> {
    pub key: &'a str,
    pub metadata: &'a WrapperMetadata,
    pub code: &'a str,
    /// Raw CSS to inline; `None` leaves the slot empty
    pub css: Option<&'a str>,
}

/// Transformed wrapper template ready for per-build rendering
#[derive(Debug, Clone)]
pub struct WrapperTemplate {
    source: String,
    minify: bool,
}

impl WrapperTemplate {
    /// Run the raw template through the transformer once
    pub async fn prepare(
        raw: &str,
        transformer: &dyn Transformer,
        options: &TransformOptions,
    ) -> Result<Self> {
        let source = transformer.transform(raw, options).await?;
        if !source.contains(INJECT_MARKER) {
            return Err(SpiceError::Bundler {
                message: format!("wrapper template has no `{}` marker", INJECT_MARKER),
            });
        }
        Ok(Self {
            source,
            minify: options.minify,
        })
    }

    pub fn render(&self, input: &WrapInput<'_>) -> Result<String> {
        let body = if self.minify {
            input.code.to_string()
        } else {
            format!("{}\n{}\n{}", START_COMMENT, input.code, END_COMMENT)
        };

        let css = input.css.map(escape_template_literal).unwrap_or_default();

        let markers = [
            (INJECT_MARKER, body),
            ("__SPICE_KEY__", serde_json::to_string(input.key)?),
            ("__SPICE_META__", serde_json::to_string(input.metadata)?),
            ("__SPICE_MAX_ATTEMPTS__", READY_MAX_ATTEMPTS.to_string()),
            ("__SPICE_INTERVAL_MS__", READY_INTERVAL_MS.to_string()),
            ("__SPICE_CSS__", format!("`{}`", css)),
        ];

        Ok(substitute(&self.source, &markers))
    }
}

/// Read back the metadata a rendered wrapper registers
pub fn extract_metadata(rendered: &str) -> Option<WrapperMetadata> {
    let start = rendered.find("{\"id\":")?;
    let mut de = serde_json::Deserializer::from_str(&rendered[start..]);
    WrapperMetadata::deserialize(&mut de).ok()
}
