use async_trait::async_trait;
use tracing::debug;

use super::wrapper::{registry_key, WrapInput, WrapperMetadata, WrapperTemplate};
use crate::artifact::{OutputFileSet, SharedCache};
use crate::bundler::{BuildResult, OutputFile, Plugin, TransformOptions, Transformer};
use crate::config::TemplateKind;
use crate::error::Result;
use crate::hash::short_hash;
use crate::slug::var_slugify;

/// Inputs that stay fixed for one build context
#[derive(Debug, Clone)]
pub struct LoaderWrapOptions {
    pub name: String,
    pub version: String,
    pub kind: TemplateKind,
    pub output_files: OutputFileSet,
    pub minify: bool,
    pub target: Vec<String>,
    /// Development builds serve CSS separately instead of inlining it, so
    /// `output_files` must name a stylesheet for every kind
    pub dev: bool,
}

/// Turns raw bundle output into role-named artifacts in the build cache
pub struct LoaderWrap {
    options: LoaderWrapOptions,
    key: String,
    template: WrapperTemplate,
    cache: SharedCache,
}

impl LoaderWrap {
    /// Prepare the wrapper template. `raw_template` must already be loaded;
    /// a missing template never gets this far.
    pub async fn new(
        options: LoaderWrapOptions,
        raw_template: &str,
        transformer: &dyn Transformer,
        cache: SharedCache,
    ) -> Result<Self> {
        let transform = TransformOptions {
            minify: options.minify,
            target: options.target.clone(),
        };
        let template = WrapperTemplate::prepare(raw_template, transformer, &transform).await?;
        let key = registry_key(&options.name, &options.version, options.kind);

        Ok(Self {
            options,
            key,
            template,
            cache,
        })
    }

    fn inlines_css(&self) -> bool {
        self.options.kind.inlines_css() && !self.options.dev
    }

    /// All stylesheet outputs joined, for inlining into the script
    fn bundled_css(outputs: &[OutputFile]) -> String {
        outputs
            .iter()
            .filter(|f| f.is_stylesheet())
            .map(|f| f.text().into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn wrap_script(&self, file: &OutputFile, css: Option<&str>) -> Result<Vec<u8>> {
        let code = file.text();
        let metadata = WrapperMetadata {
            id: var_slugify(&self.options.name),
            version: self.options.version.clone(),
            hash: short_hash(&file.contents),
        };

        let rendered = self.template.render(&WrapInput {
            key: &self.key,
            metadata: &metadata,
            code: &code,
            css,
        })?;
        Ok(rendered.into_bytes())
    }

    /// Logical output name for a raw output, `None` when it is folded into
    /// the script
    fn logical_name(&self, file: &OutputFile) -> Option<String> {
        if file.is_script() {
            Some(self.options.output_files.js.clone())
        } else if file.is_stylesheet() {
            if self.inlines_css() {
                return None;
            }
            Some(
                self.options
                    .output_files
                    .css
                    .clone()
                    .unwrap_or_else(|| file.file_name()),
            )
        } else {
            Some(file.file_name())
        }
    }
}

#[async_trait]
impl Plugin for LoaderWrap {
    fn name(&self) -> &str {
        "loader-wrap"
    }

    async fn on_start(&self) -> Result<()> {
        self.cache.lock().await.begin_build();
        Ok(())
    }

    async fn on_end(&self, result: &BuildResult) -> Result<()> {
        if !result.succeeded() {
            return Ok(());
        }

        let css = self
            .inlines_css()
            .then(|| Self::bundled_css(&result.output_files))
            .filter(|css| !css.is_empty());

        let mut staged = Vec::with_capacity(result.output_files.len());
        for file in &result.output_files {
            let Some(name) = self.logical_name(file) else {
                continue;
            };
            let bytes = if file.is_script() {
                self.wrap_script(file, css.as_deref())?
            } else {
                file.contents.clone()
            };
            staged.push((name, bytes));
        }

        let mut cache = self.cache.lock().await;
        for (name, bytes) in staged {
            if cache.record_if_changed(&name, &bytes) {
                debug!(artifact = %name, "artifact changed");
            }
        }
        Ok(())
    }
}
