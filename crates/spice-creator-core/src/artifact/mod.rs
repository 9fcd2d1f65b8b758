//! Build artifacts and their per-build change tracking.

mod cache;

pub use cache::{ArtifactRecord, BuildCache, SharedCache};

use crate::config::TemplateKind;
use crate::slug::url_slugify;

/// Stylesheet name the host loads for the active theme
pub const THEME_CSS_FILE: &str = "user.css";
/// Script name the host loads for the active theme
pub const THEME_JS_FILE: &str = "theme.js";

/// Output file names keyed by logical role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFileSet {
    pub js: String,
    pub css: Option<String>,
}

impl OutputFileSet {
    pub fn new(project_name: &str, kind: TemplateKind) -> Self {
        match kind {
            TemplateKind::Extension => Self {
                js: format!("{}.js", url_slugify(project_name)),
                css: None,
            },
            TemplateKind::Theme => Self {
                js: THEME_JS_FILE.to_string(),
                css: Some(THEME_CSS_FILE.to_string()),
            },
        }
    }

    /// Dev builds serve an extension's stylesheet next to its script, named
    /// after it. Themes already have one.
    pub fn with_served_stylesheet(mut self) -> Self {
        if self.css.is_none() {
            let stem = self.js.strip_suffix(".js").unwrap_or(&self.js);
            self.css = Some(format!("{}.css", stem));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_outputs_slugged_script_only() {
        let files = OutputFileSet::new("My App", TemplateKind::Extension);
        assert_eq!(files.js, "my-app.js");
        assert_eq!(files.css, None);
    }

    #[test]
    fn theme_stylesheet_name_ignores_project_name() {
        let a = OutputFileSet::new("Dark Glass", TemplateKind::Theme);
        let b = OutputFileSet::new("Something Else", TemplateKind::Theme);
        assert_eq!(a.css.as_deref(), Some(THEME_CSS_FILE));
        assert_eq!(a, b);
    }

    #[test]
    fn served_stylesheet_follows_script_name() {
        let files = OutputFileSet::new("My App", TemplateKind::Extension).with_served_stylesheet();
        assert_eq!(files.js, "my-app.js");
        assert_eq!(files.css.as_deref(), Some("my-app.css"));

        let theme = OutputFileSet::new("Dark", TemplateKind::Theme);
        assert_eq!(theme.clone().with_served_stylesheet(), theme);
    }
}
