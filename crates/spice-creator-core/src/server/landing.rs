use chrono::{DateTime, Local};

use super::FILES_PREFIX;
use crate::artifact::OutputFileSet;
use crate::config::TemplateKind;

/// Data shown on the server's root document
#[derive(Debug, Clone)]
pub struct LandingPage {
    pub project: String,
    pub version: String,
    pub kind: TemplateKind,
    pub files: OutputFileSet,
    pub started: DateTime<Local>,
}

impl LandingPage {
    pub fn new(project: &str, version: &str, kind: TemplateKind, files: OutputFileSet) -> Self {
        Self {
            project: project.to_string(),
            version: version.to_string(),
            kind,
            files,
            started: Local::now(),
        }
    }

    pub fn render(&self, push_url: &str) -> String {
        let mut links = vec![self.files.js.as_str()];
        links.extend(self.files.css.as_deref());

        let items: String = links
            .iter()
            .map(|name| {
                format!(
                    "      <li><a href=\"{prefix}{name}\">{prefix}{name}</a></li>\n",
                    prefix = FILES_PREFIX,
                    name = escape_html(name)
                )
            })
            .collect();

        format!(
            r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8">
    <title>{project} · dev server</title>
  </head>
  <body>
    <h1>{project} <small>v{version}</small></h1>
    <p>Serving a {kind} build since {started}.</p>
    <ul>
{items}    </ul>
    <p>Push channel: <code>{push_url}</code></p>
  </body>
</html>
"#,
            project = escape_html(&self.project),
            version = escape_html(&self.version),
            kind = self.kind,
            started = self.started.format("%Y-%m-%d %H:%M:%S"),
            items = items,
            push_url = escape_html(push_url),
        )
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
