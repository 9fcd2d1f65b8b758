use std::collections::BTreeMap;
use std::path::PathBuf;

/// Section name to key/value pairs
pub type IniDocument = BTreeMap<String, BTreeMap<String, String>>;

/// Parse the host's INI-style config.
///
/// Keys before the first section land in the `""` section. `;` and `#`
/// start comment lines.
pub fn parse_ini(content: &str) -> IniDocument {
    let mut doc = IniDocument::new();
    let mut section = String::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.trim().to_string();
            doc.entry(section.clone()).or_default();
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            doc.entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    doc
}

/// Host configuration as read at the start of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfigSnapshot {
    pub current_theme: String,
    pub spotify_path: Option<PathBuf>,
    pub extensions: Vec<String>,
    pub config_path: PathBuf,
    pub userdata: PathBuf,
}

impl HostConfigSnapshot {
    pub fn from_ini(content: &str, config_path: PathBuf, userdata: PathBuf) -> Self {
        let doc = parse_ini(content);
        let get = |section: &str, key: &str| doc.get(section).and_then(|s| s.get(key)).cloned();

        Self {
            current_theme: get("Setting", "current_theme").unwrap_or_default(),
            spotify_path: get("Setting", "spotify_path")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            extensions: get("AdditionalOptions", "extensions")
                .map(|list| {
                    list.split('|')
                        .map(str::trim)
                        .filter(|e| !e.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            config_path,
            userdata,
        }
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.userdata.join("Extensions")
    }

    pub fn themes_dir(&self) -> PathBuf {
        self.userdata.join("Themes")
    }

    pub fn theme_dir(&self, identifier: &str) -> PathBuf {
        self.themes_dir().join(identifier)
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }
}
