use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::OutputFileSet;
use crate::error::{Result, SpiceError};
use crate::slug::url_slugify;

pub const CONFIG_FILE: &str = "spice.toml";
pub const PACKAGE_JSON: &str = "package.json";
pub const DEFAULT_PORT: u16 = 54321;

const DEFAULT_OUT_DIR: &str = "./dist";
const DEFAULT_VERSION: &str = "0.0.1";

const ENTRY_DIRS_JS: &[&str] = &["", "extension", "src", "src/extension"];
const ENTRY_DIRS_CSS: &[&str] = &["", "styles", "src", "src/styles"];
const JS_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mts", "mjs", "cts", "cjs"];
const CSS_EXTENSIONS: &[&str] = &["css"];
/// Stylesheet sources that need a preprocessor the bundler does not run
const PREPROCESSED_CSS_EXTENSIONS: &[&str] =
    &["scss", "sass", "less", "styl", "stylus", "pcss", "postcss"];

/// Packaging shape of the project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateKind {
    /// Script-only bundle, styles are inlined into the script in production
    #[default]
    Extension,
    /// Script plus a separate user stylesheet
    Theme,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::Theme => "theme",
        }
    }

    /// Whether bundled CSS is embedded into the script artifact
    pub fn inlines_css(&self) -> bool {
        matches!(self, Self::Extension)
    }

    pub fn all() -> &'static [TemplateKind] {
        &[TemplateKind::Extension, TemplateKind::Theme]
    }
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TemplateKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "extension" | "ext" => Ok(Self::Extension),
            "theme" => Ok(Self::Theme),
            _ => Err(format!("Unknown template: {}", s)),
        }
    }
}

/// Template kind together with the entry files it requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    Extension { entry: PathBuf },
    Theme { js: PathBuf, css: PathBuf },
}

impl Template {
    pub fn kind(&self) -> TemplateKind {
        match self {
            Self::Extension { .. } => TemplateKind::Extension,
            Self::Theme { .. } => TemplateKind::Theme,
        }
    }

    pub fn entry_points(&self) -> Vec<PathBuf> {
        match self {
            Self::Extension { entry } => vec![entry.clone()],
            Self::Theme { js, css } => vec![js.clone(), css.clone()],
        }
    }
}

/// Options forwarded to the bundler engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlerOptions {
    /// Overrides the command-level minify decision when set
    pub minify: Option<bool>,
    /// Extra module specifiers left out of the bundle
    pub external: Vec<String>,
    /// Output targets, e.g. `["es2022", "chrome120"]`
    pub target: Vec<String>,
    /// Compile-time constant replacements
    pub define: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served under `/files/` (default: the dev build directory)
    #[serde(default)]
    pub serve_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            serve_dir: None,
        }
    }
}

/// Fully resolved project configuration, read-only for a build cycle
#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub name: String,
    pub version: String,
    pub template: Template,
    pub out_dir: PathBuf,
    pub bundler: BundlerOptions,
    pub server: ServerConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct FileConfig {
    name: Option<String>,
    version: Option<String>,
    template: Option<TemplateKind>,
    entry: Option<EntryConfig>,
    out_dir: Option<PathBuf>,
    bundler: BundlerOptions,
    server: ServerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EntryConfig {
    Single(PathBuf),
    Theme {
        js: Option<PathBuf>,
        css: Option<PathBuf>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
    name: Option<String>,
    version: Option<String>,
}

#[derive(Clone, Copy)]
enum EntryKind {
    Script,
    Style,
}

impl EntryKind {
    fn label(self) -> &'static str {
        match self {
            Self::Script => "JavaScript",
            Self::Style => "CSS",
        }
    }
}

impl Config {
    /// Load and resolve the project config rooted at `root`
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        let file = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content).map_err(|e| SpiceError::ConfigParse {
                path: path.clone(),
                message: e.to_string(),
            })?
        } else {
            FileConfig::default()
        };

        Self::resolve(file, root)
    }

    /// Parse config text directly (no file lookup for `spice.toml`)
    pub fn from_toml(content: &str, root: &Path) -> Result<Self> {
        let file: FileConfig = toml::from_str(content).map_err(|e| SpiceError::ConfigParse {
            path: Self::path(root),
            message: e.to_string(),
        })?;
        Self::resolve(file, root)
    }

    /// Get config file path
    pub fn path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE)
    }

    fn resolve(file: FileConfig, root: &Path) -> Result<Self> {
        let pkg = if file.name.is_some() && file.version.is_some() {
            PackageJson::default()
        } else {
            read_package_json(root)
        };

        let name = file
            .name
            .or(pkg.name)
            .or_else(|| {
                root.file_name()
                    .map(|n| n.to_string_lossy().to_string())
            })
            .unwrap_or_default();
        if name.trim().is_empty() {
            return Err(SpiceError::ConfigInvalid {
                message: "Name is required".to_string(),
            });
        }

        let version = file
            .version
            .or(pkg.version)
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());

        let template = match (file.template.unwrap_or_default(), file.entry) {
            (TemplateKind::Extension, Some(EntryConfig::Single(entry))) => Template::Extension {
                entry: root.join(entry),
            },
            (TemplateKind::Extension, None) => Template::Extension {
                entry: discover_entry(root, EntryKind::Script)?,
            },
            (TemplateKind::Theme, Some(EntryConfig::Theme { js, css })) => Template::Theme {
                js: resolve_or_discover(root, js, EntryKind::Script)?,
                css: check_stylesheet(resolve_or_discover(root, css, EntryKind::Style)?)?,
            },
            (TemplateKind::Theme, None) => Template::Theme {
                js: discover_entry(root, EntryKind::Script)?,
                css: discover_entry(root, EntryKind::Style)?,
            },
            (TemplateKind::Extension, Some(EntryConfig::Theme { .. })) => {
                return Err(SpiceError::ConfigInvalid {
                    message: "extension entry must be a single file path".to_string(),
                })
            }
            (TemplateKind::Theme, Some(EntryConfig::Single(_))) => {
                return Err(SpiceError::ConfigInvalid {
                    message: "theme entry must be a table with `js` and `css`".to_string(),
                })
            }
        };

        let out_dir = root.join(file.out_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR)));

        Ok(Self {
            root: root.to_path_buf(),
            name,
            version,
            template,
            out_dir,
            bundler: file.bundler,
            server: file.server,
        })
    }

    pub fn template_kind(&self) -> TemplateKind {
        self.template.kind()
    }

    /// Output file names by role
    pub fn output_files(&self) -> OutputFileSet {
        OutputFileSet::new(&self.name, self.template_kind())
    }

    /// Name the host uses to reference this project: `<slug>.js` for
    /// extensions, `<slug>` for themes
    pub fn host_identifier(&self) -> String {
        let slug = url_slugify(&self.name);
        match self.template_kind() {
            TemplateKind::Extension => format!("{}.js", slug),
            TemplateKind::Theme => slug,
        }
    }
}

fn read_package_json(root: &Path) -> PackageJson {
    fs::read_to_string(root.join(PACKAGE_JSON))
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

fn resolve_or_discover(root: &Path, given: Option<PathBuf>, kind: EntryKind) -> Result<PathBuf> {
    match given {
        Some(path) => Ok(root.join(path)),
        None => discover_entry(root, kind),
    }
}

/// Plain CSS only: preprocessor sources are rejected by name
fn check_stylesheet(path: PathBuf) -> Result<PathBuf> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if PREPROCESSED_CSS_EXTENSIONS.contains(&ext.as_str()) {
        return Err(SpiceError::ConfigInvalid {
            message: format!(
                "unsupported stylesheet `{}`: `.{}` needs a preprocessor, use plain `.css`",
                path.display(),
                ext
            ),
        });
    }
    Ok(path)
}

/// Find the first `app.*` file in the conventional locations. For styles,
/// a preprocessor source found before any plain CSS is reported as an error.
fn discover_entry(root: &Path, kind: EntryKind) -> Result<PathBuf> {
    let (dirs, extensions): (&[&str], Vec<&str>) = match kind {
        EntryKind::Script => (ENTRY_DIRS_JS, JS_EXTENSIONS.to_vec()),
        EntryKind::Style => (
            ENTRY_DIRS_CSS,
            [CSS_EXTENSIONS, PREPROCESSED_CSS_EXTENSIONS].concat(),
        ),
    };

    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());

    for dir in dirs {
        let pattern = if dir.is_empty() {
            format!("{}/app.*", escaped_root)
        } else {
            format!("{}/{}/app.*", escaped_root, dir)
        };
        let Ok(paths) = glob::glob(&pattern) else {
            continue;
        };

        let mut matches: Vec<PathBuf> = paths
            .filter_map(|p| p.ok())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .map(|ext| extensions.contains(&ext.to_string_lossy().as_ref()))
                    .unwrap_or(false)
            })
            .collect();

        matches.sort_by_key(|p| {
            let ext = p
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            extensions.iter().position(|e| *e == ext)
        });

        if let Some(first) = matches.into_iter().next() {
            return match kind {
                EntryKind::Script => Ok(first),
                EntryKind::Style => check_stylesheet(first),
            };
        }
    }

    Err(SpiceError::EntryNotFound { kind: kind.label() })
}
