use std::collections::BTreeMap;

use crate::bundler::{LoadArgs, Loaded, Plugin, ResolveArgs, Resolved};

pub const NAMESPACE: &str = "spicetify-global";

/// Module specifiers the host already provides, and where it keeps them
pub const HOST_GLOBALS: &[(&str, &str)] = &[
    ("react", "Spicetify.React"),
    ("react-dom", "Spicetify.ReactDOM"),
    ("react-dom/client", "Spicetify.ReactDOM"),
    ("react-dom/server", "Spicetify.ReactDOMServer"),
    ("react/jsx-runtime", "Spicetify.ReactJSX"),
];

/// Replaces imports of host-provided modules with global lookups
pub struct ExternalGlobal {
    globals: BTreeMap<String, String>,
}

impl ExternalGlobal {
    pub fn new<I, K, V>(globals: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            globals: globals
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn host_defaults() -> Self {
        Self::new(HOST_GLOBALS.iter().copied())
    }
}

impl Plugin for ExternalGlobal {
    fn name(&self) -> &str {
        "external-global"
    }

    fn resolve_filter(&self) -> Vec<String> {
        self.globals.keys().cloned().collect()
    }

    fn on_resolve(&self, args: &ResolveArgs) -> Option<Resolved> {
        self.globals.contains_key(&args.path).then(|| Resolved {
            path: args.path.clone(),
            namespace: NAMESPACE.to_string(),
        })
    }

    fn on_load(&self, args: &LoadArgs) -> Option<Loaded> {
        if args.namespace != NAMESPACE {
            return None;
        }
        self.globals.get(&args.path).map(|global| Loaded {
            contents: format!("module.exports = {}", global),
        })
    }
}
