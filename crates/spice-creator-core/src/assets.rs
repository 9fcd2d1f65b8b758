//! On-disk script templates and marker substitution.
//!
//! Templates reference values through bare global identifiers such as
//! `__SPICE_KEY__`. Minifiers never rename unbound globals, so the markers
//! survive a transform and can be substituted afterwards.

use std::path::{Path, PathBuf};

use crate::error::{Result, SpiceError};

pub const ASSETS_DIR_ENV: &str = "SPICE_ASSETS_DIR";
pub const WRAPPER_TEMPLATE: &str = "wrapper.js";
pub const LIVE_RELOAD_TEMPLATE: &str = "live-reload.js";

/// Directory holding the script templates.
///
/// `$SPICE_ASSETS_DIR`, then `assets/` next to the executable, then the
/// crate's own `assets/` directory.
pub fn assets_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ASSETS_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join("assets")))
        .filter(|dir| dir.is_dir())
    {
        return dir;
    }

    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets")
}

/// Read a template, failing with [`SpiceError::TemplateNotFound`] when absent
pub fn load_template(dir: &Path, name: &str) -> Result<String> {
    let path = dir.join(name);
    if !path.is_file() {
        return Err(SpiceError::TemplateNotFound { path });
    }
    Ok(std::fs::read_to_string(&path)?)
}

/// Replace every occurrence of each marker in one left-to-right pass.
///
/// Inserted values are never rescanned, so substituted text that happens to
/// contain a marker is left intact.
pub fn substitute(template: &str, markers: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let next = markers
            .iter()
            .filter_map(|(marker, value)| rest.find(marker).map(|idx| (idx, *marker, value)))
            .min_by_key(|(idx, marker, _)| (*idx, std::cmp::Reverse(marker.len())));

        let Some((idx, marker, value)) = next else {
            out.push_str(rest);
            return out;
        };

        out.push_str(&rest[..idx]);
        out.push_str(value);
        rest = &rest[idx + marker.len()..];
    }
}

/// Escape text for embedding inside a JavaScript template literal
pub fn escape_template_literal(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${")
}
