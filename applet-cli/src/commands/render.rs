//! Render a UI tree file as a text outline.

use crate::outline::outline;
use anyhow::{Context, Result};
use applet_runtime::Widget;
use serde_json::Value;
use std::path::Path;

pub fn render_tree(path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read UI tree {:?}", path))?;
    let tree: Value = serde_json::from_str(&raw)
        .with_context(|| format!("UI tree {:?} is not valid JSON", path))?;

    print!("{}", outline(&Widget::from_value(&tree)));
    Ok(())
}
