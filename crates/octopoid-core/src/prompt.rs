//! Prompt rendering and blueprint template plumbing.

use std::path::Path;

use anyhow::{Context, Result};

/// Render a prompt template by substituting `{{key}}` placeholders.
///
/// Unknown placeholders are left in place so a template typo is visible in
/// the rendered prompt rather than silently blanked.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
    }
    rendered
}

/// Copy every regular file from `src` into `dst` (scripts handoff). Missing
/// `src` is fine: not every blueprint ships scripts.
pub fn copy_scripts(src: &Path, dst: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Ok(0);
    }

    std::fs::create_dir_all(dst)
        .with_context(|| format!("failed to create scripts dir {}", dst.display()))?;

    let mut copied = 0;
    for entry in std::fs::read_dir(src)
        .with_context(|| format!("failed to read scripts dir {}", src.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let target = dst.join(entry.file_name());
        std::fs::copy(&path, &target).with_context(|| {
            format!("failed to copy {} to {}", path.display(), target.display())
        })?;
        copied += 1;
    }

    Ok(copied)
}

/// Parse a blueprint `env.sh` into key/value pairs.
///
/// Supports plain `KEY=VALUE` lines with an optional `export ` prefix and
/// optional single or double quotes around the value. Comments and blank
/// lines are skipped. Anything else is rejected so a typo does not silently
/// vanish from the agent environment.
pub fn parse_env_file(path: &Path) -> Result<Vec<(String, String)>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let mut pairs = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((key, value)) = line.split_once('=') else {
            anyhow::bail!(
                "{}:{}: expected KEY=VALUE, got {line:?}",
                path.display(),
                lineno + 1
            );
        };

        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            anyhow::bail!("{}:{}: invalid key {key:?}", path.display(), lineno + 1);
        }

        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);

        pairs.push((key.to_string(), value.to_string()));
    }

    Ok(pairs)
}
