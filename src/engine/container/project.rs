//! Project tree materialization
//!
//! React and Vue projects are served by Vite. A scaffold provides the manifest,
//! dev-server config, host page and a default root component; caller files
//! replace scaffold files with the same path.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::json;
use tokio::fs;

use crate::core::utils::{is_safe_path, normalize_path};
use crate::core::Language;

/// Markup-like syntax that only JSX allows in a script
const JSX_SYNTAX: &str =
    r"return\s*\(?\s*<[A-Za-z>]|</[A-Za-z][\w.]*\s*>|<[A-Za-z][\w.]*(\s+[^<>]*)?/>|</>";

/// Static and dynamic imports of a relative module specifier
const RELATIVE_IMPORT: &str = r#"(\bfrom\s*|\bimport\s*\(?\s*)(['"])(\.\.?/[^'"]+)['"]"#;

const VITE_CONFIG: &str = r#"import { defineConfig } from 'vite'
import plugin from '__PLUGIN_PACKAGE__'

const extraHosts = (process.env.ALLOWED_HOSTS || '')
  .split(',')
  .map((h) => h.trim())
  .filter(Boolean)

export default defineConfig({
  plugins: [plugin()],
  server: {
    host: '0.0.0.0',
    port: Number(process.env.PORT || 5173),
    strictPort: true,
    allowedHosts: ['localhost', '127.0.0.1', ...extraHosts],
  },
})
"#;

/// Files every project of `language` starts from
pub fn scaffold(language: Language) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    let (plugin, dependencies, mount_id, entry) = match language {
        Language::React => (
            "@vitejs/plugin-react",
            json!({ "react": "^18.3.1", "react-dom": "^18.3.1" }),
            "root",
            "/src/main.jsx",
        ),
        Language::Vue => (
            "@vitejs/plugin-vue",
            json!({ "vue": "^3.4.0" }),
            "app",
            "/src/main.js",
        ),
        other => anyhow::bail!("{} is not served from a project", other),
    };

    let mut dev_dependencies = serde_json::Map::new();
    dev_dependencies.insert(plugin.to_string(), json!("^4.3.0"));
    dev_dependencies.insert("vite".to_string(), json!("^5.4.0"));

    let manifest = json!({
        "name": "codeshot-project",
        "private": true,
        "version": "0.0.0",
        "type": "module",
        "scripts": { "dev": "vite" },
        "dependencies": dependencies,
        "devDependencies": dev_dependencies,
    });
    files.insert(
        "package.json".to_string(),
        serde_json::to_string_pretty(&manifest)?,
    );
    files.insert(
        "vite.config.js".to_string(),
        VITE_CONFIG.replace("__PLUGIN_PACKAGE__", plugin),
    );
    files.insert(
        "index.html".to_string(),
        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n  <head>\n    <meta charset=\"UTF-8\" />\n    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\" />\n    <title>App</title>\n  </head>\n  <body>\n    <div id=\"{}\"></div>\n    <script type=\"module\" src=\"{}\"></script>\n  </body>\n</html>\n",
            mount_id, entry
        ),
    );

    match language {
        Language::React => {
            files.insert(
                "src/main.jsx".to_string(),
                "import React from 'react'\nimport ReactDOM from 'react-dom/client'\nimport App from './App.jsx'\n\nReactDOM.createRoot(document.getElementById('root')).render(\n  <React.StrictMode>\n    <App />\n  </React.StrictMode>,\n)\n".to_string(),
            );
            files.insert(
                "src/App.jsx".to_string(),
                "export default function App() {\n  return <h1>Hello, world</h1>\n}\n".to_string(),
            );
        }
        _ => {
            files.insert(
                "src/main.js".to_string(),
                "import { createApp } from 'vue'\nimport App from './App.vue'\n\ncreateApp(App).mount('#app')\n".to_string(),
            );
            files.insert(
                "src/App.vue".to_string(),
                "<template>\n  <h1>Hello, world</h1>\n</template>\n".to_string(),
            );
        }
    }

    Ok(files)
}

/// Selector of the node the framework mounts into
pub fn mount_selector(language: Language) -> Option<&'static str> {
    match language {
        Language::React => Some("#root"),
        Language::Vue => Some("#app"),
        _ => None,
    }
}

/// Rewrites caller files so the dev server picks the right compiler
pub struct ProjectLayout {
    jsx_syntax: Regex,
    relative_import: Regex,
}

impl ProjectLayout {
    pub fn new() -> Result<Self> {
        Ok(Self {
            jsx_syntax: Regex::new(JSX_SYNTAX).context("Invalid JSX pattern")?,
            relative_import: Regex::new(RELATIVE_IMPORT).context("Invalid import pattern")?,
        })
    }

    /// Normalize caller paths and give JSX-bearing `.js` files a `.jsx` extension,
    /// rewriting relative imports that point at renamed files.
    pub fn normalize_files(
        &self,
        language: Language,
        files: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let mut renamed = BTreeSet::new();
        let mut normalized = BTreeMap::new();

        for (path, content) in files {
            if !is_safe_path(path) {
                anyhow::bail!("Unsafe project path: {}", path);
            }
            let mut path = normalize_path(path);
            if language == Language::React
                && path.ends_with(".js")
                && self.jsx_syntax.is_match(content)
            {
                renamed.insert(path.clone());
                path.push('x');
            }
            normalized.insert(path, content.clone());
        }

        if renamed.is_empty() {
            return Ok(normalized);
        }

        Ok(normalized
            .into_iter()
            .map(|(path, content)| {
                let content = self.rewrite_imports(&path, &content, &renamed);
                (path, content)
            })
            .collect())
    }

    fn rewrite_imports(&self, importer: &str, content: &str, renamed: &BTreeSet<String>) -> String {
        self.relative_import
            .replace_all(content, |caps: &regex::Captures| {
                let spec = &caps[3];
                match resolve_relative(importer, spec) {
                    Some(target) if renamed.contains(&target) => {
                        format!("{}{}{}x{}", &caps[1], &caps[2], spec, &caps[2])
                    }
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Write scaffold plus caller files into `dir`
    pub async fn materialize(
        &self,
        language: Language,
        files: &BTreeMap<String, String>,
        dir: &Path,
    ) -> Result<BTreeMap<String, String>> {
        let mut tree = scaffold(language)?;
        tree.extend(self.normalize_files(language, files)?);
        write_tree(&tree, dir).await?;
        Ok(tree)
    }
}

/// Write `files` under `dir`, creating parent directories as needed.
/// Unsafe paths are refused.
pub async fn write_tree(files: &BTreeMap<String, String>, dir: &Path) -> Result<()> {
    for (path, content) in files {
        if !is_safe_path(path) {
            anyhow::bail!("Unsafe project path: {}", path);
        }
        let target = dir.join(normalize_path(path));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory for {}", path))?;
        }
        fs::write(&target, content)
            .await
            .with_context(|| format!("Failed to write {}", path))?;
    }
    Ok(())
}

/// Resolve `spec` relative to the directory of `importer`, both project-relative
fn resolve_relative(importer: &str, spec: &str) -> Option<String> {
    let mut parts: Vec<&str> = importer.split('/').collect();
    parts.pop();
    for segment in spec.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}
