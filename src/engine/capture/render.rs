//! Static pages rendered before capture: code screenshots and wrapped fragments

use std::fmt::Write;

use crate::core::utils::truncate_chars;

/// Longest output shown on a code screenshot
pub const MAX_OUTPUT_CHARS: usize = 2000;

/// Editor look used for code screenshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeTheme {
    Idle,
    Notepad,
    CodeBlocks,
}

struct Palette {
    background: &'static str,
    foreground: &'static str,
    gutter_background: &'static str,
    gutter_foreground: &'static str,
    title_background: &'static str,
    title_foreground: &'static str,
    output_background: &'static str,
    output_foreground: &'static str,
    font: &'static str,
}

impl CodeTheme {
    /// Unknown or missing names fall back to [`CodeTheme::Idle`]
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(|n| n.trim().to_lowercase()).as_deref() {
            Some("notepad") => CodeTheme::Notepad,
            Some("codeblocks") => CodeTheme::CodeBlocks,
            _ => CodeTheme::Idle,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CodeTheme::Idle => "idle",
            CodeTheme::Notepad => "notepad",
            CodeTheme::CodeBlocks => "codeblocks",
        }
    }

    fn palette(self) -> Palette {
        match self {
            CodeTheme::Idle => Palette {
                background: "#ffffff",
                foreground: "#000000",
                gutter_background: "#f0f0f0",
                gutter_foreground: "#808080",
                title_background: "#dcdcdc",
                title_foreground: "#000000",
                output_background: "#ffffff",
                output_foreground: "#0000c0",
                font: "'Courier New', monospace",
            },
            CodeTheme::Notepad => Palette {
                background: "#ffffff",
                foreground: "#000000",
                gutter_background: "#ffffff",
                gutter_foreground: "#a0a0a0",
                title_background: "#f3f3f3",
                title_foreground: "#1f1f1f",
                output_background: "#0c0c0c",
                output_foreground: "#cccccc",
                font: "Consolas, 'Lucida Console', monospace",
            },
            CodeTheme::CodeBlocks => Palette {
                background: "#1e1e1e",
                foreground: "#d4d4d4",
                gutter_background: "#2a2a2a",
                gutter_foreground: "#858585",
                title_background: "#3c3c3c",
                title_foreground: "#e0e0e0",
                output_background: "#000000",
                output_foreground: "#c0c0c0",
                font: "'DejaVu Sans Mono', monospace",
            },
        }
    }
}

/// Escape text for inclusion in HTML element content or attributes
pub fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Trim trailing whitespace, drop blank lines and cap the length
pub fn clean_output(output: &str) -> String {
    let cleaned = output
        .trim()
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    truncate_chars(&cleaned, MAX_OUTPUT_CHARS, " ...")
}

/// Editor-like page showing numbered source above its output
pub fn render_code_page(source: &str, output: &str, theme: CodeTheme, filename: &str) -> String {
    let p = theme.palette();

    let mut gutter = String::new();
    let mut code = String::new();
    for (i, line) in source.lines().enumerate() {
        let _ = writeln!(gutter, "{}", i + 1);
        let _ = writeln!(code, "{}", html_escape(line));
    }
    if code.is_empty() {
        gutter.push_str("1\n");
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{filename}</title>
<style>
  body {{ margin: 0; background: {bg}; color: {fg}; font-family: {font}; font-size: 14px; }}
  .title {{ background: {title_bg}; color: {title_fg}; padding: 6px 12px; font-family: Arial, sans-serif; font-size: 13px; }}
  .editor {{ display: flex; }}
  .gutter {{ background: {gutter_bg}; color: {gutter_fg}; text-align: right; padding: 8px; user-select: none; }}
  .code {{ padding: 8px 12px; flex: 1; }}
  pre {{ margin: 0; font-family: inherit; line-height: 1.45; white-space: pre; }}
  .output {{ background: {out_bg}; color: {out_fg}; padding: 10px 12px; border-top: 1px solid {gutter_fg}; }}
  .output pre {{ white-space: pre-wrap; word-break: break-all; }}
</style>
</head>
<body class="theme-{theme}">
<div class="title">{filename}</div>
<div class="editor"><pre class="gutter">{gutter}</pre><pre class="code">{code}</pre></div>
<div class="output"><pre>{output}</pre></div>
</body>
</html>
"#,
        filename = html_escape(filename),
        theme = theme.name(),
        bg = p.background,
        fg = p.foreground,
        font = p.font,
        title_bg = p.title_background,
        title_fg = p.title_foreground,
        gutter_bg = p.gutter_background,
        gutter_fg = p.gutter_foreground,
        out_bg = p.output_background,
        out_fg = p.output_foreground,
        gutter = gutter,
        code = code,
        output = html_escape(&clean_output(output)),
    )
}

/// Whether markup is already a complete document
pub fn is_full_document(markup: &str) -> bool {
    let head = markup.trim_start().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

/// Wrap a fragment in a minimal document with the optional stylesheet and
/// script embedded. Full documents keep their structure; the extras are
/// inserted before `</head>` and `</body>`.
pub fn wrap_fragment(markup: &str, stylesheet: Option<&str>, script: Option<&str>) -> String {
    let style = stylesheet
        .filter(|css| !css.trim().is_empty())
        .map(|css| format!("<style>\n{}\n</style>\n", css));
    let script = script
        .filter(|js| !js.trim().is_empty())
        .map(|js| format!("<script>\n{}\n</script>\n", js));

    if is_full_document(markup) {
        let mut document = markup.to_string();
        if let Some(style) = style {
            insert_before_close(&mut document, "</head>", &style);
        }
        if let Some(script) = script {
            insert_before_close(&mut document, "</body>", &script);
        }
        return document;
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<style>
  body {{ margin: 0; padding: 20px; font-family: Arial, sans-serif; background: #fff; color: #333; line-height: 1.6; }}
</style>
{}</head>
<body>
{}
{}</body>
</html>
"#,
        style.unwrap_or_default(),
        markup,
        script.unwrap_or_default()
    )
}

/// Insert `snippet` before the last `tag` (case-insensitive), or append it
fn insert_before_close(document: &mut String, tag: &str, snippet: &str) {
    match document.to_ascii_lowercase().rfind(tag) {
        Some(pos) => document.insert_str(pos, snippet),
        None => document.push_str(snippet),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theme_fallback() {
        assert_eq!(CodeTheme::from_name(Some("Notepad")), CodeTheme::Notepad);
        assert_eq!(CodeTheme::from_name(Some("codeblocks")), CodeTheme::CodeBlocks);
        assert_eq!(CodeTheme::from_name(Some("vscode")), CodeTheme::Idle);
        assert_eq!(CodeTheme::from_name(None), CodeTheme::Idle);
    }

    #[test]
    fn test_clean_output() {
        assert_eq!(clean_output("\n  a  \n\n b\t\n\n"), "a\n b");
        assert_eq!(clean_output(""), "");

        let long = "x".repeat(MAX_OUTPUT_CHARS + 10);
        let cleaned = clean_output(&long);
        assert!(cleaned.ends_with(" ..."));
        assert_eq!(cleaned.chars().count(), MAX_OUTPUT_CHARS + 4);
    }

    #[test]
    fn test_code_page_escapes_and_numbers_lines() {
        let page = render_code_page(
            "if a < b:\n    print(\"<b>\")",
            "<b>\n",
            CodeTheme::Idle,
            "main.py",
        );
        assert!(page.contains("if a &lt; b:"));
        assert!(page.contains("print(&quot;&lt;b&gt;&quot;)"));
        assert!(page.contains("<pre class=\"gutter\">1\n2\n</pre>"));
        assert!(page.contains("<div class=\"output\"><pre>&lt;b&gt;</pre></div>"));
        assert!(page.contains("theme-idle"));
    }

    #[test]
    fn test_wrap_fragment() {
        let wrapped = wrap_fragment("<h1>Hi</h1>", None, None);
        assert!(wrapped.starts_with("<!DOCTYPE html>"));
        assert!(wrapped.contains("<body>\n<h1>Hi</h1>\n</body>"));

        let full = "  <!doctype html><html><body>x</body></html>";
        assert_eq!(wrap_fragment(full, None, None), full);
        assert_eq!(wrap_fragment("<HTML></HTML>", None, Some("  ")), "<HTML></HTML>");
    }

    #[test]
    fn test_wrap_fragment_embeds_assets() {
        let wrapped = wrap_fragment("<p id=\"x\">a</p>", Some("p { color: red; }"), Some("console.log(1);"));
        let style = wrapped.find("<style>\np { color: red; }\n</style>").unwrap();
        assert!(style < wrapped.find("</head>").unwrap());
        let script = wrapped.find("<script>\nconsole.log(1);\n</script>").unwrap();
        assert!(wrapped.find("<p id=\"x\">").unwrap() < script);
        assert!(script < wrapped.find("</body>").unwrap());

        let full = "<!DOCTYPE html><HTML><HEAD></HEAD><BODY><p>a</p></BODY></HTML>";
        assert_eq!(
            wrap_fragment(full, Some("b{}"), Some("go()")),
            "<!DOCTYPE html><HTML><HEAD><style>\nb{}\n</style>\n</HEAD><BODY><p>a</p><script>\ngo()\n</script>\n</BODY></HTML>"
        );
    }
}
