//! Heuristics for telling file content apart from model narration.
//!
//! Reasoning models often open with "Let me write the component..." before
//! the actual file. Each file type gets a small set of line prefixes that a
//! real file plausibly starts with; everything above the first such line is
//! treated as preamble.

use regex::Regex;

use super::types::file_extension;

const SCRIPT_STARTS: &[&str] = &[
    "import ",
    "import{",
    "export ",
    "'use client'",
    "\"use client\"",
    "'use server'",
    "\"use server\"",
    "'use strict'",
    "\"use strict\"",
    "const ",
    "let ",
    "var ",
    "function ",
    "async ",
    "class ",
    "interface ",
    "type ",
    "enum ",
    "declare ",
    "module.exports",
    "require(",
    "//",
    "/*",
    "@",
];

const CSS_STARTS: &[&str] = &["@", ":", ".", "#", "*", "/*", "html", "body"];

const PYTHON_STARTS: &[&str] = &[
    "import ", "from ", "def ", "async def ", "class ", "#", "\"\"\"", "'''", "@", "if __name__",
];

const RUST_STARTS: &[&str] = &[
    "use ", "mod ", "pub ", "fn ", "//", "#!", "#[", "struct ", "enum ", "impl ", "const ",
    "static ", "type ", "trait ", "extern ", "async fn ",
];

const SHELL_STARTS: &[&str] = &["#!", "#", "set ", "export "];

/// Whether `line` plausibly begins a file with the extension of `path`.
///
/// Unknown file types accept any non-blank line.
pub fn looks_like_content_start(path: &str, line: &str) -> bool {
    let line = line.trim_start();
    !line.is_empty() && start_rule(path, line).unwrap_or(true)
}

/// The per-type check, or `None` for types without one.
fn start_rule(path: &str, line: &str) -> Option<bool> {
    let matched = match file_extension(path).as_str() {
        "json" => line.starts_with('{') || line.starts_with('['),
        "ts" | "tsx" | "js" | "jsx" | "mjs" | "cjs" => starts_with_any(line, SCRIPT_STARTS),
        "css" | "scss" => starts_with_any(line, CSS_STARTS),
        "html" | "htm" => line.starts_with('<'),
        "md" | "mdx" => line.starts_with('#') || line.starts_with("---"),
        "py" => starts_with_any(line, PYTHON_STARTS),
        "rs" => starts_with_any(line, RUST_STARTS),
        "yaml" | "yml" => {
            line.starts_with('-') || line.starts_with('#') || is_key_line(line, ':')
        }
        "toml" => line.starts_with('[') || line.starts_with('#') || is_key_line(line, '='),
        "sh" | "bash" => starts_with_any(line, SHELL_STARTS),
        _ => return None,
    };
    Some(matched)
}

fn starts_with_any(line: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| line.starts_with(p))
}

/// `key: value` / `key = value` where the key is a bare identifier.
fn is_key_line(line: &str, separator: char) -> bool {
    let Some((key, _)) = line.split_once(separator) else {
        return false;
    };
    let key = key.trim_end();
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '"'))
}

/// Outcome of preamble stripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stripped {
    /// Content starting at the first plausible line.
    Content(String),
    /// Non-blank text was present but no line looked like file content.
    ThinkingText,
    /// Nothing but whitespace.
    Empty,
}

/// Remove a wrapping fenced block, if the text contains one.
///
/// The block runs from the first fence line to the last closing fence
/// after it (or the end of the text), so fences nested inside the file
/// survive. Nothing is unwrapped when a line above the first fence already
/// looks like the start of the file: the fence is then part of the content
/// (a docstring, a README section, a template literal).
pub fn unwrap_fenced_block<'a>(path: &str, text: &'a str) -> &'a str {
    let (Ok(opening), Ok(closing)) = (
        Regex::new(r"(?m)^[ \t]*```[^\n]*\n"),
        Regex::new(r"(?m)^[ \t]*```[ \t]*$"),
    ) else {
        return text;
    };
    let Some(open) = opening.find(text) else {
        return text;
    };

    let before = &text[..open.start()];
    if before.lines().any(|line| {
        let line = line.trim_start();
        !line.is_empty() && start_rule(path, line) == Some(true)
    }) {
        return text;
    }

    let rest = &text[open.end()..];
    let end = closing
        .find_iter(rest)
        .last()
        .map_or(rest.len(), |close| close.start());
    &rest[..end]
}

/// Unwrap fences, then drop lines until one plausibly starts the file.
pub fn strip_preamble(path: &str, text: &str) -> Stripped {
    let body = unwrap_fenced_block(path, text);
    if body.trim().is_empty() {
        return Stripped::Empty;
    }

    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if looks_like_content_start(path, line) {
            let content = body[offset..].trim_end();
            return Stripped::Content(format!("{}\n", content));
        }
        offset += line.len();
    }

    Stripped::ThinkingText
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_start() {
        assert!(looks_like_content_start("package.json", "{"));
        assert!(looks_like_content_start("data.json", "  [1, 2]"));
        assert!(!looks_like_content_start("package.json", "Here is the file:"));
    }

    #[test]
    fn test_script_starts() {
        for line in [
            "import React from 'react';",
            "export default function Page() {",
            "'use client'",
            "\"use client\";",
            "const x = 1;",
            "// header comment",
            "module.exports = {",
            "@Component({",
        ] {
            assert!(looks_like_content_start("app/page.tsx", line), "{}", line);
        }
        assert!(!looks_like_content_start("app/page.tsx", "Let me write the page."));
        assert!(!looks_like_content_start("index.js", "Okay, so the user wants"));
    }

    #[test]
    fn test_markup_and_style_starts() {
        assert!(looks_like_content_start("index.html", "<!DOCTYPE html>"));
        assert!(!looks_like_content_start("index.html", "This page has a header"));
        assert!(looks_like_content_start("styles.css", ".container {"));
        assert!(looks_like_content_start("styles.css", ":root {"));
        assert!(looks_like_content_start("styles.css", "body {"));
        assert!(!looks_like_content_start("styles.css", "We need some styles"));
        assert!(looks_like_content_start("README.md", "# Project"));
        assert!(!looks_like_content_start("README.md", "I'll write a readme"));
    }

    #[test]
    fn test_config_starts() {
        assert!(looks_like_content_start("config.yaml", "name: app"));
        assert!(looks_like_content_start("config.yml", "- item"));
        assert!(!looks_like_content_start("config.yaml", "Sure, here is the config: below"));
        assert!(looks_like_content_start("Cargo.toml", "[package]"));
        assert!(looks_like_content_start("Cargo.toml", "name = \"x\""));
        assert!(!looks_like_content_start("Cargo.toml", "Now the manifest"));
    }

    #[test]
    fn test_code_starts() {
        assert!(looks_like_content_start("main.py", "def main():"));
        assert!(looks_like_content_start("main.py", "from x import y"));
        assert!(!looks_like_content_start("main.py", "Thinking about structure"));
        assert!(looks_like_content_start("lib.rs", "use std::fmt;"));
        assert!(looks_like_content_start("lib.rs", "#![allow(dead_code)]"));
        assert!(!looks_like_content_start("lib.rs", "The crate needs"));
        assert!(looks_like_content_start("run.sh", "#!/bin/bash"));
        assert!(looks_like_content_start("run.sh", "set -euo pipefail"));
    }

    #[test]
    fn test_unknown_type_accepts_anything() {
        assert!(looks_like_content_start("Dockerfile", "Whatever comes first"));
        assert!(looks_like_content_start("notes.txt", "plain text"));
        assert!(!looks_like_content_start("notes.txt", "   "));
    }

    #[test]
    fn test_strip_preamble_drops_narration() {
        let raw = "Let me write this component.\nIt needs state.\n\nimport { useState } from 'react';\n\nexport default function App() {}\n";
        assert_eq!(
            strip_preamble("src/App.tsx", raw),
            Stripped::Content(
                "import { useState } from 'react';\n\nexport default function App() {}\n"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_strip_preamble_unwraps_fence() {
        let raw = "Here you go:\n```json\n{\n  \"name\": \"app\"\n}\n```\nHope this helps!";
        assert_eq!(
            strip_preamble("package.json", raw),
            Stripped::Content("{\n  \"name\": \"app\"\n}\n".to_string())
        );
    }

    #[test]
    fn test_strip_preamble_unterminated_fence() {
        let raw = "```css\nbody { margin: 0; }\n";
        assert_eq!(
            strip_preamble("styles.css", raw),
            Stripped::Content("body { margin: 0; }\n".to_string())
        );
    }

    #[test]
    fn test_markdown_keeps_inner_fences() {
        let raw = "# Setup\n\n```bash\nnpm install\n```\n";
        assert_eq!(
            strip_preamble("README.md", raw),
            Stripped::Content("# Setup\n\n```bash\nnpm install\n```\n".to_string())
        );

        let wrapped = "```markdown\n# Title\n```";
        assert_eq!(
            strip_preamble("README.md", wrapped),
            Stripped::Content("# Title\n".to_string())
        );
    }

    #[test]
    fn test_fence_inside_source_file_is_kept() {
        let raw = "import textwrap\n\nHELP = '''\n```bash\npip install todo\n```\n'''\n\n\ndef usage():\n    return textwrap.dedent(HELP)\n";
        assert_eq!(
            strip_preamble("todo/help.py", raw),
            Stripped::Content(raw.to_string())
        );

        let template = "const snippet = `\n```ts\nlet x = 1;\n```\n`;\nexport default snippet;\n";
        assert_eq!(
            strip_preamble("src/snippet.ts", template),
            Stripped::Content(template.to_string())
        );
    }

    #[test]
    fn test_wrapping_fence_keeps_nested_fences() {
        let raw = "Here is the file:\n```python\nimport os\nDOC = \"\"\"\n```\nexample\n```\n\"\"\"\n```\nThat's all.";
        assert_eq!(
            strip_preamble("doc.py", raw),
            Stripped::Content("import os\nDOC = \"\"\"\n```\nexample\n```\n\"\"\"\n".to_string())
        );
    }

    #[test]
    fn test_unknown_type_still_unwraps_after_narration() {
        let raw = "Sure, here it is:\n```\nKEY=value\n```\n";
        assert_eq!(
            strip_preamble(".env", raw),
            Stripped::Content("KEY=value\n".to_string())
        );
    }

    #[test]
    fn test_strip_preamble_thinking_only() {
        let raw = "Okay, the user wants a landing page.\nI should think about the layout first.";
        assert_eq!(strip_preamble("index.html", raw), Stripped::ThinkingText);
    }

    #[test]
    fn test_strip_preamble_empty() {
        assert_eq!(strip_preamble("a.ts", "  \n\n"), Stripped::Empty);
        assert_eq!(strip_preamble("a.ts", "```ts\n```"), Stripped::Empty);
    }
}
