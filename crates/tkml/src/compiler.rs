// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Markup compiler seam and HTML page template.
//!
//! Turning rendered TKML markup into client-side HTML is the job of an
//! external compiler. The renderer only needs three things from it, which
//! [`MarkupCompiler`] names. [`PageTemplate`] then embeds its output in a
//! full HTML document.

use crate::error::Result;
use std::sync::atomic::{AtomicU64, Ordering};

/// Compiles rendered markup for the client runtime.
pub trait MarkupCompiler: Send + Sync {
    /// Compiles markup into the HTML placed inside the page container.
    fn compile(&self, markup: &str) -> Result<String>;

    /// Script the client runtime needs for the last compiled markup.
    fn runtime_script(&self) -> String;

    /// Identifier of the client runtime instance for the last compiled
    /// markup.
    fn instance_id(&self) -> String;
}

/// Compiler that embeds markup unchanged.
///
/// It emits no runtime script and hands out an increasing instance id per
/// compilation.
#[derive(Debug, Default)]
pub struct PassthroughCompiler {
    next_id: AtomicU64,
    last_id: AtomicU64,
}

impl PassthroughCompiler {
    /// Creates a passthrough compiler.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkupCompiler for PassthroughCompiler {
    fn compile(&self, markup: &str) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.last_id.store(id, Ordering::SeqCst);
        Ok(markup.to_string())
    }

    fn runtime_script(&self) -> String {
        String::new()
    }

    fn instance_id(&self) -> String {
        self.last_id.load(Ordering::SeqCst).to_string()
    }
}

/// Built-in page wrapper.
pub const DEFAULT_PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>TKML App</title>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <link rel="stylesheet" href="https://tkml.app/styles.min.css?{{version}}">
    <script src="https://tkml.app/tkml.min.js?{{version}}"></script>
</head>
<body>
    <div id="container" class="tkml-cont">{{content}}</div>
    <script>
        const tkml = new TKML(document.getElementById('container'), { dark: true, URLControl: true, instanceId: {{instanceId}} });
        {{js}}
    </script>
</body>
</html>
"#;

/// Default asset version substituted for `{{version}}`.
pub const DEFAULT_VERSION: &str = "19";

/// HTML wrapper with `{{content}}`, `{{js}}`, `{{instanceId}}` and
/// `{{version}}` placeholders.
#[derive(Debug, Clone)]
pub struct PageTemplate {
    template: String,
    version: String,
}

impl Default for PageTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_TEMPLATE, DEFAULT_VERSION)
    }
}

impl PageTemplate {
    /// Creates a template from its text and asset version.
    pub fn new(template: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            version: version.into(),
        }
    }

    /// The template text.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Fills the placeholders.
    ///
    /// Substitution is a single pass over the template, so placeholder
    /// text inside the substituted values is left alone. Unknown
    /// placeholders are kept verbatim.
    pub fn render(&self, content: &str, js: &str, instance_id: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + content.len() + js.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                rest = &rest[start..];
                break;
            };
            match &after[..end] {
                "content" => out.push_str(content),
                "js" => out.push_str(js),
                "instanceId" => out.push_str(instance_id),
                "version" => out.push_str(&self.version),
                _ => out.push_str(&rest[start..start + end + 4]),
            }
            rest = &after[end + 2..];
        }

        out.push_str(rest);
        out
    }

    /// Compiles `markup` and wraps the result in the page.
    pub fn compile_page(&self, compiler: &dyn MarkupCompiler, markup: &str) -> Result<String> {
        let html = compiler.compile(markup)?;
        Ok(self.render(&html, &compiler.runtime_script(), &compiler.instance_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_filled() {
        let template = PageTemplate::new("<v{{version}}>{{content}}|{{js}}|{{instanceId}}", "7");
        assert_eq!(template.render("<t/>", "run()", "3"), "<v7><t/>|run()|3");
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let template = PageTemplate::new("{{content}}/{{js}}", "1");
        assert_eq!(template.render("{{js}}", "x", "1"), "{{js}}/x");
    }

    #[test]
    fn test_unknown_and_unclosed_placeholders_are_kept() {
        let template = PageTemplate::new("{{other}} {{content}} {{open", "1");
        assert_eq!(template.render("c", "", "1"), "{{other}} c {{open");
    }

    #[test]
    fn test_passthrough_instance_ids_increase() {
        let compiler = PassthroughCompiler::new();
        let page = PageTemplate::default();

        let first = page.compile_page(&compiler, "<t>a</t>").unwrap();
        assert!(first.contains(r#"<div id="container" class="tkml-cont"><t>a</t></div>"#));
        assert!(first.contains("instanceId: 1 "));
        assert!(first.contains("styles.min.css?19"));

        page.compile_page(&compiler, "<t>b</t>").unwrap();
        assert_eq!(compiler.instance_id(), "2");
        assert_eq!(compiler.runtime_script(), "");
    }
}
