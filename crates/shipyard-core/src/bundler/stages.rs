//! Built-in transform stages and the registry that names them.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::loader::{Stage, StageError, StageInput, StageOutput, ANY_CONTENT, SCRIPT_CONTENT};

/// Stages addressable by name from configuration.
#[derive(Default, Clone)]
pub struct StageRegistry {
    stages: FxHashMap<String, Arc<dyn Stage>>,
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.stages.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("StageRegistry").field("stages", &names).finish()
    }
}

impl StageRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `script`, `json`, `css`, `style-inject` and `raw`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ScriptStage));
        registry.register(Arc::new(JsonStage));
        registry.register(Arc::new(CssStage));
        registry.register(Arc::new(StyleInjectStage));
        registry.register(Arc::new(RawStage));
        registry
    }

    /// Add or replace a stage under its own name.
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.name().to_string(), stage);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Stage>> {
        self.stages.get(name).cloned()
    }
}

/// Script pass-through. Stands in for an external compiler.
pub struct ScriptStage;

impl Stage for ScriptStage {
    fn name(&self) -> &str {
        "script"
    }

    fn accepts(&self) -> &[&'static str] {
        &["js", "mjs", "cjs"]
    }

    fn emits(&self) -> &'static str {
        SCRIPT_CONTENT
    }

    fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        Ok(StageOutput::new(input.content, input.source_map))
    }
}

/// JSON document to a default export.
pub struct JsonStage;

impl Stage for JsonStage {
    fn name(&self) -> &str {
        "json"
    }

    fn accepts(&self) -> &[&'static str] {
        &["json"]
    }

    fn emits(&self) -> &'static str {
        SCRIPT_CONTENT
    }

    fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        let text = input.content.trim();
        serde_json::from_str::<serde_json::Value>(text).map_err(|e| {
            StageError::new(format!(
                "invalid JSON at line {} column {}: {e}",
                e.line(),
                e.column()
            ))
        })?;
        Ok(StageOutput::new(format!("export default {text};"), None))
    }
}

/// Strip comments and collapse whitespace in a stylesheet.
pub struct CssStage;

impl Stage for CssStage {
    fn name(&self) -> &str {
        "css"
    }

    fn accepts(&self) -> &[&'static str] {
        &["css"]
    }

    fn emits(&self) -> &'static str {
        "css"
    }

    fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        if let Some(line) = unbalanced_brace_line(&input.content) {
            return Err(StageError::new(format!("unbalanced '}}' on line {line}")));
        }
        Ok(StageOutput::new(minify_css(&input.content), input.source_map))
    }
}

/// Stylesheet to a script that inserts a `<style>` element when evaluated.
pub struct StyleInjectStage;

impl Stage for StyleInjectStage {
    fn name(&self) -> &str {
        "style-inject"
    }

    fn accepts(&self) -> &[&'static str] {
        &["css"]
    }

    fn emits(&self) -> &'static str {
        SCRIPT_CONTENT
    }

    fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        let css = serde_json::Value::String(input.content).to_string();
        Ok(StageOutput::new(
            format!(
                "var css = {css};\n\
                 if (typeof document !== \"undefined\") {{\n  \
                 var style = document.createElement(\"style\");\n  \
                 style.setAttribute(\"data-shipyard\", \"\");\n  \
                 style.appendChild(document.createTextNode(css));\n  \
                 document.head.appendChild(style);\n\
                 }}\n\
                 export default css;\n"
            ),
            input.source_map,
        ))
    }
}

/// Any text as a string export.
pub struct RawStage;

impl Stage for RawStage {
    fn name(&self) -> &str {
        "raw"
    }

    fn accepts(&self) -> &[&'static str] {
        &[ANY_CONTENT]
    }

    fn emits(&self) -> &'static str {
        SCRIPT_CONTENT
    }

    fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        let text = serde_json::Value::String(input.content).to_string();
        Ok(StageOutput::new(format!("export default {text};"), None))
    }
}

/// Line of the first `}` without a matching `{`, ignoring comments.
fn unbalanced_brace_line(css: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut line = 1;
    let mut chars = css.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        line += 1;
                    }
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return Some(line);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

fn minify_css(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = ' ';
            for inner in chars.by_ref() {
                if prev == '*' && inner == '/' {
                    break;
                }
                prev = inner;
            }
            continue;
        }

        if c.is_whitespace() {
            pending_space = true;
            continue;
        }

        let tight = |ch: char| matches!(ch, '{' | '}' | ';' | ':' | ',' | '>');
        if pending_space && !out.is_empty() && !tight(c) && !out.ends_with(tight) {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn run(stage: &dyn Stage, content: &str) -> Result<StageOutput, StageError> {
        stage.run(StageInput {
            path: Path::new("/app/file"),
            content: content.to_string(),
            source_map: Some("map".to_string()),
            options: &serde_json::Value::Null,
        })
    }

    #[test]
    fn test_builtins_registered() {
        let registry = StageRegistry::with_builtins();
        for name in ["script", "json", "css", "style-inject", "raw"] {
            assert_eq!(registry.get(name).unwrap().name(), name);
        }
        assert!(registry.get("vue").is_none());
    }

    #[test]
    fn test_script_passes_source_map_through() {
        let out = run(&ScriptStage, "export const a = 1;").unwrap();
        assert_eq!(out.content, "export const a = 1;");
        assert_eq!(out.source_map.as_deref(), Some("map"));
    }

    #[test]
    fn test_json_stage() {
        let out = run(&JsonStage, "{\"key\": \"value\"}\n").unwrap();
        assert_eq!(out.content, "export default {\"key\": \"value\"};");

        let err = run(&JsonStage, "{ \"key\": }").unwrap_err();
        assert!(err.message.contains("line 1"));
    }

    #[test]
    fn test_css_minify() {
        let css = "
            .foo  >  .bar {
                color: red;
                /* comment */
                margin: 10px  0;
            }
        ";
        let out = run(&CssStage, css).unwrap();
        assert_eq!(out.content, ".foo>.bar{color:red;margin:10px 0;}");
    }

    #[test]
    fn test_css_rejects_stray_brace() {
        let err = run(&CssStage, "a { color: red; }\n}").unwrap_err();
        assert!(err.message.contains("line 2"));
    }

    #[test]
    fn test_style_inject_and_raw() {
        let out = run(&StyleInjectStage, "a{color:\"red\"}").unwrap();
        assert!(out.content.starts_with("var css = \"a{color:\\\"red\\\"}\";"));
        assert!(out.content.contains("document.head.appendChild(style)"));
        assert!(out.content.ends_with("export default css;\n"));

        let out = run(&RawStage, "line one\nline two").unwrap();
        assert_eq!(out.content, "export default \"line one\\nline two\";");
    }
}
