//! Module-syntax lowering for chunk factories.
//!
//! Import and export statements become `require` calls and `exports`
//! assignments, dynamic `import()` becomes `load()`, and every dependency
//! specifier literal is replaced by its module id. Statements are recognized
//! line by line and split at `;`; a brace list may span several
//! lines.

use std::sync::OnceLock;

use regex_lite::Regex;

use super::graph::{Dependency, ModuleId};

/// Lower `content` into the body of a module factory.
#[must_use]
pub fn lower_module(content: &str, dependencies: &[Dependency]) -> String {
    let id_of = |spec: &str| {
        dependencies
            .iter()
            .find(|d| d.specifier == spec)
            .map(|d| d.target)
    };

    let mut body = String::with_capacity(content.len() + 64);
    let mut trailing: Vec<String> = Vec::new();
    let mut has_exports = false;
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if !is_module_statement(trimmed) {
            body.push_str(line);
            body.push('\n');
            continue;
        }

        let mut text = trimmed.to_string();
        let braced_list = text.starts_with("import")
            || text.trim_start_matches("export").trim_start().starts_with('{');
        while braced_list && text.contains('{') && !text.contains('}') {
            let Some(next) = lines.next() else { break };
            text.push(' ');
            text.push_str(next.trim());
        }

        let mut lowered = Vec::new();
        for statement in split_statements(&text) {
            let out = if statement.starts_with("import") && is_module_statement(statement) {
                lower_import(statement, &id_of)
            } else if is_module_statement(statement) {
                has_exports = true;
                lower_export(statement, &id_of, &mut trailing)
            } else {
                None
            };
            let out = out.unwrap_or_else(|| statement.to_string());
            if !out.is_empty() {
                lowered.push(out);
            }
        }

        let indent = &line[..line.len() - line.trim_start().len()];
        if !lowered.is_empty() {
            body.push_str(indent);
            body.push_str(&lowered.join(" "));
        }
        body.push('\n');
    }

    for export in trailing {
        body.push_str(&export);
        body.push('\n');
    }
    if has_exports {
        body.insert_str(0, "Object.defineProperty(exports, \"__esModule\", { value: true });\n");
    }

    let body = rewrite_specifiers(&body, dependencies);
    dynamic_import_re()
        .replace_all(&body, "load(\"$1\")")
        .trim_end()
        .to_string()
}

fn dynamic_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\bimport\s*\(\s*"(\d+)"\s*\)"#).unwrap_or_else(|e| unreachable!("{e}"))
    })
}

fn is_module_statement(trimmed: &str) -> bool {
    let import = trimmed
        .strip_prefix("import")
        .is_some_and(|rest| rest.starts_with([' ', '{', '*', '"', '\'']) && !rest.trim_start().starts_with('('));
    let export = trimmed
        .strip_prefix("export")
        .is_some_and(|rest| rest.starts_with([' ', '{', '*']));
    import || export
}

fn require_expr(spec: &str, id_of: &impl Fn(&str) -> Option<ModuleId>) -> String {
    match id_of(spec) {
        Some(id) => format!("require(\"{id}\")"),
        None => format!("require({})", quoted(spec)),
    }
}

fn quoted(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// The quoted literal at the start of `text`, without quotes.
fn leading_literal(text: &str) -> Option<&str> {
    let text = text.trim_start();
    let quote = text.chars().next().filter(|c| matches!(c, '"' | '\''))?;
    let rest = &text[1..];
    rest.find(quote).map(|end| &rest[..end])
}

/// Split `text` after each `;` outside brackets and literals.
fn split_statements(text: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                c if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                statements.push(text[start..=i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        statements.push(tail);
    }
    statements
}

/// Split `clause from './mod'` at the last `from` keyword.
fn split_from(text: &str) -> Option<(&str, &str)> {
    text.rmatch_indices("from").find_map(|(idx, _)| {
        let spec = leading_literal(&text[idx + 4..])?;
        Some((text[..idx].trim(), spec))
    })
}

/// `{ a, b as c }` to `{ a, b: c }`.
fn destructure(braces: &str) -> String {
    braces.replace(" as ", ": ")
}

fn lower_import(statement: &str, id_of: &impl Fn(&str) -> Option<ModuleId>) -> Option<String> {
    let rest = statement.strip_prefix("import")?.trim_start();

    if let Some(spec) = leading_literal(rest) {
        return Some(format!("{};", require_expr(spec, id_of)));
    }

    let (clause, spec) = split_from(rest)?;
    let required = require_expr(spec, id_of);

    let (default, named) = match clause.find([',']) {
        Some(idx) if !clause[..idx].contains('{') => {
            (Some(clause[..idx].trim()), Some(clause[idx + 1..].trim()))
        }
        _ if clause.starts_with('{') || clause.starts_with('*') => (None, Some(clause)),
        _ => (Some(clause), None),
    };

    let named_binding = |named: &str, source: &str| -> Option<String> {
        if let Some(ns) = named.strip_prefix('*') {
            let ns = ns.trim().strip_prefix("as")?.trim();
            Some(format!("{ns} = {source}"))
        } else {
            Some(format!("{} = {source}", destructure(named)))
        }
    };

    match (default, named) {
        (Some(default), None) => Some(format!("var {default} = require.interop({required});")),
        (None, Some(named)) => Some(format!("var {};", named_binding(named, &required)?)),
        (Some(default), Some(named)) => {
            let temp = format!("__dep{}", id_of(spec).map_or_else(String::new, |id| id.to_string()));
            Some(format!(
                "var {temp} = {required}, {default} = require.interop({temp}), {};",
                named_binding(named, &temp)?
            ))
        }
        (None, None) => None,
    }
}

fn lower_export(
    statement: &str,
    id_of: &impl Fn(&str) -> Option<ModuleId>,
    trailing: &mut Vec<String>,
) -> Option<String> {
    let rest = statement.strip_prefix("export")?.trim_start();

    if let Some(value) = rest.strip_prefix("default ") {
        return Some(format!("exports.default = {value}"));
    }

    if let Some(star) = rest.strip_prefix('*') {
        let (_, spec) = split_from(star)?;
        return Some(format!("require.reexport(exports, {});", require_expr(spec, id_of)));
    }

    if rest.starts_with('{') {
        let end = rest.find('}')?;
        let names: Vec<(&str, &str)> = rest[1..end]
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| match n.split_once(" as ") {
                Some((local, exported)) => (local.trim(), exported.trim()),
                None => (n, n),
            })
            .collect();

        return Some(match split_from(&rest[end + 1..]) {
            Some((_, spec)) => {
                let source = require_expr(spec, id_of);
                names
                    .iter()
                    .map(|(local, exported)| format!("exports.{exported} = {source}.{local};"))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            None => {
                trailing.extend(
                    names
                        .iter()
                        .map(|(local, exported)| format!("exports.{exported} = {local};")),
                );
                String::new()
            }
        });
    }

    let name = declared_name(rest)?;
    trailing.push(format!("exports.{name} = {name};"));
    Some(rest.to_string())
}

/// Name bound by `const x`, `function x`, `async function* x`, `class x`...
fn declared_name(declaration: &str) -> Option<&str> {
    let mut rest = declaration;
    for keyword in ["async ", "function", "class ", "const ", "let ", "var "] {
        if let Some(after) = rest.strip_prefix(keyword) {
            rest = after.trim_start().trim_start_matches('*').trim_start();
        }
    }
    if rest.len() == declaration.len() {
        return None;
    }
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

/// Replace each specifier literal that names a dependency with the quoted id
/// of its target module. Only literals in `from`, `import`, `import(` and
/// `require(` position are specifiers; everything else is copied verbatim.
#[must_use]
pub fn rewrite_specifiers(content: &str, dependencies: &[Dependency]) -> String {
    if dependencies.is_empty() {
        return content.to_string();
    }

    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find(['"', '\'', '`']) {
        out.push_str(&rest[..start]);
        let quote = char::from(rest.as_bytes()[start]);
        let body = &rest[start + 1..];
        let (len, terminated) = literal_end(body, quote);
        let literal = &body[..len];

        if !terminated {
            out.push(quote);
            out.push_str(literal);
            rest = &body[len..];
            continue;
        }

        let dependency = if in_specifier_position(&out) {
            dependencies.iter().find(|d| d.specifier == literal)
        } else {
            None
        };
        match dependency {
            Some(dep) => out.push_str(&format!("\"{}\"", dep.target)),
            None => {
                out.push(quote);
                out.push_str(literal);
                out.push(quote);
            }
        }
        rest = &body[len + 1..];
    }
    out.push_str(rest);
    out
}

/// Whether a literal starting right after `before` is a module specifier.
fn in_specifier_position(before: &str) -> bool {
    let before = before.trim_end();
    let (before, keywords): (&str, &[&str]) = match before.strip_suffix('(') {
        Some(call) => (call.trim_end(), &["require", "import"][..]),
        None => (before, &["from", "import"][..]),
    };
    keywords.iter().any(|keyword| {
        before.strip_suffix(keyword).is_some_and(|head| {
            !head
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '.'))
        })
    })
}

/// Length of the literal body before its closing `quote`, and whether it was
/// closed. Non-template literals stop at an unescaped newline.
fn literal_end(body: &str, quote: char) -> (usize, bool) {
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            c if c == quote => return (i, true),
            '\n' if quote != '`' => return (i, false),
            _ => {}
        }
    }
    (body.len(), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps() -> Vec<Dependency> {
        vec![
            Dependency {
                specifier: "./util".to_string(),
                target: 1,
                dynamic: false,
            },
            Dependency {
                specifier: "./Page".to_string(),
                target: 2,
                dynamic: true,
            },
            Dependency {
                specifier: "vue".to_string(),
                target: 3,
                dynamic: false,
            },
        ]
    }

    #[test]
    fn test_imports() {
        let source = "import Vue from 'vue';\n\
                      import { a, b as c } from './util';\n\
                      import * as util from './util';\n\
                      import './util';\n\
                      import Vue2, { set } from \"vue\";";
        assert_eq!(
            lower_module(source, &deps()),
            "var Vue = require.interop(require(\"3\"));\n\
             var { a, b: c } = require(\"1\");\n\
             var util = require(\"1\");\n\
             require(\"1\");\n\
             var __dep3 = require(\"3\"), Vue2 = require.interop(__dep3), { set } = __dep3;"
        );
    }

    #[test]
    fn test_multiline_import() {
        let source = "import {\n  a,\n  b\n} from './util';\nconsole.log(a, b);";
        assert_eq!(
            lower_module(source, &deps()),
            "var { a, b } = require(\"1\");\nconsole.log(a, b);"
        );
    }

    #[test]
    fn test_exports() {
        let source = "export const x = 1;\n\
                      export function f() {}\n\
                      export async function* g() {}\n\
                      export class K {}\n\
                      const y = 2;\n\
                      export { y as why };\n\
                      export { a as alpha } from './util';\n\
                      export * from './util';\n\
                      export default { x };";
        assert_eq!(
            lower_module(source, &deps()),
            "Object.defineProperty(exports, \"__esModule\", { value: true });\n\
             const x = 1;\n\
             function f() {}\n\
             async function* g() {}\n\
             class K {}\n\
             const y = 2;\n\
             \n\
             exports.alpha = require(\"1\").a;\n\
             require.reexport(exports, require(\"1\"));\n\
             exports.default = { x };\n\
             exports.x = x;\n\
             exports.f = f;\n\
             exports.g = g;\n\
             exports.K = K;\n\
             exports.why = y;"
        );
    }

    #[test]
    fn test_dynamic_import_and_require() {
        let source = "const Page = () => import('./Page');\nconst u = require('./util');\nconst s = 'import x from \"./util\"';";
        assert_eq!(
            lower_module(source, &deps()),
            "const Page = () => load(\"2\");\nconst u = require(\"1\");\nconst s = 'import x from \"./util\"';"
        );
    }

    #[test]
    fn test_from_inside_specifier() {
        let deps = vec![Dependency {
            specifier: "./from-here".to_string(),
            target: 4,
            dynamic: false,
        }];
        assert_eq!(
            lower_module("import x from './from-here';", &deps),
            "var x = require.interop(require(\"4\"));"
        );
    }

    #[test]
    fn test_rewrite_specifiers() {
        let source = "import u from './util';\nconst p = import(\"./Page\");\nconst s = 'it\\'s ./util';\nconst t = `./utilx`;";
        assert_eq!(
            rewrite_specifiers(source, &deps()),
            "import u from \"1\";\nconst p = import(\"2\");\nconst s = 'it\\'s ./util';\nconst t = `./utilx`;"
        );
    }

    #[test]
    fn test_plain_strings_equal_to_a_specifier_are_kept() {
        let source = "const label = './util';\nlog('vue', require('vue'), x.require('./util'));\nimport './util';";
        assert_eq!(
            rewrite_specifiers(source, &deps()),
            "const label = './util';\nlog('vue', require(\"3\"), x.require('./util'));\nimport \"1\";"
        );
    }

    #[test]
    fn test_several_statements_on_one_line() {
        let deps = vec![
            Dependency {
                specifier: "./a".to_string(),
                target: 1,
                dynamic: false,
            },
            Dependency {
                specifier: "./b".to_string(),
                target: 2,
                dynamic: false,
            },
        ];
        let source = "import x from './a'; import y from './b'; console.log(x, y);\n\
                      export const n = 1; export default { n };";
        assert_eq!(
            lower_module(source, &deps),
            "Object.defineProperty(exports, \"__esModule\", { value: true });\n\
             var x = require.interop(require(\"1\")); var y = require.interop(require(\"2\")); console.log(x, y);\n\
             const n = 1; exports.default = { n };\n\
             exports.n = n;"
        );
    }

    #[test]
    fn test_split_statements() {
        assert_eq!(
            split_statements("import a from 'x;y'; export function f() { a; b; } g();"),
            vec!["import a from 'x;y';", "export function f() { a; b; } g();"]
        );
    }
}
