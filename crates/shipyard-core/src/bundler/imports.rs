//! Dependency extraction for script content.
//!
//! A character scanner, not a parser. It recognizes:
//!
//! - `import x from "./mod"`, `import "./mod"`, `import * as ns from "./mod"`
//! - `export { x } from "./mod"`, `export * from "./mod"`
//! - `require("./mod")`
//! - `import("./mod")` (dynamic, marks a split point)
//!
//! String literals, template literals and comments are skipped so that
//! import-looking text inside them is ignored. Only literal specifiers count.

/// How a dependency is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import ... from`, `export ... from`, bare `import "x"`.
    Static,
    /// `require("x")`.
    Require,
    /// `import("x")`.
    Dynamic,
}

impl ImportKind {
    #[must_use]
    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::Dynamic)
    }
}

/// A dependency reference found in script content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Specifier exactly as written.
    pub specifier: String,
    pub kind: ImportKind,
    /// 1-indexed line of the first occurrence.
    pub line: u32,
}

/// Extract dependency references in first-appearance order.
///
/// Each specifier appears once. A specifier that is both imported statically
/// and dynamically is reported as static, since it is loaded eagerly anyway.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<Import> {
    let mut scanner = Scanner::new(source);
    let mut imports: Vec<Import> = Vec::new();

    while let Some((specifier, kind, line)) = scanner.next_import() {
        if specifier.is_empty() {
            continue;
        }
        match imports.iter_mut().find(|i| i.specifier == specifier) {
            Some(existing) => {
                if existing.kind.is_dynamic() && !kind.is_dynamic() {
                    existing.kind = kind;
                }
            }
            None => imports.push(Import {
                specifier,
                kind,
                line,
            }),
        }
    }

    imports
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: u32,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        if c == '\n' {
            self.line += 1;
        }
        self.pos += 1;
        Some(c)
    }

    fn next_import(&mut self) -> Option<(String, ImportKind, u32)> {
        while let Some(c) = self.peek() {
            match c {
                '/' if self.peek_at(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek_at(1) == Some('*') => self.skip_block_comment(),
                '"' | '\'' | '`' => {
                    self.read_string();
                }
                _ if self.at_keyword("import") => {
                    let line = self.line;
                    self.pos += "import".len();
                    if let Some((spec, kind)) = self.import_clause() {
                        return Some((spec, kind, line));
                    }
                }
                _ if self.at_keyword("export") => {
                    let line = self.line;
                    self.pos += "export".len();
                    if let Some(spec) = self.from_clause() {
                        return Some((spec, ImportKind::Static, line));
                    }
                }
                _ if self.at_keyword("require") => {
                    let line = self.line;
                    self.pos += "require".len();
                    if let Some(spec) = self.call_argument() {
                        return Some((spec, ImportKind::Require, line));
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }
        None
    }

    /// After `import`: dynamic call, bare side-effect import, or `... from`.
    fn import_clause(&mut self) -> Option<(String, ImportKind)> {
        self.skip_whitespace();
        match self.peek()? {
            '(' => self.call_argument().map(|s| (s, ImportKind::Dynamic)),
            '"' | '\'' => self.read_string().map(|s| (s, ImportKind::Static)),
            // `import.meta`
            '.' => None,
            _ => self.from_clause().map(|s| (s, ImportKind::Static)),
        }
    }

    /// Scan forward within the statement for `from "<specifier>"`.
    fn from_clause(&mut self) -> Option<String> {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                ';' if depth == 0 => return None,
                '"' | '\'' | '`' => return None,
                '/' if self.peek_at(1) == Some('/') => {
                    self.skip_line_comment();
                    continue;
                }
                '/' if self.peek_at(1) == Some('*') => {
                    self.skip_block_comment();
                    continue;
                }
                _ if depth == 0 && self.at_keyword("from") => {
                    self.pos += "from".len();
                    self.skip_whitespace();
                    return match self.peek() {
                        Some('"' | '\'') => self.read_string(),
                        _ => None,
                    };
                }
                // `export const x = ...` / `export function` never reach `from`.
                '=' | '(' if depth == 0 => return None,
                _ => {}
            }
            self.bump();
        }
        None
    }

    /// `( "<specifier>" )` with a single literal argument.
    fn call_argument(&mut self) -> Option<String> {
        self.skip_whitespace();
        if self.peek()? != '(' {
            return None;
        }
        self.bump();
        self.skip_whitespace();
        let spec = match self.peek()? {
            '"' | '\'' => self.read_string()?,
            '`' => {
                let literal = self.read_string()?;
                // Interpolated template literals are not static specifiers.
                if literal.contains("${") {
                    return None;
                }
                literal
            }
            _ => return None,
        };
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.bump();
            Some(spec)
        } else {
            None
        }
    }

    /// Read a quoted literal starting at the opening quote.
    fn read_string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        while let Some(c) = self.bump() {
            if c == quote {
                return Some(out);
            }
            if c == '\\' {
                if let Some(escaped) = self.bump() {
                    out.push(escaped);
                }
                continue;
            }
            if c == '\n' && quote != '`' {
                return None;
            }
            out.push(c);
        }
        None
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn skip_line_comment(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.bump();
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while let Some(c) = self.peek() {
            if c == '*' && self.peek_at(1) == Some('/') {
                self.pos += 2;
                return;
            }
            self.bump();
        }
    }

    /// Keyword at the cursor with identifier boundaries on both sides.
    /// A preceding `.` rules out member access like `obj.require(...)`.
    fn at_keyword(&self, keyword: &str) -> bool {
        let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
        if self.pos > 0 {
            let prev = self.chars[self.pos - 1];
            if is_ident(prev) || prev == '.' {
                return false;
            }
        }
        let mut end = self.pos;
        for expected in keyword.chars() {
            if self.chars.get(end) != Some(&expected) {
                return false;
            }
            end += 1;
        }
        !self.chars.get(end).copied().is_some_and(is_ident)
    }
}
