//! Output path templates.
//!
//! Placeholders: `[name]`, `[id]`, `[ext]` (with leading dot), `[query]`
//! (always empty), `[contenthash]` / `[hash]` with an optional `:N` length.

use crate::error::ConfigError;
use regex_lite::Regex;
use std::sync::OnceLock;

/// Hash length when a hash placeholder has no explicit `:N`.
pub const DEFAULT_HASH_LENGTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Name,
    Id,
    Ext,
    Query,
    Hash(usize),
}

/// A parsed output path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    raw: String,
    parts: Vec<Part>,
}

/// Values substituted into a template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub name: &'a str,
    pub id: usize,
    /// Extension including the leading dot, or empty.
    pub ext: &'a str,
    /// Full hex content hash; placeholders take a prefix.
    pub hash: &'a str,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[([a-z]+)(?::(\d+))?\]").unwrap_or_else(|e| unreachable!("{e}"))
    })
}

impl OutputTemplate {
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::Template {
            template: template.to_string(),
            message,
        };

        if template.is_empty() {
            return Err(invalid("template is empty".to_string()));
        }
        if template.starts_with('/') || template.split('/').any(|seg| seg == "..") {
            return Err(invalid("template must stay inside the output directory".to_string()));
        }

        let mut parts = Vec::new();
        let mut last = 0;
        for caps in placeholder_regex().captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                parts.push(Part::Literal(template[last..whole.start()].to_string()));
            }
            last = whole.end();

            let length = match caps.get(2) {
                Some(n) => Some(
                    n.as_str()
                        .parse::<usize>()
                        .ok()
                        .filter(|len| (1..=64).contains(len))
                        .ok_or_else(|| invalid(format!("invalid hash length '{}'", n.as_str())))?,
                ),
                None => None,
            };

            let part = match (&caps[1], length) {
                ("name", None) => Part::Name,
                ("id", None) => Part::Id,
                ("ext", None) => Part::Ext,
                ("query", None) => Part::Query,
                ("contenthash" | "hash" | "chunkhash", len) => {
                    Part::Hash(len.unwrap_or(DEFAULT_HASH_LENGTH))
                }
                (other, _) => return Err(invalid(format!("unknown placeholder '[{other}]'"))),
            };
            parts.push(part);
        }
        if last < template.len() {
            parts.push(Part::Literal(template[last..].to_string()));
        }

        Ok(Self {
            raw: template.to_string(),
            parts,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn render(&self, vars: &TemplateVars<'_>) -> String {
        let mut out = String::with_capacity(self.raw.len() + 16);
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Name => out.push_str(vars.name),
                Part::Id => out.push_str(&vars.id.to_string()),
                Part::Ext => out.push_str(vars.ext),
                Part::Query => {}
                Part::Hash(len) => {
                    out.push_str(&vars.hash[..(*len).min(vars.hash.len())]);
                }
            }
        }
        out
    }
}

/// Join a public path prefix and an output-relative path into a URL.
#[must_use]
pub fn public_url(public_path: &str, output_path: &str) -> String {
    if public_path.is_empty() || public_path.ends_with('/') {
        format!("{public_path}{output_path}")
    } else {
        format!("{public_path}/{output_path}")
    }
}
