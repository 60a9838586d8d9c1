//! Include/exclude filtering of remote paths.
//!
//! Exclude rules are checked first and win. A rule ending in `/` excludes a
//! directory and everything below it by plain prefix comparison; any other
//! rule is a shell glob tried against both the base name and the full
//! relative path. `*` never crosses a `/`, `**` is just two stars, and
//! braces are literal characters.

use globset::{GlobBuilder, GlobMatcher};

/// Compiled include/exclude rules.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include_all: bool,
    include: Vec<GlobMatcher>,
    exclude_dirs: Vec<String>,
    exclude: Vec<GlobMatcher>,
}

enum Rule {
    Dir(String),
    Glob(GlobMatcher),
    /// Malformed glob, never matches
    Invalid,
}

/// Rewrite a shell glob into globset syntax: runs of `*` collapse to one
/// star and `{`, `}` and `,` outside a class become literals.
fn shell_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '[' if !in_class => {
                in_class = true;
                out.push(c);
                // a leading `]` or `!]` is part of the set
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    out.extend(chars.next());
                }
                if chars.peek() == Some(&']') {
                    out.extend(chars.next());
                }
            }
            ']' if in_class => {
                in_class = false;
                out.push(c);
            }
            '*' if !in_class => {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push('*');
            }
            '{' | '}' | ',' if !in_class => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn compile(pattern: &str) -> Rule {
    if let Some(dir) = pattern.strip_suffix('/') {
        return Rule::Dir(dir.to_string());
    }
    match GlobBuilder::new(&shell_glob(pattern))
        .literal_separator(true)
        .backslash_escape(true)
        .build()
    {
        Ok(glob) => Rule::Glob(glob.compile_matcher()),
        Err(e) => {
            tracing::debug!(pattern, error = %e, "Ignoring malformed pattern");
            Rule::Invalid
        }
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl PathFilter {
    /// Compile the rules. An empty include list means "everything".
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        let include_all = include.is_empty() || include.iter().any(|p| p == "*");

        let include = include
            .iter()
            .filter_map(|p| match compile(p) {
                Rule::Glob(g) => Some(g),
                // trailing-slash includes never match a file path
                Rule::Dir(_) | Rule::Invalid => None,
            })
            .collect();

        let mut exclude_dirs = Vec::new();
        let mut exclude_globs = Vec::new();
        for pattern in exclude {
            match compile(pattern) {
                Rule::Dir(dir) => exclude_dirs.push(dir),
                Rule::Glob(g) => exclude_globs.push(g),
                Rule::Invalid => {}
            }
        }

        Self {
            include_all,
            include,
            exclude_dirs,
            exclude: exclude_globs,
        }
    }

    /// Returns true when `path` takes part in the backup.
    pub fn is_match(&self, path: &str) -> bool {
        let base = base_name(path);

        for dir in &self.exclude_dirs {
            if path == dir
                || path.starts_with(&format!("{}/", dir))
                || path.starts_with(&format!("{}\\", dir))
            {
                return false;
            }
        }

        if self
            .exclude
            .iter()
            .any(|g| g.is_match(base) || g.is_match(path))
        {
            return false;
        }

        if self.include_all {
            return true;
        }

        self.include
            .iter()
            .any(|g| g.is_match(base) || g.is_match(path))
    }
}

/// Checks a single path against include and exclude patterns.
pub fn matches(path: &str, include: &[String], exclude: &[String]) -> bool {
    PathFilter::new(include, exclude).is_match(path)
}
