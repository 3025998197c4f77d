//! Normalized, `/`-separated logical paths.
//!
//! A logical path is either root-absolute (leading `/`) or relative to the
//! context of the namespace it is handed to. After normalization a path
//! never contains `.` or empty segments, and an absolute path never
//! contains `..`. Relative paths may keep leading `..` segments until they
//! are resolved against a context.

use std::fmt;

use crate::error::{ResolveError, ResolveResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalPath {
    absolute: bool,
    segments: Vec<String>,
}

impl LogicalPath {
    /// The absolute root path `/`.
    pub fn root() -> Self {
        Self {
            absolute: true,
            segments: Vec::new(),
        }
    }

    /// Parse and normalize a raw path string.
    ///
    /// Backslashes are treated as separators. Fails when an absolute path
    /// climbs above the root.
    pub fn parse(raw: &str) -> ResolveResult<Self> {
        let raw = raw.trim();
        let normalized = raw.replace('\\', "/");
        let absolute = normalized.starts_with('/');
        let mut segments: Vec<String> = Vec::new();

        for part in normalized.split('/') {
            match part {
                "" | "." => {}
                ".." => match segments.last() {
                    Some(last) if last != ".." => {
                        segments.pop();
                    }
                    _ if absolute => {
                        return Err(ResolveError::malformed(raw, "path escapes the root"));
                    }
                    _ => segments.push("..".to_string()),
                },
                other => segments.push(other.to_string()),
            }
        }

        Ok(Self { absolute, segments })
    }

    /// Parse a path that names a resource to be created or opened for write.
    ///
    /// Same as [`LogicalPath::parse`] but rejects paths with no final name.
    pub fn parse_name(raw: &str) -> ResolveResult<Self> {
        if raw.trim().is_empty() {
            return Err(ResolveError::malformed(raw, "empty resource name"));
        }
        let path = Self::parse(raw)?;
        match path.file_name() {
            Some(name) if name != ".." => Ok(path),
            _ => Err(ResolveError::malformed(raw, "path does not name a resource")),
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Append one or more `/`-separated segments and renormalize.
    pub fn join(&self, tail: &str) -> ResolveResult<Self> {
        let mut raw = self.to_string();
        if !raw.ends_with('/') && !raw.is_empty() {
            raw.push('/');
        }
        raw.push_str(tail.trim_start_matches('/'));
        Self::parse(&raw)
    }

    /// Resolve this path against an absolute context.
    ///
    /// Absolute paths are returned unchanged.
    pub fn resolve_against(&self, context: &LogicalPath) -> ResolveResult<Self> {
        if self.absolute {
            return Ok(self.clone());
        }
        debug_assert!(context.absolute, "context must be absolute");
        context.join(&self.segments.join("/"))
    }

    /// The parent path, or `None` at the root or for a bare relative name.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self {
            absolute: self.absolute,
            segments,
        })
    }

    /// Express this absolute path relative to `context`.
    ///
    /// Returns `None` when the path lies outside the context. The context
    /// itself maps to the empty string.
    pub fn relative_to(&self, context: &LogicalPath) -> Option<String> {
        if !self.absolute || !context.absolute {
            return None;
        }
        if self.segments.len() < context.segments.len() {
            return None;
        }
        if self.segments[..context.segments.len()] != context.segments[..] {
            return None;
        }
        Some(self.segments[context.segments.len()..].join("/"))
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/")?;
        }
        write!(f, "{}", self.segments.join("/"))
    }
}
