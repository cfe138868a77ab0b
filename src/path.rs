//! Logical path to share path resolution

/// Normalize a configured mount root so it starts and ends with `/`
pub fn normalize_root(root: Option<&str>) -> String {
    let root = root.unwrap_or("/");
    let mut normalized = String::with_capacity(root.len() + 2);
    if !root.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(root);
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

/// Resolves paths relative to the mount root into absolute share paths
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: String,
    root_segments: Vec<String>,
}

impl PathResolver {
    /// `.` and `..` in the configured root are collapsed here; `..` at the
    /// top of the share is dropped.
    pub fn new(root: Option<&str>) -> Self {
        let mut root_segments: Vec<String> = Vec::new();
        for segment in split(&normalize_root(root)) {
            match segment {
                "." => {}
                ".." => {
                    root_segments.pop();
                }
                name => root_segments.push(name.to_string()),
            }
        }
        let root = if root_segments.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", root_segments.join("/"))
        };
        Self {
            root,
            root_segments,
        }
    }

    /// The normalized root, with leading and trailing separator
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Resolve a relative path against the root.
    ///
    /// Returns `None` if `..` segments would climb above the root.
    pub fn resolve(&self, relative: &str) -> Option<String> {
        let mut segments: Vec<&str> = self.root_segments.iter().map(String::as_str).collect();
        let floor = segments.len();

        for segment in split(relative) {
            match segment {
                "." => {}
                ".." => {
                    if segments.len() == floor {
                        return None;
                    }
                    segments.pop();
                }
                name => segments.push(name),
            }
        }

        Some(format!("/{}", segments.join("/")))
    }

    /// Cache key for a child discovered in a listing of `parent`
    pub fn child(parent: &str, name: &str) -> String {
        if parent.ends_with('/') {
            format!("{}{}", parent, name)
        } else {
            format!("{}/{}", parent, name)
        }
    }

    /// True when the mount root is the share root and `relative` names it
    pub fn is_share_root(&self, relative: &str) -> bool {
        self.root == "/" && split(relative).all(|s| s == ".")
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Parent of a relative path; the mount root is `""`
pub fn parent_of(relative: &str) -> &str {
    let trimmed = relative.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// Extension of the last segment, including the dot
pub fn extension_of(relative: &str) -> &str {
    let name = relative.rsplit('/').next().unwrap_or(relative);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[idx..],
        _ => "",
    }
}

/// Join a relative directory path and an entry name
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
