//! Path filters: mask trees over relative path strings.
//!
//! Masks are composed with and/or/not around three leaf forms: an exact
//! path, a subtree prefix, and a shell-style glob (`*` and `?`).  The
//! facade evaluates one mask per walk; the default accepts everything.

#[derive(Debug, Clone)]
pub enum Mask {
    All,
    Nothing,
    Exact(String),
    /// Selects the named path and everything below it.
    Subtree(String),
    Glob(String),
    Not(Box<Mask>),
    And(Vec<Mask>),
    Or(Vec<Mask>),
}

impl Mask {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Mask::All => true,
            Mask::Nothing => false,
            Mask::Exact(p) => path == p,
            Mask::Subtree(p) => {
                path == p || path.strip_prefix(p.as_str()).is_some_and(|r| r.starts_with('/'))
            }
            Mask::Glob(pattern) => glob_match(pattern.as_bytes(), path.as_bytes()),
            Mask::Not(inner) => !inner.matches(path),
            Mask::And(all) => all.iter().all(|m| m.matches(path)),
            Mask::Or(any) => any.iter().any(|m| m.matches(path)),
        }
    }

    /// Whether a directory at `path` can still contain matches; used to
    /// prune walks without losing entries a glob would accept deeper down.
    pub fn may_descend(&self, path: &str) -> bool {
        match self {
            Mask::Nothing => false,
            Mask::Exact(p) | Mask::Subtree(p) => {
                p == path
                    || p.strip_prefix(path).is_some_and(|r| r.starts_with('/'))
                    || path.strip_prefix(p.as_str()).is_some_and(|r| r.starts_with('/'))
            }
            Mask::And(all) => all.iter().all(|m| m.may_descend(path)),
            // Globs and negations cannot be pruned soundly.
            _ => true,
        }
    }

    /// A list of selectors combined with or, the CLI's `-g` form.
    pub fn any_of(paths: &[String]) -> Mask {
        if paths.is_empty() {
            Mask::All
        } else {
            Mask::Or(paths.iter().map(|p| Mask::Subtree(p.clone())).collect())
        }
    }
}

/// Byte-wise glob: `*` spans any run (including `/`), `?` one byte.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => {
            (0..=text.len()).any(|skip| glob_match(rest, &text[skip..]))
        }
        Some((b'?', rest)) => match text.split_first() {
            Some((_, t)) => glob_match(rest, t),
            None => false,
        },
        Some((&c, rest)) => match text.split_first() {
            Some((&t, ts)) if t == c => glob_match(rest, ts),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtree_selects_itself_and_below() {
        let m = Mask::Subtree("usr/share".into());
        assert!(m.matches("usr/share"));
        assert!(m.matches("usr/share/doc"));
        assert!(!m.matches("usr/shared"));
        assert!(!m.matches("usr"));
    }

    #[test]
    fn globs_span_separators() {
        let m = Mask::Glob("*.log".into());
        assert!(m.matches("var/log/syslog.log"));
        assert!(!m.matches("var/log/syslog"));
        assert!(Mask::Glob("a?c".into()).matches("abc"));
        assert!(!Mask::Glob("a?c".into()).matches("abbc"));
    }

    #[test]
    fn composition() {
        let m = Mask::And(vec![
            Mask::Subtree("home".into()),
            Mask::Not(Box::new(Mask::Glob("*.tmp".into()))),
        ]);
        assert!(m.matches("home/u/notes.txt"));
        assert!(!m.matches("home/u/scratch.tmp"));
        assert!(!m.matches("etc/passwd"));
    }

    #[test]
    fn descend_pruning_keeps_ancestors_of_selections() {
        let m = Mask::Subtree("a/b/c".into());
        assert!(m.may_descend("a"));
        assert!(m.may_descend("a/b"));
        assert!(m.may_descend("a/b/c"));
        assert!(!m.may_descend("a/x"));
    }
}
