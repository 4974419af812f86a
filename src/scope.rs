use std::collections::BTreeSet;
use std::fmt;

/// Name of a lockable unit: a database, or one of the reserved names in
/// [`crate::result`].
pub type ResourceName = String;

/// The resources a transaction locks in one mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockScope {
    /// Every resource, including those that do not exist yet.
    All,
    /// An explicit set, iterated in acquisition order.
    Names(BTreeSet<ResourceName>),
}

impl LockScope {
    pub fn none() -> Self {
        LockScope::Names(BTreeSet::new())
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ResourceName>,
    {
        LockScope::Names(names.into_iter().map(Into::into).collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, LockScope::All)
    }

    /// True for an empty explicit set; [`LockScope::All`] is never empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, LockScope::Names(names) if names.is_empty())
    }

    pub fn as_names(&self) -> Option<&BTreeSet<ResourceName>> {
        match self {
            LockScope::All => None,
            LockScope::Names(names) => Some(names),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            LockScope::All => true,
            LockScope::Names(names) => names.contains(name),
        }
    }
}

impl Default for LockScope {
    fn default() -> Self {
        Self::none()
    }
}

impl From<Option<BTreeSet<ResourceName>>> for LockScope {
    fn from(names: Option<BTreeSet<ResourceName>>) -> Self {
        names.map_or(LockScope::All, LockScope::Names)
    }
}

impl From<BTreeSet<ResourceName>> for LockScope {
    fn from(names: BTreeSet<ResourceName>) -> Self {
        LockScope::Names(names)
    }
}

impl<S: Into<ResourceName>> FromIterator<S> for LockScope {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::names(iter)
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockScope::All => f.write_str("*"),
            LockScope::Names(names) => {
                f.write_str("[")?;
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(name)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// One step of a sorted acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<'a> {
    Write(&'a str),
    Read(&'a str),
}

/// Merges two sorted sets into a single ascending walk. On equal names the
/// write is taken and the read skipped, so a name is locked at most once.
pub fn merge_sorted<'a>(
    read: &'a BTreeSet<ResourceName>,
    write: &'a BTreeSet<ResourceName>,
) -> Vec<Step<'a>> {
    let mut steps = Vec::with_capacity(read.len() + write.len());
    let mut r = read.iter().peekable();
    let mut w = write.iter().peekable();
    loop {
        match (w.peek().copied(), r.peek().copied()) {
            (Some(wn), Some(rn)) if wn <= rn => {
                if wn == rn {
                    r.next();
                }
                steps.push(Step::Write(wn));
                w.next();
            }
            (_, Some(rn)) => {
                steps.push(Step::Read(rn));
                r.next();
            }
            (Some(wn), None) => {
                steps.push(Step::Write(wn));
                w.next();
            }
            (None, None) => return steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<ResourceName> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_merge_order() {
        let read = set(&["b", "d", "a"]);
        let write = set(&["c", "b", "e"]);
        let steps = merge_sorted(&read, &write);
        assert_eq!(
            steps,
            vec![
                Step::Read("a"),
                Step::Write("b"),
                Step::Write("c"),
                Step::Read("d"),
                Step::Write("e"),
            ]
        );
    }

    #[test]
    fn test_merge_is_independent_of_insertion_order() {
        let (fr, fw) = (set(&["x", "m"]), set(&["a", "z"]));
        let (br, bw) = (set(&["m", "x"]), set(&["z", "a"]));
        let forward = merge_sorted(&fr, &fw);
        let backward = merge_sorted(&br, &bw);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_scope_conversions() {
        assert_eq!(LockScope::from(None), LockScope::All);
        assert!(LockScope::from(Some(BTreeSet::new())).is_empty());
        assert!(!LockScope::All.is_empty());
        let scope: LockScope = ["b", "a", "b"].into_iter().collect();
        assert_eq!(scope.to_string(), "[a, b]");
        assert!(scope.contains("a"));
        assert!(!scope.contains("c"));
        assert_eq!(LockScope::All.to_string(), "*");
    }
}
