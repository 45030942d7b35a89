//! Namespace path grammar and helpers for store-relative paths.
//!
//! A mounted path is `/<chain-id>/<owner-address>/<rel/path>`. Inside a
//! store, entries are named by their relative path without a leading slash;
//! the empty string is the root of an owner's tree (or of a redirect store).

use ethfs_types::{make_error_msg, Address, ChainId, NamespaceCode, Result, StatusCode};

pub const SEPARATOR: char = '/';

/// A parsed namespace path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NsPath {
    Root,
    Chain(ChainId),
    Owner {
        chain: ChainId,
        owner: Address,
    },
    Entry {
        chain: ChainId,
        owner: Address,
        path: String,
    },
}

impl NsPath {
    /// Parse a mounted path. Empty segments are ignored; `.` and `..` are
    /// refused, and unparseable chain or owner segments do not exist.
    pub fn parse(path: &str) -> Result<NsPath> {
        let segments: Vec<&str> = path.split(SEPARATOR).filter(|s| !s.is_empty()).collect();
        if let Some(bad) = segments.iter().find(|s| **s == "." || **s == "..") {
            return make_error_msg(
                StatusCode::INVALID_ARG,
                format!("relative segment {:?} in {:?}", bad, path),
            );
        }

        let Some((chain, rest)) = segments.split_first() else {
            return Ok(NsPath::Root);
        };
        let chain = match chain.parse::<ChainId>() {
            Ok(chain) => chain,
            Err(_) => {
                return make_error_msg(NamespaceCode::NOT_FOUND, format!("no chain {:?}", chain))
            }
        };

        let Some((owner, rest)) = rest.split_first() else {
            return Ok(NsPath::Chain(chain));
        };
        let owner = match owner.parse::<Address>() {
            Ok(owner) => owner,
            Err(_) => {
                return make_error_msg(NamespaceCode::NOT_FOUND, format!("no owner {:?}", owner))
            }
        };

        if rest.is_empty() {
            Ok(NsPath::Owner { chain, owner })
        } else {
            Ok(NsPath::Entry {
                chain,
                owner,
                path: rest.join("/"),
            })
        }
    }

    pub fn chain(&self) -> Option<ChainId> {
        match self {
            NsPath::Root => None,
            NsPath::Chain(chain) | NsPath::Owner { chain, .. } | NsPath::Entry { chain, .. } => {
                Some(*chain)
            }
        }
    }
}

/// Parent of a relative path; `""` for top-level entries.
pub fn parent(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(pos) => &path[..pos],
        None => "",
    }
}

/// Last segment of a relative path.
pub fn leaf(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", dir, SEPARATOR, name)
    }
}

/// Proper ancestors of `path`, deepest first, excluding the root.
///
/// `a/b/c` yields `a/b`, then `a`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.rmatch_indices(SEPARATOR).map(move |(pos, _)| &path[..pos])
}

/// Whether `path` lies strictly below `dir`. Everything lies below the
/// root `""`.
pub fn is_under(path: &str, dir: &str) -> bool {
    if dir.is_empty() {
        return !path.is_empty();
    }
    path.len() > dir.len() && path.starts_with(dir) && path[dir.len()..].starts_with(SEPARATOR)
}

/// `path` rewritten relative to `dir`, or `None` if it is not below it.
pub fn relative_to<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    if !is_under(path, dir) {
        return None;
    }
    if dir.is_empty() {
        Some(path)
    } else {
        Some(&path[dir.len() + 1..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";

    #[test]
    fn test_parse_levels() {
        assert_eq!(NsPath::parse("/").unwrap(), NsPath::Root);
        assert_eq!(NsPath::parse("").unwrap(), NsPath::Root);
        assert_eq!(NsPath::parse("/1337").unwrap(), NsPath::Chain(ChainId(1337)));

        let owner: Address = ALICE.parse().unwrap();
        assert_eq!(
            NsPath::parse(&format!("/1337/{}", ALICE)).unwrap(),
            NsPath::Owner {
                chain: ChainId(1337),
                owner
            }
        );
        assert_eq!(
            NsPath::parse(&format!("/1337/{}/docs//a.txt/", ALICE)).unwrap(),
            NsPath::Entry {
                chain: ChainId(1337),
                owner,
                path: "docs/a.txt".into()
            }
        );
    }

    #[test]
    fn test_owner_case_normalized() {
        let upper = NsPath::parse("/1/0x00000000000000000000000000000000000A11CE").unwrap();
        let lower = NsPath::parse(&format!("/1/{}", ALICE)).unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_parse_errors() {
        let err = NsPath::parse("/mainnet").unwrap_err();
        assert_eq!(err.code(), NamespaceCode::NOT_FOUND);
        let err = NsPath::parse("/1337/not-an-address").unwrap_err();
        assert_eq!(err.code(), NamespaceCode::NOT_FOUND);
        let err = NsPath::parse(&format!("/1337/{}/a/../b", ALICE)).unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_ARG);
    }

    #[test]
    fn test_helpers() {
        assert_eq!(parent("a/b/c"), "a/b");
        assert_eq!(parent("a"), "");
        assert_eq!(leaf("a/b/c"), "c");
        assert_eq!(leaf("a"), "a");
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a/b", "c"), "a/b/c");
        assert_eq!(ancestors("a/b/c").collect::<Vec<_>>(), vec!["a/b", "a"]);
        assert!(ancestors("a").next().is_none());
    }

    #[test]
    fn test_is_under() {
        assert!(is_under("docs/a.txt", "docs"));
        assert!(!is_under("docs", "docs"));
        assert!(!is_under("docs2/a.txt", "docs"));
        assert!(is_under("docs", ""));
        assert!(!is_under("", ""));
        assert_eq!(relative_to("shared/x/y.txt", "shared"), Some("x/y.txt"));
        assert_eq!(relative_to("x.txt", ""), Some("x.txt"));
        assert_eq!(relative_to("other/x", "shared"), None);
    }
}
