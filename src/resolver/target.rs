use crate::normalize_path;
use crate::Error;
use crate::Result;

/// A parsed resolver target.
///
/// Accepted forms:
/// - `scheme:///base/path`
/// - `scheme://authority/base/path`
/// - `/base/path` (no scheme)
///
/// A trailing `:port` on the path is dropped, so `zk:///nodes:41500`
/// resolves `/nodes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveTarget {
    scheme: Option<String>,
    authority: Option<String>,
    path: String,
}

impl ResolveTarget {
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim();
        let (scheme, authority, raw_path) = match target.split_once("://") {
            Some((scheme, rest)) => {
                if scheme.is_empty() {
                    return Err(Error::InvalidTarget(format!("{target:?} has an empty scheme")));
                }
                let (authority, path) = match rest.find('/') {
                    Some(idx) => (&rest[..idx], &rest[idx..]),
                    None => (rest, ""),
                };
                let authority = (!authority.is_empty()).then(|| authority.to_string());
                (Some(scheme.to_ascii_lowercase()), authority, path)
            }
            None => (None, None, target),
        };

        let path = normalize_path(strip_port(raw_path));
        if path == "/" {
            return Err(Error::InvalidTarget(format!("{target:?} names no base path")));
        }

        Ok(Self {
            scheme,
            authority,
            path,
        })
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Base path to resolve, normalized
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::str::FromStr for ResolveTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn strip_port(path: &str) -> &str {
    match path.rsplit_once(':') {
        Some((head, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => path,
    }
}
