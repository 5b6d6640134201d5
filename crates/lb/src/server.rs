//! Backend server identity.

use std::{fmt, str::FromStr, sync::Arc};

use http::uri::{Authority, PathAndQuery, Scheme, Uri};

use crate::error::{LbError, LbResult};

/// A backend endpoint, identified by its normalized scheme, host and path.
///
/// Clones share one allocation, but equality, ordering and hashing always
/// compare the normalized value, so two servers parsed from equivalent
/// strings are the same key everywhere.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Server {
    inner: Arc<Endpoint>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Endpoint {
    scheme: String,
    host: String,
    path: String,
}

impl Server {
    /// Parses and normalizes `scheme://host[:port][/path]`.
    ///
    /// A missing scheme defaults to `http`, scheme and host are lower-cased
    /// and trailing slashes are dropped from the path. Query strings,
    /// fragments and user info are rejected.
    pub fn parse(endpoint: &str) -> LbResult<Self> {
        let invalid = || LbError::InvalidEndpoint(endpoint.to_string());

        if endpoint.contains('#') {
            return Err(invalid());
        }

        let uri: Uri = endpoint.trim().parse().map_err(|_| invalid())?;
        if uri.query().is_some() {
            return Err(invalid());
        }

        let authority = uri.authority().ok_or_else(invalid)?;
        if authority.as_str().contains('@') || authority.host().is_empty() {
            return Err(invalid());
        }

        let scheme = uri.scheme_str().unwrap_or("http").to_ascii_lowercase();
        let host = authority.as_str().to_ascii_lowercase();
        let path = uri.path().trim_end_matches('/').to_string();

        Ok(Self {
            inner: Arc::new(Endpoint { scheme, host, path }),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.inner.scheme
    }

    /// Host including the port, if one was given.
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Path prefix without a trailing slash; empty for the root.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Points `uri` at this server: scheme and authority are replaced and the
    /// server path is prepended to the request path. The query is kept.
    pub fn rewrite(&self, uri: &Uri) -> LbResult<Uri> {
        let invalid = || LbError::InvalidEndpoint(self.to_string());

        let request_path = uri.path_and_query().map_or("/", PathAndQuery::as_str);
        let joined = if request_path.starts_with('/') {
            format!("{}{}", self.path(), request_path)
        } else {
            format!("{}/{}", self.path(), request_path)
        };

        let scheme = Scheme::from_str(self.scheme()).map_err(|_| invalid())?;
        let authority = Authority::from_str(self.host()).map_err(|_| invalid())?;

        Uri::builder()
            .scheme(scheme)
            .authority(authority)
            .path_and_query(joined)
            .build()
            .map_err(|_| invalid())
    }
}

impl FromStr for Server {
    type Err = LbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme(), self.host(), self.path())
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Server({self})")
    }
}
