//! Static prefix → backend route table.
//!
//! Built once at startup and shared read-only for the life of the process.
//! Routes are held longest-prefix-first so that, among overlapping prefixes,
//! the most specific one always wins regardless of configuration order.

use axum::http::Uri;
use reqwest::Url;

/// Errors from building a [`RouteTable`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("route prefix {0:?} must start with '/'")]
    InvalidPrefix(String),
    #[error("backend origin {origin:?} is not a valid URL: {reason}")]
    InvalidOrigin { origin: String, reason: String },
    #[error("backend origin {0:?} must use http or https")]
    UnsupportedScheme(String),
}

#[derive(Debug, Clone)]
struct Route {
    prefix: String,
    origin: Url,
}

/// Where a matched request should be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    /// Prefix that matched.
    pub prefix: String,
    /// Configured backend origin.
    pub origin: Url,
    /// Full backend URL: origin, rewritten path, and query.
    pub url: Url,
}

/// Immutable prefix-routing table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Builds a table from `(prefix, origin)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if a prefix does not start with `/`, or an
    /// origin is not an absolute `http`/`https` URL.
    pub fn new<I, P, O>(routes: I) -> Result<Self, RouteError>
    where
        I: IntoIterator<Item = (P, O)>,
        P: Into<String>,
        O: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for (prefix, origin) in routes {
            let prefix = prefix.into();
            if !prefix.starts_with('/') {
                return Err(RouteError::InvalidPrefix(prefix));
            }

            let origin = origin.as_ref();
            let url = Url::parse(origin).map_err(|e| RouteError::InvalidOrigin {
                origin: origin.to_owned(),
                reason: e.to_string(),
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(RouteError::UnsupportedScheme(origin.to_owned()));
            }

            parsed.push(Route { prefix, origin: url });
        }

        // Stable: equal-length prefixes keep configuration order.
        parsed.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { routes: parsed })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Prefixes in match order.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.prefix.as_str())
    }

    /// Finds the route for `uri` and builds the backend URL.
    ///
    /// The matched prefix is stripped from the path (an empty remainder
    /// becomes `/`), the remainder is joined onto the origin's base path with
    /// a single slash, and the query string is kept.
    #[must_use]
    pub fn resolve(&self, uri: &Uri) -> Option<RouteTarget> {
        let path = uri.path();
        let route = self.routes.iter().find(|r| path.starts_with(&r.prefix))?;

        let remainder = match &path[route.prefix.len()..] {
            "" => "/",
            rest => rest,
        };

        let mut url = route.origin.clone();
        url.set_path(&join_paths(route.origin.path(), remainder));
        url.set_query(join_queries(route.origin.query(), uri.query()).as_deref());

        Some(RouteTarget {
            prefix: route.prefix.clone(),
            origin: route.origin.clone(),
            url,
        })
    }
}

fn join_paths(base: &str, rest: &str) -> String {
    match (base.ends_with('/'), rest.starts_with('/')) {
        (true, true) => format!("{base}{}", &rest[1..]),
        (false, false) => format!("{base}/{rest}"),
        _ => format!("{base}{rest}"),
    }
}

fn join_queries(base: Option<&str>, request: Option<&str>) -> Option<String> {
    match (base.filter(|q| !q.is_empty()), request.filter(|q| !q.is_empty())) {
        (Some(b), Some(r)) => Some(format!("{b}&{r}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_owned()),
        (None, None) => None,
    }
}
