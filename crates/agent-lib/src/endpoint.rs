//! URL helpers shared by the runtime client and the relay

use url::Url;

/// Resolve `path` underneath `base`, keeping any path prefix `base` carries
///
/// `Url::join` replaces the last segment of a base without a trailing slash,
/// which would drop prefixes such as `http://host/shipyard`.
pub fn join(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let prefixed = format!("{}/", base.path());
        base.set_path(&prefixed);
    }
    base.join(path.trim_start_matches('/'))
}
