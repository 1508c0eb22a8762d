//! Trust levels.
//!
//! A module may import another only if its own trust level is at least
//! as high. Defaults:
//!
//! | URI                      | Level |
//! |--------------------------|-------|
//! | `repl:`                  | 40    |
//! | `file:` (no host)        | 30    |
//! | `modulepath:`            | 20    |
//! | `jar:<inner>`            | level of `<inner>` |
//! | other, incl. remote file | 10    |
//! | `pkl:`                   | 0     |

use std::sync::Arc;
use url::Url;

/// Maps a URI to its trust level. Shared and thread-safe.
pub type TrustLevels = Arc<dyn Fn(&Url) -> i32 + Send + Sync>;

/// The default trust level of `uri`.
#[must_use]
pub fn default_trust_level(uri: &Url) -> i32 {
    match uri.scheme() {
        "repl" => 40,
        "file" => match uri.host_str() {
            None | Some("") => 30,
            Some(_) => 10,
        },
        "jar" => jar_inner(uri).map_or(10, |inner| default_trust_level(&inner)),
        "modulepath" => 20,
        "pkl" => 0,
        _ => 10,
    }
}

/// The default trust levels as a shareable function.
#[must_use]
pub fn default_trust_levels() -> TrustLevels {
    Arc::new(default_trust_level)
}

/// `jar:file:/lib.jar!/a.pkl` → `file:/lib.jar!/a.pkl`.
fn jar_inner(uri: &Url) -> Option<Url> {
    let rest = uri.as_str().strip_prefix("jar:")?;
    Url::parse(rest).ok()
}
