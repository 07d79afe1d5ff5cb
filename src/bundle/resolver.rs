//! Bundle reference resolution.
//!
//! A bundle reference is either a local directory or a pointer at a hosted
//! model repository. Hosted references come in three spellings: the
//! explicit `hf:org/repo` form, a full `https://huggingface.co/...` URL
//! (including the common single-slash typo after the scheme), and a bare
//! `org/repo` pair.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::errors::{SegError, SegResult};

static REPO_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$")
        .unwrap_or_else(|e| panic!("Failed to compile regex pattern: {e}"))
});

const HUB_HOST: &str = "huggingface.co";

/// Extracts the `org/repo` id from a hub reference.
///
/// Returns `Ok(None)` when the reference does not look like a hub pointer
/// at all (the caller may then report it as unresolvable). A reference
/// that *is* hub-shaped but malformed is a Resolution error.
pub fn parse_repo_id(reference: &str) -> SegResult<Option<String>> {
    if let Some(rest) = reference.strip_prefix("hf:") {
        let repo = rest.trim_matches('/');
        return if REPO_ID_RE.is_match(repo) {
            Ok(Some(repo.to_string()))
        } else {
            Err(SegError::resolution(format!(
                "'{rest}' is not a valid 'org/repo' id"
            )))
        };
    }
    let normalized = normalize_scheme(reference);
    for scheme in ["https://", "http://"] {
        let Some(rest) = normalized.strip_prefix(scheme) else {
            continue;
        };
        let Some(path) = rest
            .strip_prefix(HUB_HOST)
            .or_else(|| rest.strip_prefix("www.huggingface.co"))
            .filter(|path| path.is_empty() || path.starts_with('/'))
        else {
            return Ok(None);
        };
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        return match (segments.next(), segments.next()) {
            (Some(org), Some(repo)) => {
                let repo_id = format!("{org}/{repo}");
                if REPO_ID_RE.is_match(&repo_id) {
                    Ok(Some(repo_id))
                } else {
                    Err(SegError::resolution(format!(
                        "'{repo_id}' is not a valid 'org/repo' id"
                    )))
                }
            }
            _ => Err(SegError::resolution(format!(
                "hub URL '{reference}' does not name an 'org/repo'"
            ))),
        };
    }
    if REPO_ID_RE.is_match(reference) {
        return Ok(Some(reference.to_string()));
    }
    Ok(None)
}

// Repairs the frequent `https:/host` typo before URL dissection.
fn normalize_scheme(reference: &str) -> String {
    for scheme in ["https", "http"] {
        let fixed = format!("{scheme}://");
        if reference.starts_with(&fixed) {
            return reference.to_string();
        }
        if let Some(rest) = reference.strip_prefix(&format!("{scheme}:/")) {
            return format!("{fixed}{rest}");
        }
    }
    reference.to_string()
}

/// Resolves a bundle reference to a local directory.
///
/// An existing directory wins over every hub interpretation and is
/// returned as an absolute path. Hub references are fetched when the
/// `hub` feature is compiled in.
pub fn resolve_bundle_dir(reference: &str) -> SegResult<PathBuf> {
    let candidate = Path::new(reference);
    if candidate.is_dir() {
        return std::fs::canonicalize(candidate).map_err(|err| {
            SegError::resolution(format!(
                "cannot canonicalize bundle directory '{reference}': {err}"
            ))
        });
    }
    if let Some(repo_id) = parse_repo_id(reference)? {
        tracing::info!(repo = %repo_id, "resolving bundle through the model hub");
        #[cfg(feature = "hub")]
        {
            return crate::bundle::hub::fetch_bundle(&repo_id);
        }
        #[cfg(not(feature = "hub"))]
        {
            return Err(SegError::resolution(format!(
                "'{reference}' is a hub reference but this build lacks the 'hub' feature"
            )));
        }
    }
    Err(SegError::resolution(format!(
        "'{reference}' is neither an existing bundle directory nor a recognized hub reference"
    )))
}
