//! Model-hub snapshot download, compiled behind the `hub` feature.

use std::path::PathBuf;

use hf_hub::api::sync::ApiBuilder;

use crate::core::errors::{SegError, SegResult};

/// Downloads every file of `repo_id` into the local cache and returns the
/// snapshot root directory.
///
/// Honors `HF_TOKEN` for gated repositories. Files already cached are not
/// re-fetched; the hub client validates by revision.
pub fn fetch_bundle(repo_id: &str) -> SegResult<PathBuf> {
    let mut builder = ApiBuilder::new();
    if let Ok(token) = std::env::var("HF_TOKEN") {
        builder = builder.with_token(Some(token));
    }
    let api = builder
        .build()
        .map_err(|err| SegError::resolution(format!("cannot reach the model hub: {err}")))?;
    let repo = api.model(repo_id.to_string());
    let info = repo.info().map_err(|err| {
        SegError::resolution(format!("cannot query hub repo '{repo_id}': {err}"))
    })?;

    let mut snapshot_root: Option<PathBuf> = None;
    let total = info.siblings.len();
    for (index, sibling) in info.siblings.iter().enumerate() {
        tracing::info!(
            file = %sibling.rfilename,
            progress = format!("{}/{total}", index + 1),
            "fetching bundle file"
        );
        let local = repo.get(&sibling.rfilename).map_err(|err| {
            SegError::resolution(format!(
                "cannot fetch '{}' from hub repo '{repo_id}': {err}",
                sibling.rfilename
            ))
        })?;
        if snapshot_root.is_none() {
            // The returned path ends with the repo-relative filename; what
            // precedes it is the snapshot root shared by every file.
            let mut base = local.clone();
            for _ in sibling.rfilename.split('/') {
                base.pop();
            }
            snapshot_root = Some(base);
        }
    }
    snapshot_root
        .ok_or_else(|| SegError::resolution(format!("hub repo '{repo_id}' holds no files")))
}
