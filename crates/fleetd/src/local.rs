//! Local deploy hand-off.
//!
//! The hypervisor control protocol lives outside this daemon. The agent
//! hands each reserved deployment to it by writing an instance manifest
//! into `instances_dir`, where the hypervisor side picks it up.

use std::path::PathBuf;

use fleet_scheduler::{DeployCallback, DeployFuture, DeployRequest};
use tracing::debug;

pub fn deploy_callback(instances_dir: PathBuf) -> DeployCallback {
    Box::new(move |req: DeployRequest| -> DeployFuture {
        let dir = instances_dir.clone();
        Box::pin(async move {
            tokio::fs::create_dir_all(&dir).await?;
            let manifest = serde_json::json!({
                "deployment": req.deployment,
                "instance": req.instance,
            });
            let path = dir.join(format!("{}.json", req.deployment.id));
            tokio::fs::write(&path, serde_json::to_vec_pretty(&manifest)?).await?;
            debug!(path = ?path, "instance manifest written");
            Ok::<(), anyhow::Error>(())
        })
    })
}
