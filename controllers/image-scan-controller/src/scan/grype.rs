//! `RunGrype`: scans images with the grype CLI.

use super::{prepare_artifact, run_command, run_scanner, Scanner};
use crate::config::ScannerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::info;

pub struct GrypeScanner {
    binary: String,
    db_root_dir: Option<PathBuf>,
    listing_url: Option<String>,
    artifact_dir: PathBuf,
}

/// Factory registered as `RunGrype`
pub fn factory(config: &ScannerConfig) -> Arc<dyn Scanner> {
    Arc::new(GrypeScanner {
        binary: config.grype.binary.clone(),
        db_root_dir: config.grype.db_root_dir.clone(),
        listing_url: config.grype.listing_url.clone(),
        artifact_dir: config.artifact_dir.clone(),
    })
}

impl GrypeScanner {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(dir) = &self.db_root_dir {
            command.env("GRYPE_DB_CACHE_DIR", dir);
        }
        if let Some(url) = &self.listing_url {
            command.env("GRYPE_DB_UPDATE_URL", url);
        }
        command
    }
}

#[async_trait::async_trait]
impl Scanner for GrypeScanner {
    fn tool(&self) -> &str {
        "grype"
    }

    async fn prepare(&self) -> anyhow::Result<()> {
        info!("Updating grype vulnerability database");
        let mut command = self.command();
        command.args(["db", "update"]);
        run_command(command, "grype db update").await
    }

    async fn scan(&self, image: &str) -> anyhow::Result<PathBuf> {
        let output = prepare_artifact(&self.artifact_dir, image, self.tool()).await?;
        info!("Running grype for image {}", image);

        let mut command = self.command();
        // the database was refreshed in prepare()
        command
            .env("GRYPE_DB_AUTO_UPDATE", "false")
            .arg(format!("registry:{}", image))
            .args(["-o", "json", "--file"])
            .arg(&output);
        run_scanner(command, "grype", &output).await?;

        info!("Grype results for {} written to {}", image, output.display());
        Ok(output)
    }
}
