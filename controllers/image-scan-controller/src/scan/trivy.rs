//! `RunTrivy`: scans images with the trivy CLI.

use super::{prepare_artifact, run_command, run_scanner, Scanner};
use crate::config::ScannerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::info;

pub struct TrivyScanner {
    binary: String,
    cache_dir: Option<PathBuf>,
    artifact_dir: PathBuf,
}

/// Factory registered as `RunTrivy`
pub fn factory(config: &ScannerConfig) -> Arc<dyn Scanner> {
    Arc::new(TrivyScanner {
        binary: config.trivy.binary.clone(),
        cache_dir: config.trivy.cache_dir.clone(),
        artifact_dir: config.artifact_dir.clone(),
    })
}

impl TrivyScanner {
    fn image_command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.arg("image");
        if let Some(dir) = &self.cache_dir {
            command.arg("--cache-dir").arg(dir);
        }
        command
    }
}

#[async_trait::async_trait]
impl Scanner for TrivyScanner {
    fn tool(&self) -> &str {
        "trivy"
    }

    async fn prepare(&self) -> anyhow::Result<()> {
        info!("Downloading trivy vulnerability database");
        let mut command = self.image_command();
        command.arg("--download-db-only");
        run_command(command, "trivy db download").await
    }

    async fn scan(&self, image: &str) -> anyhow::Result<PathBuf> {
        let output = prepare_artifact(&self.artifact_dir, image, self.tool()).await?;
        info!("Running trivy for image {}", image);

        let mut command = self.image_command();
        command
            .args(["--skip-db-update", "-f", "json", "-o"])
            .arg(&output)
            .arg(image);
        run_scanner(command, "trivy", &output).await?;

        info!("Trivy results for {} written to {}", image, output.display());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn test_cache_dir_passed_to_image_command() {
        let mut config = ScannerConfig::default();
        config.trivy.cache_dir = Some(PathBuf::from("/var/cache/trivy"));
        let scanner = TrivyScanner {
            binary: config.trivy.binary.clone(),
            cache_dir: config.trivy.cache_dir.clone(),
            artifact_dir: config.artifact_dir.clone(),
        };

        let command = scanner.image_command();
        let args: Vec<&OsStr> = command.as_std().get_args().collect();

        assert_eq!(args, vec![OsStr::new("image"), OsStr::new("--cache-dir"), OsStr::new("/var/cache/trivy")]);
    }

    #[tokio::test]
    async fn test_failed_database_download_is_reported() {
        let scanner = TrivyScanner {
            binary: "/nonexistent/trivy".to_string(),
            cache_dir: None,
            artifact_dir: PathBuf::from("/tmp"),
        };

        let err = scanner.prepare().await.unwrap_err();
        assert!(err.to_string().contains("trivy db download"));
    }
}
