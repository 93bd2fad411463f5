// ABOUTME: Container runtime probe and the pgloader container invocation
// ABOUTME: The command file lives in a temp dir removed on every exit path

use std::path::Path;
use tracing::{debug, info};

use crate::error::{MigratorError, Result};
use crate::job::{build_config, MigrationJobSpec};
use crate::process::{ProcessRunner, RunOptions, RunOutcome};
use crate::settings::ContainerSettings;

const MOUNT_POINT: &str = "/tmp/pgloader";
const CONFIG_FILE: &str = "pgloader-config.load";

/// Fails with `DependencyMissing` unless the container runtime answers `--version`.
pub async fn ensure_available(runner: &ProcessRunner, binary: &str) -> Result<()> {
    which::which(binary).map_err(|_| MigratorError::DependencyMissing(binary.to_string()))?;

    match runner.run(binary, ["--version"], &RunOptions::quiet()).await {
        Ok(RunOutcome::Completed(execution)) => {
            debug!("{}: {}", binary, execution.stdout_lossy().trim());
            Ok(())
        }
        Ok(RunOutcome::Cancelled) => Err(MigratorError::Interrupted),
        Err(MigratorError::ProcessFailed { .. }) | Err(MigratorError::DependencyMissing(_)) => {
            Err(MigratorError::DependencyMissing(binary.to_string()))
        }
        Err(e) => Err(e),
    }
}

/// Arguments for `<runtime> run` with `config_dir` mounted at the container's work dir.
pub fn container_args(settings: &ContainerSettings, config_dir: &Path) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        format!("--platform={}", settings.platform),
        "-v".to_string(),
        format!("{}:{}", config_dir.display(), MOUNT_POINT),
        settings.image.clone(),
        "pgloader".to_string(),
        "--no-ssl-cert-verification".to_string(),
        format!("{}/{}", MOUNT_POINT, CONFIG_FILE),
    ]
}

/// Writes the command file and runs pgloader. `Ok(false)` means cancelled.
pub async fn run_migration(
    runner: &ProcessRunner,
    settings: &ContainerSettings,
    spec: &MigrationJobSpec,
) -> Result<bool> {
    let dir = tempfile::Builder::new().prefix("pgloader-").tempdir()?;
    let config_path = dir.path().join(CONFIG_FILE);
    tokio::fs::write(&config_path, build_config(spec)).await?;
    debug!("Wrote pgloader command file to {}", config_path.display());

    info!(
        "Migrating {} into {}",
        spec.source().redacted(),
        spec.destination().redacted()
    );
    let outcome = runner
        .run(
            &settings.runtime,
            container_args(settings, dir.path()),
            &RunOptions::mirrored(),
        )
        .await;

    // `dir` drops here on every path, taking the command file with it.
    Ok(!outcome?.is_cancelled())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DestinationRules;
    use crate::uri::{normalize, Role};
    use tokio_util::sync::CancellationToken;

    fn spec() -> MigrationJobSpec {
        let rules = DestinationRules::default();
        let source = normalize("mysql://u:p@host/mydb", Role::Source, &rules).unwrap();
        let destination = normalize(
            "postgres://postgres.ref:p@aws-0-x.pooler.supabase.com:6543/postgres",
            Role::Destination,
            &rules,
        )
        .unwrap();
        MigrationJobSpec::builder(source, destination).build()
    }

    #[test]
    fn test_container_args() {
        let args = container_args(&ContainerSettings::default(), Path::new("/tmp/pgloader-x"));
        assert_eq!(
            args.join(" "),
            "run --rm --platform=linux/amd64 -v /tmp/pgloader-x:/tmp/pgloader ghcr.io/dimitri/pgloader:latest pgloader --no-ssl-cert-verification /tmp/pgloader/pgloader-config.load"
        );
    }

    #[tokio::test]
    async fn test_probe_missing_binary() {
        let runner = ProcessRunner::new(CancellationToken::new());
        let err = ensure_available(&runner, "definitely-not-a-container-runtime")
            .await
            .unwrap_err();
        assert!(matches!(err, MigratorError::DependencyMissing(_)));
    }

    #[tokio::test]
    async fn test_probe_failing_binary() {
        // `false --version` exits 1
        let runner = ProcessRunner::new(CancellationToken::new());
        let err = ensure_available(&runner, "false").await.unwrap_err();
        assert!(matches!(err, MigratorError::DependencyMissing(_)));
    }

    #[cfg(unix)]
    /// Writes an executable stand-in for the container runtime.
    fn fake_runtime(script: &str) -> (tempfile::TempDir, ContainerSettings) {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-runtime");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let settings = ContainerSettings {
            runtime: path.to_string_lossy().into_owned(),
            ..ContainerSettings::default()
        };
        (dir, settings)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_file_removed_after_success() {
        let (bin, settings) = fake_runtime(
            "#!/bin/sh\nmount=\"$5\"\ndir=\"${mount%%:*}\"\necho \"$dir\" > \"$(dirname \"$0\")/seen\"\ncat \"$dir/pgloader-config.load\"\n",
        );
        let runner = ProcessRunner::new(CancellationToken::new());

        let completed = run_migration(&runner, &settings, &spec()).await.unwrap();
        assert!(completed);

        let seen = std::fs::read_to_string(bin.path().join("seen")).unwrap();
        assert!(!Path::new(seen.trim()).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_file_removed_after_failure() {
        let (bin, settings) = fake_runtime(
            "#!/bin/sh\nmount=\"$5\"\necho \"${mount%%:*}\" > \"$(dirname \"$0\")/seen\"\nexit 12\n",
        );
        let runner = ProcessRunner::new(CancellationToken::new());

        let err = run_migration(&runner, &settings, &spec()).await.unwrap_err();
        match err {
            MigratorError::ProcessFailed { exit_code, .. } => assert_eq!(exit_code, Some(12)),
            other => panic!("expected ProcessFailed, got {:?}", other),
        }

        let seen = std::fs::read_to_string(bin.path().join("seen")).unwrap();
        assert!(!Path::new(seen.trim()).exists());
    }
}
