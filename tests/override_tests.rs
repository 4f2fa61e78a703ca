//! Override Tests for unitfleet
//!
//! Drop-in overrides on fake hosts: apply with backups, read back, roll back,
//! restore specific backups, remove, and the validation that guards them.

mod common;

use std::sync::Arc;

use common::*;
use pretty_assertions::assert_eq;
use unitfleet::error::Error;
use unitfleet::fleet::{ApplyOptions, FleetManager, RollbackOptions};
use unitfleet::model::{ManagedUnit, RecordId, UnitSource};
use unitfleet::synth::{render_override, OverrideConfig, RestartPolicy};

const DROPIN_DIR: &str = "/etc/systemd/system/nginx.service.d";
const DROPIN: &str = "/etc/systemd/system/nginx.service.d/override.conf";

fn temp_prefix() -> String {
    format!("{}.tmp_", DROPIN)
}

fn limits() -> OverrideConfig {
    let mut config = OverrideConfig {
        restart: Some(RestartPolicy::Always),
        restart_sec: Some(5),
        ..OverrideConfig::default()
    };
    config.environment.insert("WORKER_PROCESSES".into(), "4".into());
    config
}

fn tuned() -> OverrideConfig {
    OverrideConfig {
        exec_start: Some("/usr/sbin/nginx -g 'daemon off;'".into()),
        timeout_stop_sec: Some(30),
        ..OverrideConfig::default()
    }
}

/// A fleet with one host running nginx, discovered.
async fn nginx_fleet() -> (Arc<FakeFleet>, Arc<FakeHost>, FleetManager, RecordId) {
    let hosts = Arc::new(FakeFleet::new());
    let remote = hosts.add(
        FakeHost::new("web-1")
            .with_unit("nginx.service", FakeUnit::running("nginx").exec("/usr/sbin/nginx")),
    );
    let fleet = fleet_with(&hosts);
    let host = register(&fleet, "web-1").await;
    fleet.discover_units(host.id, false).await.unwrap();
    let unit = unit_named(&fleet, host.id, "nginx").await;
    remote.clear_log();
    (hosts, remote, fleet, unit.id)
}

// ============================================================================
// Apply
// ============================================================================

#[tokio::test]
async fn test_apply_installs_dropin_and_restarts() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;

    let outcome = fleet
        .apply_override(unit_id, &limits(), ApplyOptions::default())
        .await
        .unwrap();
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "Override configuration applied successfully");
    assert_eq!(outcome.override_path.as_deref(), Some(DROPIN));
    assert_eq!(outcome.backup_path, None);
    assert_eq!(outcome.preview, Some(render_override(&limits())));
    assert!(outcome.changes_applied.contains(&"restart nginx.service".to_string()));
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);

    assert_eq!(remote.file(DROPIN), Some(render_override(&limits())));
    assert!(remote.files_under(&temp_prefix()).is_empty());
    assert_eq!(remote.daemon_reloads(), 1);

    // The temporary file sits next to the drop-in and is renamed over it
    let writes = remote.commands_matching(&format!("sudo tee {}", temp_prefix()));
    assert_eq!(writes.len(), 1);
    let installs = remote.commands_matching(&format!("sudo mv -f {}", temp_prefix()));
    assert_eq!(installs.len(), 1);
    assert!(installs[0].ends_with(&format!(" {}", DROPIN)), "{}", installs[0]);
    assert!(remote.commands_matching("/tmp/").is_empty());

    let record = fleet.store().get_unit(unit_id).await.unwrap().unwrap();
    assert_eq!(record.override_config, Some(limits()));

    let content = fleet.get_override_content(unit_id).await.unwrap();
    assert!(content.exists);
    assert_eq!(content.path, DROPIN);
    assert_eq!(content.content, Some(render_override(&limits())));
}

#[tokio::test]
async fn test_reapply_backs_up_previous_dropin() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    fleet
        .apply_override(unit_id, &limits(), ApplyOptions::default())
        .await
        .unwrap();

    let outcome = fleet
        .apply_override(unit_id, &tuned(), ApplyOptions::default())
        .await
        .unwrap();
    assert!(outcome.success, "{}", outcome.message);

    let backup = outcome.backup_path.expect("a backup of the first drop-in");
    assert!(backup.starts_with(&format!("{}.backup_", DROPIN)), "{}", backup);
    assert_eq!(remote.file(&backup), Some(render_override(&limits())));
    assert_eq!(remote.file(DROPIN), Some(render_override(&tuned())));

    let backups = fleet.list_override_backups(unit_id).await.unwrap();
    assert_eq!(backups, vec![backup]);
}

#[tokio::test]
async fn test_back_to_back_applies_keep_every_backup() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    let mut backups = Vec::new();
    for restart_sec in 1..=3 {
        let config = OverrideConfig {
            restart_sec: Some(restart_sec),
            ..OverrideConfig::default()
        };
        let outcome = fleet
            .apply_override(unit_id, &config, ApplyOptions::default())
            .await
            .unwrap();
        assert!(outcome.success, "{}", outcome.message);
        backups.extend(outcome.backup_path);
    }

    assert_eq!(backups.len(), 2);
    assert_ne!(backups[0], backups[1]);
    assert_eq!(remote.file(&backups[0]).as_deref(), Some("[Service]\nRestartSec=1\n"));
    assert_eq!(remote.file(&backups[1]).as_deref(), Some("[Service]\nRestartSec=2\n"));

    let listed = fleet.list_override_backups(unit_id).await.unwrap();
    assert_eq!(listed, vec![backups[1].clone(), backups[0].clone()]);
}

#[tokio::test]
async fn test_apply_without_backup() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    let options = ApplyOptions {
        create_backup: false,
        ..ApplyOptions::default()
    };
    fleet.apply_override(unit_id, &limits(), options).await.unwrap();
    let outcome = fleet.apply_override(unit_id, &tuned(), options).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.backup_path, None);
    assert_eq!(remote.files_under(DROPIN_DIR), vec![DROPIN.to_string()]);
    assert!(fleet.list_override_backups(unit_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_apply_to_inactive_unit_does_not_restart() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    remote.set_unit_state("nginx.service", "inactive");
    fleet.refresh_unit_status(unit_id).await.unwrap();

    let outcome = fleet
        .apply_override(unit_id, &limits(), ApplyOptions::default())
        .await
        .unwrap();
    assert!(outcome.success);
    assert!(remote.commands_matching("systemctl restart").is_empty());
}

#[tokio::test]
async fn test_failed_restart_is_a_warning() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    remote.fail_on("systemctl restart", 1, "Job for nginx.service failed");

    let outcome = fleet
        .apply_override(unit_id, &limits(), ApplyOptions::default())
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(
        outcome.warnings,
        vec!["Failed to restart nginx.service: Job for nginx.service failed".to_string()]
    );
    assert!(remote.has_file(DROPIN));
}

#[tokio::test]
async fn test_failed_install_leaves_live_file_alone() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    fleet
        .apply_override(unit_id, &limits(), ApplyOptions::default())
        .await
        .unwrap();

    remote.fail_on("mv -f", 1, "Permission denied");
    let outcome = fleet
        .apply_override(unit_id, &tuned(), ApplyOptions::default())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Failed to install override"), "{}", outcome.message);

    assert_eq!(remote.file(DROPIN), Some(render_override(&limits())));
    // The temporary file is cleaned up
    assert!(remote.files_under(&temp_prefix()).is_empty());

    let record = fleet.store().get_unit(unit_id).await.unwrap().unwrap();
    assert_eq!(record.override_config, Some(limits()));
}

#[tokio::test]
async fn test_validate_only_changes_nothing() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    let config = OverrideConfig {
        user: Some("ghost".into()),
        working_directory: Some("/srv/www".into()),
        ..OverrideConfig::default()
    };
    let options = ApplyOptions {
        validate_only: true,
        ..ApplyOptions::default()
    };

    let outcome = fleet.apply_override(unit_id, &config, options).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Override configuration is invalid");
    assert_eq!(outcome.preview, Some(render_override(&config)));

    let report = outcome.validation.unwrap();
    assert_eq!(report.errors, vec!["User does not exist: ghost".to_string()]);
    assert_eq!(
        report.warnings,
        vec!["Working directory does not exist: /srv/www".to_string()]
    );

    assert!(!remote.has_dir(DROPIN_DIR));
    assert!(remote.commands_matching("tee").is_empty());
}

#[tokio::test]
async fn test_invalid_override_is_not_applied() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    let config = OverrideConfig {
        group: Some("nogroup-here".into()),
        ..OverrideConfig::default()
    };

    let outcome = fleet
        .apply_override(unit_id, &config, ApplyOptions::default())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(
        outcome.message,
        "Validation failed: Group does not exist: nogroup-here"
    );
    assert!(!remote.has_file(DROPIN));
}

#[tokio::test]
async fn test_override_for_unit_missing_on_host() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    let host_id = fleet.store().get_unit(unit_id).await.unwrap().unwrap().host_id;
    let ghost = fleet
        .store()
        .save_unit(ManagedUnit::new(host_id, "ghost.service", UnitSource::Created))
        .await
        .unwrap();

    let outcome = fleet
        .apply_override(ghost.id, &limits(), ApplyOptions::default())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(
        outcome.validation.unwrap().errors,
        vec!["Service ghost does not exist on the server".to_string()]
    );
    assert!(remote.commands_matching("mkdir").is_empty());
}

#[tokio::test]
async fn test_deferred_apply_only_records() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    let options = ApplyOptions {
        apply_immediately: false,
        ..ApplyOptions::default()
    };

    let outcome = fleet.apply_override(unit_id, &limits(), options).await.unwrap();
    assert!(outcome.success);
    assert!(remote.commands().is_empty());

    let record = fleet.store().get_unit(unit_id).await.unwrap().unwrap();
    assert_eq!(record.override_config, Some(limits()));
}

#[tokio::test]
async fn test_empty_override_is_rejected() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    assert!(matches!(
        fleet
            .apply_override(unit_id, &OverrideConfig::default(), ApplyOptions::default())
            .await,
        Err(Error::Configuration(_))
    ));
    assert!(remote.commands().is_empty());
}

#[tokio::test]
async fn test_override_on_unmanaged_unit_is_refused() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    let mut unit = fleet.store().get_unit(unit_id).await.unwrap().unwrap();
    unit.is_managed = false;
    fleet.store().save_unit(unit).await.unwrap();

    let outcome = fleet
        .apply_override(unit_id, &limits(), ApplyOptions::default())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.contains("not managed"));
    assert!(remote.commands().is_empty());
}

// ============================================================================
// Rollback, Restore and Remove
// ============================================================================

#[tokio::test]
async fn test_rollback_restores_newest_backup() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    fleet
        .apply_override(unit_id, &limits(), ApplyOptions::default())
        .await
        .unwrap();
    let second = fleet
        .apply_override(unit_id, &tuned(), ApplyOptions::default())
        .await
        .unwrap();
    let backup = second.backup_path.unwrap();

    let outcome = fleet
        .rollback_override(unit_id, RollbackOptions::default())
        .await
        .unwrap();
    assert!(outcome.success, "{}", outcome.message);
    assert!(outcome.changes_applied.contains(&format!("restore {}", backup)));
    assert_eq!(remote.file(DROPIN), Some(render_override(&limits())));
    assert_eq!(outcome.backup_path, None);
    assert!(!remote.has_file(&backup));

    let record = fleet.store().get_unit(unit_id).await.unwrap().unwrap();
    assert_eq!(record.override_config, None);
}

#[tokio::test]
async fn test_repeated_rollbacks_step_back_through_history() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    for config in [limits(), tuned()] {
        fleet
            .apply_override(unit_id, &config, ApplyOptions::default())
            .await
            .unwrap();
    }
    let latest = OverrideConfig {
        restart_sec: Some(9),
        ..OverrideConfig::default()
    };
    fleet
        .apply_override(unit_id, &latest, ApplyOptions::default())
        .await
        .unwrap();
    assert_eq!(fleet.list_override_backups(unit_id).await.unwrap().len(), 2);

    let first = fleet
        .rollback_override(unit_id, RollbackOptions::default())
        .await
        .unwrap();
    assert!(first.success, "{}", first.message);
    assert_eq!(remote.file(DROPIN), Some(render_override(&tuned())));

    let second = fleet
        .rollback_override(unit_id, RollbackOptions::default())
        .await
        .unwrap();
    assert!(second.success, "{}", second.message);
    assert_eq!(remote.file(DROPIN), Some(render_override(&limits())));

    let third = fleet
        .rollback_override(unit_id, RollbackOptions::default())
        .await
        .unwrap();
    assert!(!third.success);
    assert_eq!(third.message, "No override backup available to restore");
    assert_eq!(remote.file(DROPIN), Some(render_override(&limits())));
}

#[tokio::test]
async fn test_rollback_without_backup_fails() {
    let (_hosts, _remote, fleet, unit_id) = nginx_fleet().await;
    let outcome = fleet
        .rollback_override(unit_id, RollbackOptions::default())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "No override backup available to restore");
}

#[tokio::test]
async fn test_rollback_with_restart() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    fleet
        .apply_override(unit_id, &limits(), ApplyOptions::default())
        .await
        .unwrap();
    remote.clear_log();

    let options = RollbackOptions {
        remove_override: true,
        restart_after: true,
    };
    let outcome = fleet.rollback_override(unit_id, options).await.unwrap();
    assert!(outcome.success);
    assert_eq!(
        remote.commands_matching("systemctl restart"),
        vec!["sudo systemctl restart nginx.service"]
    );
}

#[tokio::test]
async fn test_remove_override_deletes_file_and_directory() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    let options = ApplyOptions {
        create_backup: false,
        ..ApplyOptions::default()
    };
    fleet.apply_override(unit_id, &limits(), options).await.unwrap();
    let reloads = remote.daemon_reloads();

    let outcome = fleet
        .rollback_override(
            unit_id,
            RollbackOptions {
                remove_override: true,
                restart_after: false,
            },
        )
        .await
        .unwrap();
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "Override configuration removed successfully");
    assert!(!remote.has_file(DROPIN));
    assert!(!remote.has_dir(DROPIN_DIR));
    assert_eq!(remote.daemon_reloads(), reloads + 1);

    let content = fleet.get_override_content(unit_id).await.unwrap();
    assert!(!content.exists);
    assert_eq!(content.content, None);
}

#[tokio::test]
async fn test_remove_override_keeps_backups() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    fleet
        .apply_override(unit_id, &limits(), ApplyOptions::default())
        .await
        .unwrap();
    let second = fleet
        .apply_override(unit_id, &tuned(), ApplyOptions::default())
        .await
        .unwrap();
    let backup = second.backup_path.unwrap();

    let options = RollbackOptions {
        remove_override: true,
        restart_after: false,
    };
    let outcome = fleet.rollback_override(unit_id, options).await.unwrap();
    assert!(outcome.success);
    assert!(!remote.has_file(DROPIN));
    assert!(remote.has_file(&backup));
    assert!(remote.has_dir(DROPIN_DIR));
}

#[tokio::test]
async fn test_remove_missing_override_succeeds() {
    let (_hosts, _remote, fleet, unit_id) = nginx_fleet().await;
    let options = RollbackOptions {
        remove_override: true,
        restart_after: false,
    };
    let outcome = fleet.rollback_override(unit_id, options).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.message, "No override configuration found to remove");
}

#[tokio::test]
async fn test_restore_specific_backup() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;
    remote.put_file(DROPIN, "[Service]\nRestart=always\n");
    let backup = format!("{}.backup_20240101_120000", DROPIN);
    remote.put_file(&backup, "[Service]\nRestart=no\n");

    let outcome = fleet.restore_override_backup(unit_id, &backup).await.unwrap();
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(remote.file(DROPIN).as_deref(), Some("[Service]\nRestart=no\n"));

    // The replaced drop-in was backed up first
    let replaced = outcome.backup_path.unwrap();
    assert_ne!(replaced, backup);
    assert_eq!(remote.file(&replaced).as_deref(), Some("[Service]\nRestart=always\n"));

    let backups = fleet.list_override_backups(unit_id).await.unwrap();
    assert_eq!(backups, vec![replaced, backup]);
}

#[tokio::test]
async fn test_restore_rejects_paths_that_are_not_backups() {
    let (_hosts, remote, fleet, unit_id) = nginx_fleet().await;

    for path in [
        "/etc/shadow",
        DROPIN,
        "/etc/systemd/system/nginx.service.d/override.conf.backup_x/../../../shadow",
    ] {
        assert!(
            matches!(
                fleet.restore_override_backup(unit_id, path).await,
                Err(Error::Configuration(_))
            ),
            "{} was accepted",
            path
        );
    }
    assert!(remote.commands().is_empty());
}

#[tokio::test]
async fn test_restore_missing_backup_fails() {
    let (_hosts, _remote, fleet, unit_id) = nginx_fleet().await;
    let backup = format!("{}.backup_20240101_120000", DROPIN);

    let outcome = fleet.restore_override_backup(unit_id, &backup).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, format!("Backup file not found: {}", backup));
}
