//! End-to-end synchronization scenarios against the simulated firmware.
//!
//! Run with: cargo test --package keykeeper-serial --test sync_scenarios

use std::sync::{Arc, Mutex};
use std::time::Duration;

use keykeeper_core::{BleAddress, Coin, Identity, Key128, SpaceKey};
use keykeeper_serial::mock::MockFirmware;
use keykeeper_serial::{
    ChannelStatusSink, CoinSession, LogAuthenticationHandler, PortError, SessionOutcome,
    Supervisor, SyncState, Synchronizer, TracingStatusSink,
};
use keykeeper_storage::{CredentialStore, Database};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const CENTRAL: &str = "EF:EF:5A:CB:C2:B6";
const PAUL: &str = "AA:BB:CC:DD:EE:FF";

fn addr(s: &str) -> BleAddress {
    s.parse().unwrap()
}

fn paul() -> Coin {
    let mut space_key = [0x11u8; 32];
    space_key[0] = 0x9F;
    Coin {
        address: addr(PAUL),
        irk: Key128::from_bytes([0xF9; 16]),
        ltk: Key128::from_bytes([0x62; 16]),
        space_key: SpaceKey::from_bytes(space_key),
    }
}

async fn store_with_paul(dir: &TempDir) -> Arc<CredentialStore> {
    let mut db = Database::with_identity(Identity {
        address: addr(CENTRAL),
        irk: Key128::from_bytes([0x67; 16]),
    });
    db.insert_coin("Paul", paul()).unwrap();

    let path = dir.path().join("keykeeper.json");
    db.save(&path, "").unwrap();
    Arc::new(CredentialStore::open(path, "").await.unwrap())
}

/// Run the initial reboot session so the next one enters ConfigSync.
async fn past_initial_reboot(
    store: Arc<CredentialStore>,
    firmware: &MockFirmware,
) -> Synchronizer<TracingStatusSink, LogAuthenticationHandler> {
    let mut sync = Synchronizer::new(store, TracingStatusSink, LogAuthenticationHandler);
    let outcome = sync.run_session(&mut firmware.connect()).await.unwrap();
    assert_eq!(outcome, SessionOutcome::InitialReboot);
    sync
}

/// Commands written after the initial reboot session.
fn sync_commands(firmware: &MockFirmware) -> Vec<String> {
    firmware.commands().into_iter().skip(1).collect()
}

/// Whether `done` was read between sending `command` and the next write.
fn awaited_done(firmware: &MockFirmware, command: &str) -> bool {
    let transcript = firmware.transcript();
    let Some(start) = transcript.iter().position(|e| *e == format!("> {command}")) else {
        return false;
    };
    transcript[start + 1..]
        .iter()
        .take_while(|e| !e.starts_with("> "))
        .any(|e| e == "< done")
}

#[tokio::test]
async fn test_first_connection_only_reboots() {
    let dir = TempDir::new().unwrap();
    let store = store_with_paul(&dir).await;
    let firmware = MockFirmware::new().with_identity(addr(CENTRAL));

    let mut sync = Synchronizer::new(store, TracingStatusSink, LogAuthenticationHandler);
    assert_eq!(sync.next_state(), SyncState::Boot);

    let outcome = sync.run_session(&mut firmware.connect()).await.unwrap();

    assert_eq!(outcome, SessionOutcome::InitialReboot);
    assert_eq!(firmware.commands(), vec!["reboot"]);
    assert_eq!(firmware.transcript()[1], "> ");
    assert_eq!(sync.next_state(), SyncState::ConfigSync);
}

#[tokio::test]
async fn test_scenario_a_matching_coin_is_left_alone() {
    let dir = TempDir::new().unwrap();
    let store = store_with_paul(&dir).await;
    let firmware = MockFirmware::new()
        .with_identity(addr(CENTRAL))
        .with_coin(addr(PAUL), 0x9F);

    let mut sync = past_initial_reboot(store, &firmware).await;
    let outcome = sync.run_session(&mut firmware.connect()).await.unwrap();

    assert_eq!(outcome, SessionOutcome::Rebooted);
    assert_eq!(
        sync_commands(&firmware),
        vec!["settings load", "stats bonds", "stats spacekey", "reboot"]
    );
    assert!(sync.is_config_synced());
    assert_eq!(sync.next_state(), SyncState::Running);
}

#[tokio::test]
async fn test_scenario_b_stale_space_key_is_replaced() {
    let dir = TempDir::new().unwrap();
    let store = store_with_paul(&dir).await;
    let firmware = MockFirmware::new()
        .with_identity(addr(CENTRAL))
        .with_coin(addr(PAUL), 0x00);

    let mut sync = past_initial_reboot(store, &firmware).await;
    sync.run_session(&mut firmware.connect()).await.unwrap();

    let coin = paul();
    let coin_add = format!(
        "coin add {PAUL} {} {} {}",
        coin.irk.to_hex(),
        coin.ltk.to_hex(),
        coin.space_key.to_hex()
    );
    assert_eq!(
        sync_commands(&firmware),
        vec![
            "settings load".to_string(),
            "stats bonds".to_string(),
            "stats spacekey".to_string(),
            format!("coin del {PAUL}"),
            coin_add,
            "reboot".to_string(),
        ]
    );
    assert!(awaited_done(&firmware, &format!("coin del {PAUL}")));
    assert_eq!(firmware.space_keys(), vec![(addr(PAUL), 0x9F)]);
}

#[tokio::test]
async fn test_scenario_c_foreign_identity_is_cleared_first() {
    let dir = TempDir::new().unwrap();
    let store = store_with_paul(&dir).await;
    let firmware = MockFirmware::new()
        .with_identity(addr("C0:00:00:00:00:01"))
        .with_coin(addr("C1:22:33:44:55:66"), 0x42);

    let mut sync = past_initial_reboot(store, &firmware).await;
    sync.run_session(&mut firmware.connect()).await.unwrap();

    let commands = sync_commands(&firmware);
    let corrective: Vec<&String> = commands
        .iter()
        .filter(|c| c.starts_with("settings clear") || c.starts_with("coin "))
        .collect();
    assert_eq!(corrective[0], "settings clear");
    assert!(corrective[1..].iter().all(|c| c.starts_with("coin ")));
    assert!(awaited_done(&firmware, "settings clear"));
}

#[tokio::test]
async fn test_blank_firmware_is_provisioned_and_then_converged() {
    let dir = TempDir::new().unwrap();
    let store = store_with_paul(&dir).await;
    let firmware = MockFirmware::new();

    let mut sync = past_initial_reboot(Arc::clone(&store), &firmware).await;
    sync.run_session(&mut firmware.connect()).await.unwrap();

    assert_eq!(firmware.identity(), Some(addr(CENTRAL)));
    assert_eq!(firmware.bonds(), vec![addr(PAUL)]);
    assert_eq!(firmware.space_keys(), vec![(addr(PAUL), 0x9F)]);
    assert!(awaited_done(&firmware, &format!("central_setup {CENTRAL} {}", "67".repeat(16))));

    // A restarted process finds nothing left to correct.
    let before = firmware.commands().len();
    let mut restarted = past_initial_reboot(store, &firmware).await;
    restarted.run_session(&mut firmware.connect()).await.unwrap();

    assert_eq!(
        firmware.commands()[before + 1..],
        ["settings load", "stats bonds", "stats spacekey", "reboot"]
    );
}

#[tokio::test]
async fn test_config_sync_pushes_coin_enrolled_by_another_process() {
    let dir = TempDir::new().unwrap();
    let store = store_with_paul(&dir).await;
    let firmware = MockFirmware::new()
        .with_identity(addr(CENTRAL))
        .with_coin(addr(PAUL), 0x9F);

    let mut sync = past_initial_reboot(Arc::clone(&store), &firmware).await;

    let admin = CredentialStore::open(store.path(), "").await.unwrap();
    let katja = admin.add_coin("Katja").await.unwrap();

    sync.run_session(&mut firmware.connect()).await.unwrap();

    let commands = sync_commands(&firmware);
    assert!(commands.iter().any(|c| c.starts_with(&format!("coin add {}", katja.address))));
    assert!(firmware.bonds().contains(&katja.address));
    assert_eq!(store.read().await.name_of(&katja.address), Some("Katja"));
}

#[tokio::test]
async fn test_unreadable_database_ends_config_sync() {
    let dir = TempDir::new().unwrap();
    let store = store_with_paul(&dir).await;
    let firmware = MockFirmware::new().with_identity(addr(CENTRAL));

    let mut sync = past_initial_reboot(Arc::clone(&store), &firmware).await;
    std::fs::write(store.path(), b"{ not json").unwrap();

    let result = sync.run_session(&mut firmware.connect()).await;

    assert!(matches!(result, Err(PortError::Storage(_))));
    assert_eq!(sync_commands(&firmware), Vec::<String>::new());
    assert_eq!(sync.next_state(), SyncState::ConfigSync);
}

#[tokio::test]
async fn test_running_tracks_coin_and_reports_authentication() {
    let dir = TempDir::new().unwrap();
    let store = store_with_paul(&dir).await;
    let firmware = MockFirmware::new()
        .with_identity(addr(CENTRAL))
        .with_coin(addr(PAUL), 0x9F)
        .with_events([
            format!("[00:00:05.000,000] <inf> app: Device found: [{PAUL}] (RSSI -60) (TYPE 0) (BONDED 1)"),
            format!("\x1b[1;32m[00:00:05.100,000] <inf> app: Connected: [{PAUL}]\x1b[0m"),
            "[00:00:05.300,000] <inf> app: Battery Level: 88%".to_string(),
            "[00:00:05.400,000] <inf> app: KEY AUTHENTICATED. OPEN DOOR PLEASE.".to_string(),
            format!("[00:00:06.000,000] <inf> app: Disconnected: [{PAUL}] (reason 19)"),
            "[00:00:07.000,000] <inf> app: KEY AUTHENTICATED. OPEN DOOR PLEASE.".to_string(),
        ]);

    let seen: Arc<Mutex<Vec<Option<CoinSession>>>> = Arc::default();
    let recorder = Arc::clone(&seen);
    let mut sync = Synchronizer::new(store, TracingStatusSink, move |coin: Option<&CoinSession>| {
        recorder.lock().unwrap().push(coin.cloned());
    });

    sync.run_session(&mut firmware.connect()).await.unwrap();
    sync.run_session(&mut firmware.connect()).await.unwrap();
    assert_eq!(sync.next_state(), SyncState::Running);

    let result = sync.run_session(&mut firmware.connect()).await;
    assert!(matches!(result, Err(PortError::Closed)));
    assert_eq!(firmware.commands().last().unwrap(), "ble_start");

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            Some(CoinSession {
                address: addr(PAUL),
                battery_level: Some(88),
            }),
            None,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_done_times_out() {
    let dir = TempDir::new().unwrap();
    let store = store_with_paul(&dir).await;
    let firmware = MockFirmware::new()
        .with_identity(addr(CENTRAL))
        .withhold_done("coin add")
        .hang_when_idle();

    let mut sync = past_initial_reboot(store, &firmware)
        .await
        .sentinel_timeout(Duration::from_secs(3));

    let result = sync.run_session(&mut firmware.connect()).await;

    match result {
        Err(PortError::Timeout {
            waiting_for,
            timeout_ms,
        }) => {
            assert_eq!(waiting_for, "coin add");
            assert_eq!(timeout_ms, 3000);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(!sync.is_config_synced());
    assert_eq!(sync.next_state(), SyncState::ConfigSync);
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_reconnects_until_shutdown() {
    let dir = TempDir::new().unwrap();
    let store = store_with_paul(&dir).await;
    let firmware = MockFirmware::new()
        .refuse_connections(1)
        .with_events(["<inf> app: KEY AUTHENTICATED. OPEN DOOR PLEASE."]);

    let shutdown = CancellationToken::new();
    let on_auth = {
        let shutdown = shutdown.clone();
        move |_: Option<&CoinSession>| shutdown.cancel()
    };

    let (sink, receivers) = ChannelStatusSink::new();
    let synchronizer = Synchronizer::new(store, sink, on_auth);
    let mut supervisor = Supervisor::new(firmware.clone(), synchronizer, shutdown.clone())
        .reconnect_delay(Duration::from_secs(1));

    tokio::time::timeout(Duration::from_secs(60), supervisor.run())
        .await
        .expect("supervisor stops after shutdown");

    assert!(shutdown.is_cancelled());
    assert_eq!(firmware.connections(), 3);
    assert_eq!(firmware.reboots(), 2);
    assert_eq!(firmware.identity(), Some(addr(CENTRAL)));
    assert_eq!(firmware.bonds(), vec![addr(PAUL)]);
    assert!(supervisor.synchronizer().is_config_synced());
    assert_eq!(*receivers.central.borrow(), "Stopped");
}
