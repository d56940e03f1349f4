//! Planning the commands that bring the firmware in line with the database.
//!
//! The planner is a pure function of what the firmware reported and what
//! the database holds. It is convergent rather than transactional: every
//! rule below only looks at the snapshot, and executing its output then
//! re-reading the firmware yields an empty plan.
//!
//! Rules, in order:
//!
//! 1. Firmware identity differs from the database identity: `settings
//!    clear` if the firmware has one, `central_setup` if it has none.
//! 2. Bond and space key tables differ in length: `settings clear`.
//! 3. Walking both tables pairwise: rows naming different addresses cause a
//!    `settings clear`; a bond that is not in the database, or whose space
//!    key prefix disagrees with the database, is deleted with `coin del`;
//!    anything else is confirmed.
//! 4. Every database coin not confirmed is added with `coin add`, in
//!    address order.

use std::collections::BTreeSet;

use keykeeper_core::BleAddress;
use keykeeper_protocol::Command;
use keykeeper_storage::Database;

use crate::session::SessionContext;

/// Corrective commands for the firmware state in `snapshot`.
pub fn plan_reconciliation(snapshot: &SessionContext, db: &Database) -> Vec<Command> {
    let mut plan = Vec::new();
    let identity = db.identity();

    match snapshot.firmware_identity {
        Some(address) if address == identity.address => {}
        Some(_) => plan.push(Command::SettingsClear),
        None => plan.push(Command::central_setup(identity)),
    }

    if snapshot.bonds.len() != snapshot.space_keys.len() {
        plan.push(Command::SettingsClear);
    }

    let mut confirmed: BTreeSet<BleAddress> = BTreeSet::new();
    for (bond, space_key) in snapshot.bonds.iter().zip(&snapshot.space_keys) {
        if bond.address != space_key.address {
            plan.push(Command::SettingsClear);
        }

        match db.coin(&bond.address) {
            Some(coin) if coin.space_key_prefix() == space_key.prefix => {
                confirmed.insert(bond.address);
            }
            _ => plan.push(Command::CoinDel(bond.address)),
        }
    }

    plan.extend(
        db.coins()
            .values()
            .filter(|coin| !confirmed.contains(&coin.address))
            .map(Command::coin_add),
    );

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use keykeeper_core::{Coin, Identity, Key128, SpaceKey};
    use keykeeper_protocol::{Bond, SpaceKeyRecord};
    use rstest::rstest;

    const CENTRAL: &str = "EF:EF:5A:CB:C2:B6";

    fn addr(s: &str) -> BleAddress {
        s.parse().unwrap()
    }

    fn coin(address: &str, prefix: u8) -> Coin {
        let mut space_key = [0x55u8; 32];
        space_key[0] = prefix;
        Coin {
            address: addr(address),
            irk: Key128::from_bytes([0x01; 16]),
            ltk: Key128::from_bytes([0x02; 16]),
            space_key: SpaceKey::from_bytes(space_key),
        }
    }

    fn database(coins: &[(&str, &str, u8)]) -> Database {
        let mut db = Database::with_identity(Identity {
            address: addr(CENTRAL),
            irk: Key128::from_bytes([0xAA; 16]),
        });
        for (name, address, prefix) in coins {
            db.insert_coin(name, coin(address, *prefix)).unwrap();
        }
        db
    }

    fn snapshot(bonds: &[&str], space_keys: &[(&str, u8)]) -> SessionContext {
        SessionContext {
            firmware_identity: Some(addr(CENTRAL)),
            bonds: bonds.iter().map(|a| Bond { address: addr(a) }).collect(),
            space_keys: space_keys
                .iter()
                .map(|(a, prefix)| SpaceKeyRecord {
                    address: addr(a),
                    prefix: *prefix,
                })
                .collect(),
            current_coin: None,
        }
    }

    #[test]
    fn test_converged_state_plans_nothing() {
        let db = database(&[("Paul", "AA:BB:CC:DD:EE:FF", 0x9F)]);
        let snap = snapshot(&["AA:BB:CC:DD:EE:FF"], &[("AA:BB:CC:DD:EE:FF", 0x9F)]);

        assert!(plan_reconciliation(&snap, &db).is_empty());
    }

    #[test]
    fn test_prefix_mismatch_deletes_then_adds() {
        let db = database(&[("Paul", "AA:BB:CC:DD:EE:FF", 0x9F)]);
        let snap = snapshot(&["AA:BB:CC:DD:EE:FF"], &[("AA:BB:CC:DD:EE:FF", 0x00)]);

        let plan = plan_reconciliation(&snap, &db);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], Command::CoinDel(addr("AA:BB:CC:DD:EE:FF")));
        assert_eq!(plan[1], Command::coin_add(db.coin(&addr("AA:BB:CC:DD:EE:FF")).unwrap()));
    }

    #[test]
    fn test_foreign_identity_clears_first() {
        let db = database(&[("Paul", "AA:BB:CC:DD:EE:FF", 0x9F)]);
        let mut snap = snapshot(&["AA:BB:CC:DD:EE:FF"], &[("AA:BB:CC:DD:EE:FF", 0x9F)]);
        snap.firmware_identity = Some(addr("C0:00:00:00:00:01"));

        let plan = plan_reconciliation(&snap, &db);
        assert_eq!(plan, vec![Command::SettingsClear]);
    }

    #[rstest]
    #[case::matching(Some(CENTRAL), None)]
    #[case::foreign(Some("C0:00:00:00:00:01"), Some("settings clear"))]
    #[case::blank(None, Some("central_setup"))]
    fn test_identity_correction(
        #[case] firmware_identity: Option<&str>,
        #[case] expected_verb: Option<&str>,
    ) {
        let db = database(&[]);
        let mut snap = snapshot(&[], &[]);
        snap.firmware_identity = firmware_identity.map(addr);

        let plan = plan_reconciliation(&snap, &db);
        assert_eq!(plan.first().map(Command::verb), expected_verb);
        assert!(plan.len() <= 1);
    }

    #[test]
    fn test_blank_firmware_gets_identity_and_coins() {
        let db = database(&[
            ("Paul", "EC:EB:CE:D9:FE:14", 0x9F),
            ("Katja", "DA:51:85:04:E5:47", 0x10),
        ]);
        let mut snap = snapshot(&[], &[]);
        snap.firmware_identity = None;

        let plan = plan_reconciliation(&snap, &db);
        let verbs: Vec<String> = plan.iter().map(|c| c.to_string()).collect();
        assert_eq!(
            verbs,
            vec![
                format!("central_setup {CENTRAL} <irk>"),
                "coin add DA:51:85:04:E5:47 <irk> <ltk> <spacekey>".to_string(),
                "coin add EC:EB:CE:D9:FE:14 <irk> <ltk> <spacekey>".to_string(),
            ]
        );
    }

    #[test]
    fn test_unknown_bond_is_deleted() {
        let db = database(&[]);
        let snap = snapshot(&["C1:00:00:00:00:01"], &[("C1:00:00:00:00:01", 0x12)]);

        assert_eq!(
            plan_reconciliation(&snap, &db),
            vec![Command::CoinDel(addr("C1:00:00:00:00:01"))]
        );
    }

    #[test]
    fn test_table_length_mismatch_clears() {
        let db = database(&[("Paul", "AA:BB:CC:DD:EE:FF", 0x9F)]);
        let snap = snapshot(
            &["AA:BB:CC:DD:EE:FF", "C1:00:00:00:00:01"],
            &[("AA:BB:CC:DD:EE:FF", 0x9F)],
        );

        let plan = plan_reconciliation(&snap, &db);
        assert_eq!(plan[0], Command::SettingsClear);
        // zip stops at the shorter table, so Paul is still confirmed
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_pairwise_address_mismatch_clears() {
        let db = database(&[
            ("Paul", "AA:BB:CC:DD:EE:FF", 0x9F),
            ("Katja", "C1:00:00:00:00:01", 0x12),
        ]);
        let snap = snapshot(
            &["AA:BB:CC:DD:EE:FF", "C1:00:00:00:00:01"],
            &[("C1:00:00:00:00:01", 0x12), ("AA:BB:CC:DD:EE:FF", 0x9F)],
        );

        let paul = db.coin(&addr("AA:BB:CC:DD:EE:FF")).unwrap();
        let katja = db.coin(&addr("C1:00:00:00:00:01")).unwrap();
        assert_eq!(
            plan_reconciliation(&snap, &db),
            vec![
                Command::SettingsClear,
                Command::CoinDel(paul.address),
                Command::SettingsClear,
                Command::CoinDel(katja.address),
                Command::coin_add(paul),
                Command::coin_add(katja),
            ]
        );
    }

    #[test]
    fn test_plan_is_idempotent_after_applying() {
        let db = database(&[
            ("Paul", "EC:EB:CE:D9:FE:14", 0x9F),
            ("Katja", "DA:51:85:04:E5:47", 0x10),
        ]);
        let snap = snapshot(
            &["EC:EB:CE:D9:FE:14", "C1:00:00:00:00:01"],
            &[("EC:EB:CE:D9:FE:14", 0x9F), ("C1:00:00:00:00:01", 0x77)],
        );

        let plan = plan_reconciliation(&snap, &db);
        assert_eq!(plan.len(), 2);

        // Firmware after executing the plan: the stale bond is gone and the
        // missing coin was appended.
        let converged = snapshot(
            &["EC:EB:CE:D9:FE:14", "DA:51:85:04:E5:47"],
            &[("EC:EB:CE:D9:FE:14", 0x9F), ("DA:51:85:04:E5:47", 0x10)],
        );
        assert!(plan_reconciliation(&converged, &db).is_empty());
    }
}
