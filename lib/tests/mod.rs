use std::collections::BTreeSet;

use crate::memory::{MemoryEntry, RefMap, UserDefined, Value};
use crate::updater::Updater;
use crate::workspace::{EntryView, Workspace};
use crate::Error;

fn workspace(len: usize) -> Workspace {
    Workspace::default()
        .with_block("data", (0..len).map(|i| i as u8).collect(), 0x1000)
        .unwrap()
}

fn entry(address: u64, length: u64) -> MemoryEntry {
    MemoryEntry::new(
        address,
        length,
        format!("uint{}", length * 8),
        Value::Unsigned(address),
    )
    .unwrap()
}

fn refs(ref_type: &str, tos: &[u64]) -> RefMap {
    let mut refs = RefMap::new();
    refs.insert(ref_type.to_string(), tos.iter().cloned().collect());
    refs
}

fn set(values: &[u64]) -> BTreeSet<u64> {
    values.iter().cloned().collect()
}

fn define(workspace: &mut Workspace, address: u64, length: u64, refs: &RefMap) {
    workspace
        .transaction(|workspace| workspace.define("data", entry(address, length), refs))
        .unwrap();
}

fn entries(workspace: &Workspace) -> Vec<EntryView> {
    let len = workspace.block("data").unwrap().len();
    workspace.get("data", 0, len, None).unwrap().entries
}

fn defined(workspace: &Workspace) -> Vec<u64> {
    workspace
        .block("data")
        .unwrap()
        .entries()
        .iter()
        .map(|entry| entry.address())
        .collect()
}

fn assert_consistent(workspace: &Workspace) {
    for name in workspace.block_names() {
        let block = workspace.block(name).unwrap();
        assert!(block.refs().is_consistent(), "refs of {} diverged", name);
        block.validate().unwrap();
    }
    assert!(workspace.log().is_consistent());
}

#[test]
fn define_in_separate_transactions() {
    let mut workspace = workspace(0x100);
    define(&mut workspace, 0, 2, &RefMap::new());
    define(&mut workspace, 2, 2, &RefMap::new());
    assert_eq!(workspace.revision(), 2);

    let query = workspace.get("data", 0, 0xFF, None).unwrap();
    assert_eq!(query.revision, 2);
    assert_eq!(query.entries[0].address, 0);
    assert_eq!(query.entries[0].length, 2);
    assert_eq!(query.entries[0].type_name, "uint16");
    assert_eq!(query.entries[1].address, 2);
    assert_eq!(query.entries[1].length, 2);
    assert_eq!(query.entries[2].address, 4);
    assert_eq!(query.entries[2].type_name, "uint8_t");
    assert_eq!(query.entries.len(), 2 + 0xFF - 4);
}

#[test]
fn overlapping_define_replaces() {
    let mut workspace = workspace(0x10);
    define(&mut workspace, 0, 2, &RefMap::new());
    define(&mut workspace, 1, 1, &RefMap::new());

    let query = workspace.get("data", 0, 2, None).unwrap();
    assert_eq!(query.entries.len(), 2);
    assert_eq!(query.entries[0].address, 0);
    assert_eq!(query.entries[0].type_name, "uint8_t");
    assert_eq!(query.entries[0].value, Value::Unsigned(0));
    assert_eq!(query.entries[1].address, 1);
    assert_eq!(query.entries[1].type_name, "uint8");
    assert_eq!(defined(&workspace), vec![1]);
}

#[test]
fn refs_show_as_xrefs_on_undefined_bytes() {
    let mut workspace = workspace(0x20);
    define(&mut workspace, 0, 2, &refs("code", &[0x10]));

    let query = workspace.get("data", 0x10, 1, None).unwrap();
    assert_eq!(query.entries.len(), 1);
    let target = &query.entries[0];
    assert_eq!(target.type_name, "uint8_t");
    assert!(target.refs.is_empty());
    assert_eq!(target.xrefs, refs("code", &[0]));
    assert_eq!(workspace.get_entry("data", 1).unwrap().refs, refs("code", &[0x10]));
}

#[test]
fn undo_three_redo_one() {
    let mut workspace = workspace(0x10);
    define(&mut workspace, 0x00, 2, &RefMap::new());
    define(&mut workspace, 0x02, 2, &RefMap::new());
    define(&mut workspace, 0x04, 2, &RefMap::new());

    assert!(workspace.undo().unwrap());
    assert!(workspace.undo().unwrap());
    assert!(workspace.undo().unwrap());
    assert_eq!(workspace.revision(), 6);
    assert!(defined(&workspace).is_empty());
    assert!(!workspace.undo().unwrap());
    assert_eq!(workspace.revision(), 6);

    assert!(workspace.redo().unwrap());
    assert_eq!(workspace.revision(), 7);
    assert_eq!(defined(&workspace), vec![0]);
}

#[test]
fn delete_block_undo() {
    let mut workspace = Workspace::default();
    let raw = vec![0x61, 0x61, 0x61, 0x61, 0x00, 0xFF];
    workspace
        .transaction(|workspace| workspace.create_block("aaaa", raw.clone(), 0x400000))
        .unwrap();
    workspace
        .transaction(|workspace| workspace.delete_block("aaaa"))
        .unwrap();
    assert!(matches!(
        workspace.block("aaaa"),
        Err(Error::UnknownBlock(_))
    ));

    assert!(workspace.undo().unwrap());
    let block = workspace.block("aaaa").unwrap();
    assert_eq!(block.name(), "aaaa");
    assert_eq!(block.raw(), raw.as_slice());
    assert_eq!(block.base_address(), 0x400000);

    assert!(workspace.undo().unwrap());
    assert!(workspace.block_names().is_empty());
    assert!(workspace.redo().unwrap());
    assert_eq!(workspace.block("aaaa").unwrap().raw(), raw.as_slice());
}

#[test]
fn delete_block_with_entries_and_refs() {
    let mut workspace = workspace(0x10);
    define(&mut workspace, 0, 4, &refs("data", &[8, 12]));
    workspace
        .transaction(|workspace| workspace.set_comment("data", 8, Some("target".to_string())))
        .unwrap();
    let before = entries(&workspace);

    workspace
        .transaction(|workspace| workspace.delete_block("data"))
        .unwrap();
    assert!(workspace.block_names().is_empty());

    assert!(workspace.undo().unwrap());
    assert_eq!(entries(&workspace), before);
    assert_consistent(&workspace);
}

#[test]
fn block_errors() {
    let mut workspace = workspace(4);
    let result = workspace.transaction(|workspace| workspace.create_block("data", vec![0], 0));
    assert!(matches!(result, Err(Error::DuplicateBlock(ref name)) if name == "data"));
    let result = workspace.transaction(|workspace| workspace.undefine("nope", 0, 1));
    assert!(matches!(result, Err(Error::UnknownBlock(ref name)) if name == "nope"));
    assert!(matches!(
        workspace.get("nope", 0, 1, None),
        Err(Error::UnknownBlock(_))
    ));
    assert!(matches!(
        Workspace::default().with_block("a", vec![], 0).unwrap().with_block("a", vec![], 0),
        Err(Error::DuplicateBlock(_))
    ));
    assert_eq!(workspace.revision(), 0);
}

#[test]
fn transaction_state_errors() {
    let mut workspace = workspace(4);
    assert!(matches!(
        workspace.define("data", entry(0, 1), &RefMap::new()),
        Err(Error::NotInTransaction)
    ));
    assert!(matches!(
        workspace.set_comment("data", 0, None),
        Err(Error::NotInTransaction)
    ));
    assert!(matches!(workspace.transaction_end(), Err(Error::NotInTransaction)));

    workspace.transaction_begin().unwrap();
    assert!(matches!(
        workspace.transaction_begin(),
        Err(Error::TransactionInProgress)
    ));
    assert!(matches!(workspace.undo(), Err(Error::TransactionInProgress)));
    assert!(matches!(workspace.redo(), Err(Error::TransactionInProgress)));
    workspace.define("data", entry(0, 1), &RefMap::new()).unwrap();
    workspace.transaction_end().unwrap();

    assert_eq!(workspace.revision(), 1);
    assert_eq!(defined(&workspace), vec![0]);
}

#[test]
fn manual_transaction_keeps_partial_changes() {
    let mut workspace = workspace(4);
    workspace.transaction_begin().unwrap();
    workspace.define("data", entry(0, 2), &RefMap::new()).unwrap();
    assert!(workspace
        .define("data", entry(3, 2), &RefMap::new())
        .is_err());
    workspace.transaction_end().unwrap();

    assert_eq!(defined(&workspace), vec![0]);
    assert!(workspace.undo().unwrap());
    assert!(defined(&workspace).is_empty());
}

#[test]
fn revisions_only_grow() {
    let mut workspace = workspace(0x10);
    assert!(!workspace.undo().unwrap());
    assert!(!workspace.redo().unwrap());
    assert_eq!(workspace.revision(), 0);

    define(&mut workspace, 0, 4, &RefMap::new());
    let result = workspace.transaction(|workspace| {
        workspace.define("data", entry(8, 4), &RefMap::new())?;
        workspace.define("data", entry(0x0E, 4), &RefMap::new())
    });
    assert!(matches!(result, Err(Error::OutOfRange { .. })));
    assert_eq!(workspace.revision(), 1);
    assert_eq!(defined(&workspace), vec![0]);

    let mut last = workspace.revision();
    for _ in 0..3 {
        workspace.undo().unwrap();
        assert!(workspace.revision() >= last);
        last = workspace.revision();
        workspace.redo().unwrap();
        assert!(workspace.revision() >= last);
        last = workspace.revision();
    }
}

#[test]
fn new_transaction_invalidates_redo() {
    let mut workspace = workspace(0x10);
    define(&mut workspace, 0, 2, &RefMap::new());
    assert!(workspace.undo().unwrap());
    assert!(workspace.can_redo());

    define(&mut workspace, 4, 2, &RefMap::new());
    assert!(!workspace.can_redo());
    assert!(!workspace.redo().unwrap());
    assert_eq!(defined(&workspace), vec![4]);
}

#[test]
fn since_returns_only_changes() {
    let mut workspace = workspace(0x10);
    define(&mut workspace, 0, 2, &RefMap::new());
    define(&mut workspace, 4, 2, &RefMap::new());

    let query = workspace.get("data", 0, 0x10, Some(1)).unwrap();
    assert_eq!(query.revision, 2);
    assert_eq!(query.entries.len(), 1);
    assert_eq!(query.entries[0].address, 4);

    assert!(workspace.get("data", 0, 0x10, Some(2)).unwrap().entries.is_empty());

    // references touch both ends
    workspace
        .transaction(|workspace| workspace.add_refs("data", "code", 0, vec![0x0A]))
        .unwrap();
    let addresses: Vec<u64> = workspace
        .get("data", 0, 0x10, Some(2))
        .unwrap()
        .entries
        .iter()
        .map(|entry| entry.address)
        .collect();
    assert_eq!(addresses, vec![0, 0x0A]);

    // undone bytes count as changed
    workspace.undo().unwrap();
    workspace.undo().unwrap();
    let addresses: Vec<u64> = workspace
        .get("data", 0, 0x10, Some(3))
        .unwrap()
        .entries
        .iter()
        .map(|entry| entry.address)
        .collect();
    assert_eq!(addresses, vec![0, 4, 5, 0x0A]);
}

#[test]
fn add_refs_accumulate() {
    let mut workspace = workspace(0x20);
    workspace
        .transaction(|workspace| {
            workspace.add_refs("data", "code", 0, vec![0x10])?;
            workspace.add_refs("data", "code", 0, vec![0x10, 0x14])?;
            workspace.add_refs("data", "data", 0, vec![0x18])
        })
        .unwrap();

    let source = workspace.get_entry("data", 0).unwrap();
    assert_eq!(source.type_name, "uint8");
    assert_eq!(source.refs["code"], set(&[0x10, 0x14]));
    assert_eq!(source.refs["data"], set(&[0x18]));
    assert_eq!(workspace.get_entry("data", 0x14).unwrap().xrefs, refs("code", &[0]));

    workspace
        .transaction(|workspace| workspace.remove_refs("data", "code", 0, vec![0x10, 0x11]))
        .unwrap();
    assert_eq!(workspace.get_entry("data", 0).unwrap().refs["code"], set(&[0x14]));
    assert!(workspace.get_entry("data", 0x10).unwrap().xrefs.is_empty());

    let result = workspace.transaction(|workspace| workspace.add_refs("data", "", 0, vec![1]));
    assert!(matches!(result, Err(Error::InvalidReference(_))));
}

#[test]
fn self_references() {
    let mut workspace = workspace(0x10);
    define(&mut workspace, 0, 4, &refs("loop", &[2]));
    let entry = workspace.get_entry("data", 0).unwrap();
    assert_eq!(entry.refs, refs("loop", &[2]));
    assert_eq!(entry.xrefs, refs("loop", &[0]));

    workspace
        .transaction(|workspace| workspace.undefine("data", 3, 1))
        .unwrap();
    assert!(workspace.block("data").unwrap().refs().is_empty());
    workspace.undo().unwrap();
    assert_eq!(workspace.get_entry("data", 2).unwrap().xrefs, refs("loop", &[0]));
}

#[test]
fn metadata_on_blank_bytes() {
    let mut workspace = workspace(0x10);
    workspace
        .transaction(|workspace| workspace.set_comment("data", 7, Some("here".to_string())))
        .unwrap();

    let entry = workspace.get_entry("data", 7).unwrap();
    assert_eq!(entry.type_name, "uint8");
    assert_eq!(entry.value, Value::Unsigned(7));
    assert_eq!(entry.comment.as_deref(), Some("here"));

    workspace.undo().unwrap();
    let entry = workspace.get_entry("data", 7).unwrap();
    assert_eq!(entry.type_name, "uint8_t");
    assert!(entry.comment.is_none());
    assert!(defined(&workspace).is_empty());
}

#[test]
fn metadata_inside_entries() {
    let mut workspace = workspace(0x10);
    define(&mut workspace, 4, 4, &RefMap::new());
    workspace
        .transaction(|workspace| workspace.set_comment("data", 6, Some("middle".to_string())))
        .unwrap();
    assert_eq!(defined(&workspace), vec![4]);
    assert_eq!(
        workspace.get_entry("data", 4).unwrap().comment.as_deref(),
        Some("middle")
    );

    workspace
        .transaction(|workspace| workspace.set_comment("data", 4, None))
        .unwrap();
    assert!(workspace.get_entry("data", 7).unwrap().comment.is_none());
}

#[test]
fn update_and_replace_user_defined() {
    let mut workspace = workspace(0x10);
    let mut first = UserDefined::new();
    first.insert("name".to_string(), serde_json::json!("main"));
    first.insert("args".to_string(), serde_json::json!([1, 2]));
    let mut second = UserDefined::new();
    second.insert("args".to_string(), serde_json::json!({"argc": 2}));

    workspace
        .transaction(|workspace| {
            workspace.replace_user_defined("data", 0, first.clone())?;
            workspace.update_user_defined("data", 0, second.clone())
        })
        .unwrap();
    let user_defined = workspace.get_entry("data", 0).unwrap().user_defined;
    assert_eq!(user_defined["name"], serde_json::json!("main"));
    assert_eq!(user_defined["args"], serde_json::json!({"argc": 2}));

    workspace
        .transaction(|workspace| workspace.replace_user_defined("data", 0, second.clone()))
        .unwrap();
    assert_eq!(workspace.get_entry("data", 0).unwrap().user_defined, second);

    workspace.undo().unwrap();
    let user_defined = workspace.get_entry("data", 0).unwrap().user_defined;
    assert_eq!(user_defined.len(), 2);
}

#[test]
fn get_or_define_default() {
    let mut workspace = workspace(0x10);
    define(&mut workspace, 2, 4, &RefMap::new());
    workspace
        .transaction(|workspace| {
            assert_eq!(workspace.get_or_define_default("data", 4)?, 2);
            assert_eq!(workspace.get_or_define_default("data", 9)?, 9);
            workspace.get_or_define_default("data", 0x10)
        })
        .unwrap_err();
    assert_eq!(defined(&workspace), vec![2]);
    assert_eq!(workspace.revision(), 1);
}

#[test]
fn undefine_whole_entries() {
    let mut workspace = workspace(0x10);
    define(&mut workspace, 0, 4, &refs("code", &[0x0C]));
    define(&mut workspace, 4, 4, &RefMap::new());
    define(&mut workspace, 8, 2, &RefMap::new());

    workspace
        .transaction(|workspace| workspace.undefine("data", 3, 2))
        .unwrap();
    assert_eq!(defined(&workspace), vec![8]);
    assert!(workspace.get_entry("data", 0x0C).unwrap().xrefs.is_empty());

    let result = workspace.transaction(|workspace| workspace.undefine("data", 0x0F, 2));
    assert!(matches!(result, Err(Error::OutOfRange { .. })));
}

#[test]
fn undo_and_redo_are_symmetric() {
    let mut workspace = workspace(0x40);
    let mut snapshots = vec![entries(&workspace)];
    let mut seed: u64 = 0x2545F4914F6CDD1D;
    let mut next = |bound: u64| {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (seed >> 33) % bound
    };

    for _ in 0..40 {
        let choice = next(5);
        let address = next(0x3C);
        let length = next(4) + 1;
        let to = next(0x40);
        workspace
            .transaction(|workspace| match choice {
                0 => workspace.define("data", entry(address, length), &refs("data", &[to])),
                1 => workspace.add_refs("data", "code", address, vec![to]),
                2 => workspace.undefine("data", address, length),
                3 => workspace.remove_refs("data", "data", address, vec![to, 0]),
                _ => workspace.set_comment("data", address, Some(format!("{}", to))),
            })
            .unwrap();
        assert_consistent(&workspace);
        snapshots.push(entries(&workspace));
    }

    for expected in snapshots.iter().rev().skip(1) {
        assert!(workspace.undo().unwrap());
        assert_eq!(&entries(&workspace), expected);
        assert_consistent(&workspace);
    }
    assert!(!workspace.undo().unwrap());

    for expected in snapshots.iter().skip(1) {
        assert!(workspace.redo().unwrap());
        assert_eq!(&entries(&workspace), expected);
        assert_consistent(&workspace);
    }
    assert!(!workspace.redo().unwrap());
}

#[test]
fn dump_and_continue() {
    let mut workspace = workspace(0x20);
    define(&mut workspace, 0, 4, &refs("code", &[0x10]));
    define(&mut workspace, 0x10, 2, &RefMap::new());
    workspace.undo().unwrap();
    let undone = entries(&workspace);

    let mut loaded = Workspace::load(&workspace.dump().unwrap()).unwrap();
    assert_eq!(entries(&loaded), undone);
    assert!(loaded.can_redo());

    assert!(loaded.redo().unwrap());
    assert_eq!(defined(&loaded), vec![0, 0x10]);
    assert!(loaded.undo().unwrap());
    assert!(loaded.undo().unwrap());
    assert!(defined(&loaded).is_empty());
    assert!(loaded.get_entry("data", 0x10).unwrap().xrefs.is_empty());
    assert_consistent(&loaded);
}

#[test]
fn updater_batches_are_one_revision() {
    let mut workspace = workspace(0x10);
    let updater = Updater::new("data");
    updater
        .do_json(
            &mut workspace,
            &serde_json::json!([
                {"action": "define_basic_type", "address": 0, "type": "uint16_t", "options": {"endian": "big"}},
                {"action": "define_custom_type", "address": 2, "type": "str", "value": "ab", "length": 2,
                 "refs": {"string": [0]}},
                {"action": "set_comment", "address": 8, "comment": "tail"},
            ]),
        )
        .unwrap();
    assert_eq!(workspace.revision(), 1);
    assert_eq!(defined(&workspace), vec![0, 2, 8]);
    assert_eq!(
        workspace.get_entry("data", 1).unwrap().value,
        Value::Unsigned(0x0001)
    );
    assert_eq!(workspace.get_entry("data", 0).unwrap().xrefs, refs("string", &[2]));

    assert!(workspace.undo().unwrap());
    assert!(defined(&workspace).is_empty());
    assert_consistent(&workspace);
}
