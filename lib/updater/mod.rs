//! Declarative batches of changes, as produced by analyzers.
//!
//! Analyzers do not call the workspace directly. They emit a json array of
//! actions such as
//!
//! ```json
//! [
//!   {"action": "define_basic_type", "address": 0, "type": "uint32", "options": {"endian": "big"}},
//!   {"action": "add_refs", "address": 0, "type": "code", "tos": [16]},
//!   {"action": "set_comment", "address": 16, "comment": "entry point"}
//! ]
//! ```
//!
//! which are parsed into `Action`s up front, and then applied to one block in
//! a single transaction. If any action fails, none of the batch is applied.

pub mod basic_types;

pub use self::basic_types::{BasicType, Endian};

use log::debug;
use serde_json::Value as Json;

use crate::memory::refs::validate_ref_type;
use crate::memory::{MemoryEntry, RefMap, UserDefined, Value};
use crate::workspace::{SharedWorkspace, Workspace};
use crate::Error;

/// One change requested by an analyzer.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    DefineBasicType {
        address: u64,
        basic_type: BasicType,
        endian: Endian,
        refs: RefMap,
        user_defined: UserDefined,
        comment: Option<String>,
    },
    DefineCustomType {
        address: u64,
        type_name: String,
        value: Value,
        length: u64,
        refs: RefMap,
        user_defined: UserDefined,
        comment: Option<String>,
    },
    SetComment {
        address: u64,
        comment: Option<String>,
    },
    AddRefs {
        address: u64,
        ref_type: String,
        tos: Vec<u64>,
    },
    RemoveRefs {
        address: u64,
        ref_type: String,
        tos: Vec<u64>,
    },
    Undefine {
        address: u64,
        length: u64,
    },
    ReplaceUserDefined {
        address: u64,
        user_defined: UserDefined,
    },
    UpdateUserDefined {
        address: u64,
        user_defined: UserDefined,
    },
}

fn invalid<S: Into<String>>(message: S) -> Error {
    Error::InvalidArgument(message.into())
}

fn parse_u64(value: &Json, name: &str) -> Result<u64, Error> {
    match *value {
        Json::Number(ref number) => number
            .as_u64()
            .ok_or_else(|| invalid(format!("{} must be a non-negative integer", name))),
        _ => Err(invalid(format!("{} must be a non-negative integer", name))),
    }
}

fn parse_string(value: &Json, name: &str) -> Result<String, Error> {
    match *value {
        Json::String(ref s) => Ok(s.to_string()),
        _ => Err(invalid(format!("{} must be a string", name))),
    }
}

fn parse_comment(value: &Json) -> Result<Option<String>, Error> {
    match *value {
        Json::Null => Ok(None),
        Json::String(ref s) => Ok(Some(s.to_string())),
        _ => Err(invalid("comment must be a string or null")),
    }
}

fn parse_addresses(value: &Json, name: &str) -> Result<Vec<u64>, Error> {
    match *value {
        Json::Array(ref addresses) => addresses
            .iter()
            .map(|address| parse_u64(address, name))
            .collect(),
        _ => Err(invalid(format!("{} must be a list of addresses", name))),
    }
}

fn parse_refs(value: &Json) -> Result<RefMap, Error> {
    let mut refs = RefMap::new();
    match *value {
        Json::Null => {}
        Json::Object(ref object) => {
            for (ref_type, tos) in object {
                validate_ref_type(ref_type)?;
                refs.insert(
                    ref_type.to_string(),
                    parse_addresses(tos, "refs")?.into_iter().collect(),
                );
            }
        }
        _ => return Err(invalid("refs must map reference types to lists of addresses")),
    }
    Ok(refs)
}

fn parse_user_defined(value: &Json) -> Result<UserDefined, Error> {
    match *value {
        Json::Null => Ok(UserDefined::new()),
        Json::Object(ref object) => Ok(object
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()),
        _ => Err(invalid("user_defined must be an object")),
    }
}

impl Action {
    /// Parse an action from its json representation.
    pub fn from_json(json: &Json) -> Result<Action, Error> {
        if !json.is_object() {
            return Err(invalid("action must be an object"));
        }
        let tag = match json["action"] {
            Json::String(ref tag) => tag.as_str(),
            _ => return Err(invalid("action missing")),
        };
        let address = parse_u64(&json["address"], "address")?;

        Ok(match tag {
            "define_basic_type" => {
                let endian = match json["options"]["endian"] {
                    Json::Null => Endian::default(),
                    ref endian => Endian::from_name(&parse_string(endian, "endian")?)?,
                };
                Action::DefineBasicType {
                    address,
                    basic_type: BasicType::from_name(&parse_string(&json["type"], "type")?)?,
                    endian,
                    refs: parse_refs(&json["refs"])?,
                    user_defined: parse_user_defined(&json["user_defined"])?,
                    comment: parse_comment(&json["comment"])?,
                }
            }
            "define_custom_type" => Action::DefineCustomType {
                address,
                type_name: parse_string(&json["type"], "type")?,
                value: Value::from_json(&json["value"]),
                length: parse_u64(&json["length"], "length")?,
                refs: parse_refs(&json["refs"])?,
                user_defined: parse_user_defined(&json["user_defined"])?,
                comment: parse_comment(&json["comment"])?,
            },
            "set_comment" => Action::SetComment {
                address,
                comment: parse_comment(&json["comment"])?,
            },
            "add_refs" => Action::AddRefs {
                address,
                ref_type: parse_string(&json["type"], "type")?,
                tos: parse_addresses(&json["tos"], "tos")?,
            },
            "remove_refs" => Action::RemoveRefs {
                address,
                ref_type: parse_string(&json["type"], "type")?,
                tos: parse_addresses(&json["tos"], "tos")?,
            },
            "undefine" => Action::Undefine {
                address,
                length: match json["length"] {
                    Json::Null => 1,
                    ref length => parse_u64(length, "length")?,
                },
            },
            "replace_user_defined" => Action::ReplaceUserDefined {
                address,
                user_defined: parse_user_defined(&json["user_defined"])?,
            },
            "update_user_defined" => Action::UpdateUserDefined {
                address,
                user_defined: parse_user_defined(&json["user_defined"])?,
            },
            _ => return Err(Error::UnknownAction(tag.to_string())),
        })
    }

    /// Parse a json array of actions.
    pub fn parse_all(json: &Json) -> Result<Vec<Action>, Error> {
        match *json {
            Json::Array(ref actions) => actions.iter().map(Action::from_json).collect(),
            _ => Err(invalid("actions must be a list")),
        }
    }

    pub fn address(&self) -> u64 {
        match *self {
            Action::DefineBasicType { address, .. }
            | Action::DefineCustomType { address, .. }
            | Action::SetComment { address, .. }
            | Action::AddRefs { address, .. }
            | Action::RemoveRefs { address, .. }
            | Action::Undefine { address, .. }
            | Action::ReplaceUserDefined { address, .. }
            | Action::UpdateUserDefined { address, .. } => address,
        }
    }

    /// Perform this action on `block`. The workspace must be in a transaction.
    pub fn apply(&self, workspace: &mut Workspace, block: &str) -> Result<(), Error> {
        match *self {
            Action::DefineBasicType {
                address,
                basic_type,
                endian,
                ref refs,
                ref user_defined,
                ref comment,
            } => {
                let memory_block = workspace.block(block)?;
                let end = memory_block.check_range(address, basic_type.size())?;
                let value =
                    basic_type.decode(&memory_block.raw()[address as usize..end as usize], endian)?;
                let entry = MemoryEntry::new(address, basic_type.size(), basic_type.name(), value)?
                    .with_user_defined(user_defined.clone())
                    .with_comment(comment.clone());
                workspace.define(block, entry, refs)
            }
            Action::DefineCustomType {
                address,
                ref type_name,
                ref value,
                length,
                ref refs,
                ref user_defined,
                ref comment,
            } => {
                let entry = MemoryEntry::new(address, length, type_name.as_str(), value.clone())?
                    .with_user_defined(user_defined.clone())
                    .with_comment(comment.clone());
                workspace.define(block, entry, refs)
            }
            Action::SetComment {
                address,
                ref comment,
            } => workspace.set_comment(block, address, comment.clone()),
            Action::AddRefs {
                address,
                ref ref_type,
                ref tos,
            } => workspace.add_refs(block, ref_type, address, tos.iter().cloned()),
            Action::RemoveRefs {
                address,
                ref ref_type,
                ref tos,
            } => workspace.remove_refs(block, ref_type, address, tos.iter().cloned()),
            Action::Undefine { address, length } => workspace.undefine(block, address, length),
            Action::ReplaceUserDefined {
                address,
                ref user_defined,
            } => workspace.replace_user_defined(block, address, user_defined.clone()),
            Action::UpdateUserDefined {
                address,
                ref user_defined,
            } => workspace.update_user_defined(block, address, user_defined.clone()),
        }
    }
}

/// Applies batches of actions to one block of a workspace.
#[derive(Clone, Debug)]
pub struct Updater {
    block: String,
}

impl Updater {
    /// Create a new `Updater` for the block named `block`.
    pub fn new<S: Into<String>>(block: S) -> Updater {
        Updater {
            block: block.into(),
        }
    }

    pub fn block(&self) -> &str {
        &self.block
    }

    /// Apply `actions` in one transaction, returning the new revision.
    pub fn apply(&self, workspace: &mut Workspace, actions: &[Action]) -> Result<u64, Error> {
        debug!("applying {} actions to \"{}\"", actions.len(), self.block);
        workspace.transaction(|workspace| {
            for action in actions {
                action.apply(workspace, &self.block)?;
            }
            Ok(workspace.revision())
        })
    }

    /// Apply `actions` in one transaction, holding the workspace lock
    /// throughout.
    pub fn apply_shared(&self, workspace: &SharedWorkspace, actions: &[Action]) -> Result<u64, Error> {
        self.apply(&mut *workspace.lock()?, actions)
    }

    /// Parse a json array of actions and apply them in one transaction.
    ///
    /// Nothing is applied unless every action parses.
    pub fn do_json(&self, workspace: &mut Workspace, actions: &Json) -> Result<u64, Error> {
        let actions = Action::parse_all(actions)?;
        self.apply(workspace, &actions)
    }
}
