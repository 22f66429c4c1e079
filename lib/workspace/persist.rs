//! Saving and restoring a workspace.
//!
//! A dump holds everything needed to continue working exactly where the
//! workspace left off: raw bytes, entries, cell revisions, references,
//! options, and the whole transaction log including the redo stack.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::workspace::Workspace;
use crate::Error;

/// The version of the dump format written by `Workspace::dump`.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct DumpRef<'w> {
    version: u32,
    workspace: &'w Workspace,
}

#[derive(Deserialize)]
struct Dump {
    version: u32,
    workspace: Workspace,
}

fn corrupt(e: serde_json::Error) -> Error {
    Error::CorruptState(e.to_string())
}

impl Workspace {
    /// Serialize this workspace to a json string.
    pub fn dump(&self) -> Result<String, Error> {
        self.require_idle()?;
        Ok(serde_json::to_string(&DumpRef {
            version: FORMAT_VERSION,
            workspace: self,
        })?)
    }

    /// Serialize this workspace as json to `writer`.
    pub fn dump_to<W: Write>(&self, writer: W) -> Result<(), Error> {
        self.require_idle()?;
        serde_json::to_writer(
            writer,
            &DumpRef {
                version: FORMAT_VERSION,
                workspace: self,
            },
        )?;
        Ok(())
    }

    /// Restore a workspace from a string produced by `dump`.
    pub fn load(data: &str) -> Result<Workspace, Error> {
        let dump: Dump = serde_json::from_str(data).map_err(corrupt)?;
        Workspace::from_dump(dump)
    }

    /// Restore a workspace from json produced by `dump_to`.
    pub fn load_from<R: Read>(reader: R) -> Result<Workspace, Error> {
        let dump: Dump = serde_json::from_reader(reader).map_err(corrupt)?;
        Workspace::from_dump(dump)
    }

    fn from_dump(dump: Dump) -> Result<Workspace, Error> {
        if dump.version != FORMAT_VERSION {
            return Err(Error::CorruptState(format!(
                "unsupported format version {}",
                dump.version
            )));
        }
        let workspace = dump.workspace;
        if !workspace.log.is_consistent() {
            return Err(Error::CorruptState(
                "transaction log is inconsistent".to_string(),
            ));
        }
        for (name, block) in &workspace.blocks {
            if name != block.name() {
                return Err(Error::CorruptState(format!(
                    "block \"{}\" is stored as \"{}\"",
                    block.name(),
                    name
                )));
            }
            block.validate()?;
        }
        Ok(workspace)
    }
}
