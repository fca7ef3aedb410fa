use std::fs;

use tracing::debug;

use super::{BlockContext, BuildingBlock};
use crate::core::errors::BlockError;
use crate::core::types::{BlockId, BlockResult};
use crate::endpoint::Content;
use crate::io::fsops::{read_optional, remove_empty_dirs, remove_file_if_exists, write_file_creating_dirs};

/// Writes the content to the endpoint's physical path under the document root.
pub struct WriteStaticFile;

impl BuildingBlock for WriteStaticFile {
    fn id(&self) -> BlockId {
        BlockId::WriteStaticFile
    }

    fn execute(&self, path: &str, content: &Content, ctx: &BlockContext<'_>) -> BlockResult {
        let id = self.id();
        let physical = match ctx.site.physical_path(path) {
            Ok(physical) => physical,
            Err(err) => return BlockResult::err(id, BlockError::invalid_path(err)),
        };
        let artifact = physical.display().to_string();

        let existing = match read_optional(&physical) {
            Ok(existing) => existing,
            Err(err) => return BlockResult::err(id, BlockError::io(format!("read {artifact}: {err}"))),
        };
        match existing {
            Some(bytes) if bytes == content.body => {
                let mut journal = ctx.journal();
                let produced_here = journal.created_files.contains(&physical)
                    || journal.replaced_files.contains_key(&physical);
                journal.note_preexisting(&artifact, produced_here);
                debug!(path = %artifact, "static file already current");
                return BlockResult::ok(id, vec![artifact]);
            }
            Some(bytes) => {
                if let Err(err) = fs::write(&physical, &content.body) {
                    return BlockResult::err(id, BlockError::io(format!("write {artifact}: {err}")));
                }
                ctx.journal()
                    .replaced_files
                    .entry(physical)
                    .or_insert(bytes);
            }
            None => {
                let created = match write_file_creating_dirs(&physical, &content.body) {
                    Ok(created) => created,
                    Err(err) => {
                        return BlockResult::err(id, BlockError::io(format!("write {artifact}: {err}")));
                    }
                };
                let mut journal = ctx.journal();
                journal.created_files.insert(physical.clone());
                journal.created_dirs.insert(physical, created);
            }
        }
        BlockResult::ok(id, vec![artifact])
    }

    fn cleanup(&self, path: &str, ctx: &BlockContext<'_>) -> BlockResult {
        let id = self.id();
        let physical = match ctx.site.physical_path(path) {
            Ok(physical) => physical,
            Err(err) => return BlockResult::err(id, BlockError::invalid_path(err)),
        };
        let artifact = physical.display().to_string();
        if ctx.journal().preexisting.remove(&artifact) {
            debug!(path = %artifact, "static file predates this run, kept");
            return BlockResult::ok(id, vec![artifact]);
        }

        let (backup, created_dirs) = {
            let mut journal = ctx.journal();
            journal.created_files.remove(&physical);
            (
                journal.replaced_files.remove(&physical),
                journal.created_dirs.remove(&physical),
            )
        };
        let restored = match backup {
            Some(bytes) => fs::write(&physical, bytes),
            None => remove_file_if_exists(&physical).map(|_| ()),
        };
        if let Err(err) = restored {
            return BlockResult::err(id, BlockError::io(format!("restore {artifact}: {err}")));
        }
        if let Some(dirs) = created_dirs {
            remove_empty_dirs(&dirs);
        }
        BlockResult::ok(id, vec![artifact])
    }
}
