//! Building blocks: atomic, idempotent, individually reversible actions.
//!
//! Each block implements [`BuildingBlock`]. The closed [`BlockId`] set maps
//! to implementations at compile time through [`block`]. Blocks record what
//! they changed in the run's [`Journal`] so cleanup can restore the exact
//! pre-run state. An artifact a run found already in place is journaled as
//! pre-existing and survives rollback. Without any journal entry (teardown
//! in a later run) cleanup removes the block's own artifact.

mod dynamic_route;
mod proxy_route;
mod rewrite_rule;
mod shared_file;
mod suggest_config;
mod write_static;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::types::{BlockId, BlockResult, ServerProfile};
use crate::dispatch::{Dispatcher, RouteBinding};
use crate::endpoint::{Content, Endpoint};
use crate::io::config::SiteConfig;

pub use dynamic_route::RegisterDynamicRoute;
pub use proxy_route::RegisterProxyRoute;
pub use rewrite_rule::AddRewriteRule;
pub use shared_file::AppendToSharedFile;
pub use suggest_config::SuggestAlternateConfig;
pub use write_static::WriteStaticFile;

/// A single deployment action.
///
/// `execute` twice with identical inputs must succeed both times and leave
/// one artifact. `cleanup` removes only what the block itself owns and
/// succeeds when there is nothing left to remove.
pub trait BuildingBlock: Sync {
    fn id(&self) -> BlockId;

    fn execute(&self, path: &str, content: &Content, ctx: &BlockContext<'_>) -> BlockResult;

    fn cleanup(&self, path: &str, ctx: &BlockContext<'_>) -> BlockResult {
        let _ = (path, ctx);
        BlockResult::ok(self.id(), Vec::new())
    }
}

/// Implementation for `id`.
pub fn block(id: BlockId) -> &'static dyn BuildingBlock {
    match id {
        BlockId::WriteStaticFile => &WriteStaticFile,
        BlockId::AddRewriteRule => &AddRewriteRule,
        BlockId::RegisterDynamicRoute => &RegisterDynamicRoute,
        BlockId::AppendToSharedFile => &AppendToSharedFile,
        BlockId::SuggestAlternateConfig => &SuggestAlternateConfig,
        BlockId::RegisterProxyRoute => &RegisterProxyRoute,
    }
}

/// Pre-run state captured by blocks during one executor run.
#[derive(Default)]
pub struct Journal {
    /// Directories created for a file, outermost first.
    pub created_dirs: HashMap<PathBuf, Vec<PathBuf>>,
    /// Original bytes of files a block overwrote.
    pub replaced_files: HashMap<PathBuf, Vec<u8>>,
    /// Files that did not exist before the run.
    pub created_files: HashSet<PathBuf>,
    /// Dispatcher bindings a block replaced (`None`: path was unbound).
    pub previous_routes: HashMap<String, Option<RouteBinding>>,
    /// Marker sections this run inserted, by artifact ref.
    pub added_sections: HashSet<String>,
    /// Artifacts that were already in place before the run, by artifact ref.
    pub preexisting: HashSet<String>,
}

impl Journal {
    /// Record `artifact` as found in place unless this run produced it.
    pub fn note_preexisting(&mut self, artifact: &str, produced_here: bool) {
        if !produced_here {
            self.preexisting.insert(artifact.to_string());
        }
    }
}

/// Everything a block may touch.
pub struct BlockContext<'a> {
    pub site: &'a SiteConfig,
    pub profile: &'a ServerProfile,
    pub dispatcher: &'a Dispatcher,
    pub endpoint: &'a Endpoint,
    journal: Mutex<Journal>,
}

impl<'a> BlockContext<'a> {
    pub fn new(
        site: &'a SiteConfig,
        profile: &'a ServerProfile,
        dispatcher: &'a Dispatcher,
        endpoint: &'a Endpoint,
    ) -> Self {
        Self {
            site,
            profile,
            dispatcher,
            endpoint,
            journal: Mutex::new(Journal::default()),
        }
    }

    pub fn journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

