use std::path::Path;

use tracing::debug;

use super::{BlockContext, BuildingBlock};
use crate::core::errors::BlockError;
use crate::core::markers::SectionMarkers;
use crate::core::types::{BlockId, BlockResult};
use crate::endpoint::Content;
use crate::io::fsops::{EditError, edit_locked, remove_file_if_exists};
use crate::templates::{RuleSpec, RuleTarget, render_rule};

/// Comment prefix shared by every config syntax the engine writes into.
const RULE_COMMENT: &str = "#";

/// Adds a marker-delimited routing rule for the path to the rewrite config.
pub struct AddRewriteRule;

impl AddRewriteRule {
    fn config_path<'c>(ctx: &'c BlockContext<'_>) -> Result<&'c Path, BlockError> {
        ctx.site
            .rewrite_config
            .as_deref()
            .ok_or_else(|| BlockError::unsupported("no rewrite config file is configured"))
    }
}

impl BuildingBlock for AddRewriteRule {
    fn id(&self) -> BlockId {
        BlockId::AddRewriteRule
    }

    fn execute(&self, path: &str, _content: &Content, ctx: &BlockContext<'_>) -> BlockResult {
        let id = self.id();
        let config = match Self::config_path(ctx) {
            Ok(config) => config,
            Err(err) => return BlockResult::err(id, err),
        };
        let platform = ctx.profile.platform_type;
        if !platform.accepts_rewrite_fragments() {
            return BlockResult::err(
                id,
                BlockError::unsupported(format!("{platform} does not accept rewrite fragments")),
            );
        }

        let target = match ctx.site.physical_path(path) {
            Ok(physical) if physical.is_file() => RuleTarget::StaticFile,
            Ok(_) => RuleTarget::FrontController,
            Err(err) => return BlockResult::err(id, BlockError::invalid_path(err)),
        };
        let rule_spec = RuleSpec {
            path,
            target,
            front_controller: &ctx.site.front_controller,
        };
        let rule = match render_rule(platform, &rule_spec) {
            Ok(Some(rule)) => rule,
            Ok(None) => {
                return BlockResult::err(id, BlockError::unsupported(format!("no rule syntax for {platform}")));
            }
            Err(err) => return BlockResult::err(id, BlockError::unsupported(format!("{err:#}"))),
        };

        let markers = SectionMarkers::new(RULE_COMMENT, path);
        let outcome = match edit_locked(config, true, |text| Ok(markers.append(text, &rule))) {
            Ok(outcome) => outcome,
            Err(err) => {
                return BlockResult::err(
                    id,
                    BlockError::config_unwritable(format!("{}: {err}", config.display())),
                );
            }
        };
        let artifact = format!("{}#{path}", config.display());
        {
            let mut journal = ctx.journal();
            if outcome.changed {
                journal.added_sections.insert(artifact.clone());
                if !outcome.existed {
                    journal.created_files.insert(config.to_path_buf());
                }
            } else {
                let produced_here = journal.added_sections.contains(&artifact);
                journal.note_preexisting(&artifact, produced_here);
            }
        }
        debug!(config = %config.display(), changed = outcome.changed, ?target, "rewrite rule in place");
        BlockResult::ok(id, vec![artifact])
    }

    fn cleanup(&self, path: &str, ctx: &BlockContext<'_>) -> BlockResult {
        let id = self.id();
        let Ok(config) = Self::config_path(ctx) else {
            return BlockResult::ok(id, Vec::new());
        };
        let artifact = format!("{}#{path}", config.display());
        {
            let mut journal = ctx.journal();
            if journal.preexisting.remove(&artifact) {
                debug!(rule = %artifact, "rewrite rule predates this run, kept");
                return BlockResult::ok(id, vec![artifact]);
            }
            journal.added_sections.remove(&artifact);
        }
        let markers = SectionMarkers::new(RULE_COMMENT, path);
        let outcome = match edit_locked(config, false, |text| markers.remove(text)) {
            Ok(outcome) => outcome,
            Err(EditError::Rejected(message)) => {
                return BlockResult::err(id, BlockError::conflict(message));
            }
            Err(EditError::Io(err)) => {
                return BlockResult::err(
                    id,
                    BlockError::config_unwritable(format!("{}: {err}", config.display())),
                );
            }
        };
        let created = ctx.journal().created_files.remove(config);
        if created && outcome.now_empty
            && let Err(err) = remove_file_if_exists(config)
        {
            return BlockResult::err(id, BlockError::io(format!("remove {}: {err}", config.display())));
        }
        BlockResult::ok(id, vec![artifact])
    }
}
