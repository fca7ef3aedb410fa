use tracing::debug;

use super::{BlockContext, BuildingBlock};
use crate::core::errors::BlockError;
use crate::core::markers::SectionMarkers;
use crate::core::types::{BlockId, BlockResult};
use crate::endpoint::{Content, SharedSection};
use crate::io::fsops::{EditError, edit_locked, remove_file_if_exists};

/// Appends a marker-delimited section to a file other software also edits.
///
/// The markers are tagged with the endpoint path, so a second run finds its
/// own section and leaves the file alone.
pub struct AppendToSharedFile;

fn shared<'c>(ctx: &'c BlockContext<'_>) -> Result<&'c SharedSection, BlockError> {
    ctx.endpoint
        .shared
        .as_ref()
        .ok_or_else(|| BlockError::unsupported(format!("{} has no shared file", ctx.endpoint.path)))
}

impl BuildingBlock for AppendToSharedFile {
    fn id(&self) -> BlockId {
        BlockId::AppendToSharedFile
    }

    fn execute(&self, path: &str, content: &Content, ctx: &BlockContext<'_>) -> BlockResult {
        let id = self.id();
        let shared = match shared(ctx) {
            Ok(shared) => shared,
            Err(err) => return BlockResult::err(id, err),
        };
        let physical = match ctx.site.physical_path(&shared.file) {
            Ok(physical) => physical,
            Err(err) => return BlockResult::err(id, BlockError::invalid_path(err)),
        };
        let Ok(body) = std::str::from_utf8(&content.body) else {
            return BlockResult::err(id, BlockError::unsupported("section content is not UTF-8 text"));
        };

        let markers = SectionMarkers::new(&shared.comment_prefix, path);
        let outcome = match edit_locked(&physical, true, |text| Ok(markers.append(text, body))) {
            Ok(outcome) => outcome,
            Err(err) => {
                return BlockResult::err(id, BlockError::io(format!("{}: {err}", physical.display())));
            }
        };
        let artifact = format!("{}#{path}", physical.display());
        {
            let mut journal = ctx.journal();
            if outcome.changed {
                journal.added_sections.insert(artifact.clone());
                if !outcome.existed {
                    journal.created_files.insert(physical.clone());
                }
            } else {
                let produced_here = journal.added_sections.contains(&artifact);
                journal.note_preexisting(&artifact, produced_here);
            }
        }
        debug!(file = %physical.display(), appended = outcome.changed, "shared section in place");
        BlockResult::ok(id, vec![artifact])
    }

    fn cleanup(&self, path: &str, ctx: &BlockContext<'_>) -> BlockResult {
        let id = self.id();
        let shared = match shared(ctx) {
            Ok(shared) => shared,
            Err(err) => return BlockResult::err(id, err),
        };
        let physical = match ctx.site.physical_path(&shared.file) {
            Ok(physical) => physical,
            Err(err) => return BlockResult::err(id, BlockError::invalid_path(err)),
        };

        let artifact = format!("{}#{path}", physical.display());
        {
            let mut journal = ctx.journal();
            if journal.preexisting.remove(&artifact) {
                debug!(section = %artifact, "shared section predates this run, kept");
                return BlockResult::ok(id, vec![artifact]);
            }
            journal.added_sections.remove(&artifact);
        }
        let markers = SectionMarkers::new(&shared.comment_prefix, path);
        let outcome = match edit_locked(&physical, false, |text| markers.remove(text)) {
            Ok(outcome) => outcome,
            Err(EditError::Rejected(message)) => {
                return BlockResult::err(id, BlockError::conflict(message));
            }
            Err(EditError::Io(err)) => {
                return BlockResult::err(id, BlockError::io(format!("{}: {err}", physical.display())));
            }
        };
        let created = ctx.journal().created_files.remove(&physical);
        if created && outcome.now_empty
            && let Err(err) = remove_file_if_exists(&physical)
        {
            return BlockResult::err(id, BlockError::io(format!("remove {}: {err}", physical.display())));
        }
        BlockResult::ok(id, vec![artifact])
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::errors::BlockErrorKind;
    use crate::test_support::{TestSite, apache_profile, section_endpoint};

    #[test]
    fn second_append_is_a_no_op() {
        let site = TestSite::new();
        let robots = site.root().join("robots.txt");
        fs::write(&robots, "User-agent: *\nDisallow: /private\n").expect("write");
        let endpoint = section_endpoint("/llms-policy", "/robots.txt", "User-agent: GPTBot\nAllow: /\n");
        let content = endpoint.generate().expect("content");
        let profile = apache_profile();
        let ctx = site.block_context(&profile, &endpoint);

        assert!(AppendToSharedFile.execute(&endpoint.path, &content, &ctx).success());
        assert!(AppendToSharedFile.execute(&endpoint.path, &content, &ctx).success());
        let text = fs::read_to_string(&robots).expect("read");
        assert_eq!(text.matches("User-agent: GPTBot").count(), 1);
        assert!(text.starts_with("User-agent: *\nDisallow: /private\n"));

        assert!(AppendToSharedFile.cleanup(&endpoint.path, &ctx).success());
        assert_eq!(
            fs::read_to_string(&robots).expect("read"),
            "User-agent: *\nDisallow: /private\n"
        );
    }

    #[test]
    fn cleanup_keeps_foreign_sections() {
        let site = TestSite::new();
        let robots = site.root().join("robots.txt");
        let first = section_endpoint("/policy-a", "/robots.txt", "A\n");
        let second = section_endpoint("/policy-b", "/robots.txt", "B\n");
        let profile = apache_profile();
        let ctx_a = site.block_context(&profile, &first);
        let ctx_b = site.block_context(&profile, &second);

        let content_a = first.generate().expect("content");
        let content_b = second.generate().expect("content");
        assert!(AppendToSharedFile.execute(&first.path, &content_a, &ctx_a).success());
        assert!(AppendToSharedFile.execute(&second.path, &content_b, &ctx_b).success());
        assert!(AppendToSharedFile.cleanup(&first.path, &ctx_a).success());

        let text = fs::read_to_string(&robots).expect("read");
        assert!(!text.contains("BEGIN deployer /policy-a"));
        assert!(text.contains("# BEGIN deployer /policy-b\nB\n# END deployer /policy-b\n"));
    }

    #[test]
    fn unterminated_section_is_a_conflict() {
        let site = TestSite::new();
        let robots = site.root().join("robots.txt");
        fs::write(&robots, "# BEGIN deployer /llms-policy\nhalf\n").expect("write");
        let endpoint = section_endpoint("/llms-policy", "/robots.txt", "x\n");
        let profile = apache_profile();
        let ctx = site.block_context(&profile, &endpoint);
        let result = AppendToSharedFile.cleanup(&endpoint.path, &ctx);
        assert_eq!(
            result.error().map(|err| err.kind),
            Some(BlockErrorKind::Conflict)
        );
    }
}
