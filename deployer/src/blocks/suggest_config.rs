use super::{BlockContext, BuildingBlock};
use crate::core::errors::BlockError;
use crate::core::markers::SectionMarkers;
use crate::core::types::{BlockId, BlockResult};
use crate::endpoint::Content;
use crate::templates::{RuleSpec, RuleTarget, render_suggestion};

/// Produces a config snippet for an administrator. Touches nothing.
pub struct SuggestAlternateConfig;

impl BuildingBlock for SuggestAlternateConfig {
    fn id(&self) -> BlockId {
        BlockId::SuggestAlternateConfig
    }

    fn execute(&self, path: &str, content: &Content, ctx: &BlockContext<'_>) -> BlockResult {
        let id = self.id();
        if let Some(shared) = &ctx.endpoint.shared {
            let markers = SectionMarkers::new(&shared.comment_prefix, path);
            let body = String::from_utf8_lossy(&content.body);
            let section = markers
                .append("", &body)
                .unwrap_or_else(|| body.to_string());
            let detail = format!("Add this section to {}:\n\n{section}", shared.file);
            return BlockResult::ok_with_detail(id, Vec::new(), detail);
        }

        let rule_spec = RuleSpec {
            path,
            target: RuleTarget::FrontController,
            front_controller: &ctx.site.front_controller,
        };
        match render_suggestion(ctx.profile.platform_type, &rule_spec) {
            Ok(detail) => BlockResult::ok_with_detail(id, Vec::new(), detail),
            Err(err) => BlockResult::err(id, BlockError::unsupported(format!("{err:#}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PlatformType;
    use crate::test_support::{TestSite, apache_profile, json_endpoint, section_endpoint};

    #[test]
    fn suggestion_names_the_detected_platform() {
        let site = TestSite::new();
        let endpoint = json_endpoint("/discovery.json", "{}");
        let mut profile = apache_profile();
        profile.platform_type = PlatformType::Nginx;
        let ctx = site.block_context(&profile, &endpoint);
        let content = endpoint.generate().expect("content");

        let result = SuggestAlternateConfig.execute(&endpoint.path, &content, &ctx);
        let detail = result.detail().expect("detail");
        assert!(detail.contains("[nginx]"));
        assert!(detail.contains("location = /discovery.json"));
        assert!(SuggestAlternateConfig.cleanup(&endpoint.path, &ctx).success());
    }

    #[test]
    fn shared_section_suggestion_carries_markers() {
        let site = TestSite::new();
        let endpoint = section_endpoint("/llms-policy", "/robots.txt", "Allow: /\n");
        let profile = apache_profile();
        let ctx = site.block_context(&profile, &endpoint);
        let content = endpoint.generate().expect("content");

        let result = SuggestAlternateConfig.execute(&endpoint.path, &content, &ctx);
        let detail = result.detail().expect("detail");
        assert!(detail.contains("/robots.txt"));
        assert!(detail.contains("# BEGIN deployer /llms-policy\nAllow: /\n# END deployer /llms-policy"));
    }
}
