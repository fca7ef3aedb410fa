//! Server config snippets for routing an endpoint path.
//!
//! Used both for rules the engine writes itself (`add-rewrite-rule`) and for
//! snippets handed to an administrator (`suggest-alternate-config`).

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::slug;
use crate::core::types::PlatformType;

const APACHE_TEMPLATE: &str = include_str!("templates/apache.j2");
const NGINX_TEMPLATE: &str = include_str!("templates/nginx.j2");
const IIS_TEMPLATE: &str = include_str!("templates/iis.j2");
const CADDY_TEMPLATE: &str = include_str!("templates/caddy.j2");

/// What a rule sends matching requests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    /// Serve the file on disk and stop further rewriting.
    StaticFile,
    /// Hand the request to the application entry point.
    FrontController,
}

#[derive(Debug, Clone, Copy)]
pub struct RuleSpec<'a> {
    pub path: &'a str,
    pub target: RuleTarget,
    pub front_controller: &'a str,
}

/// Platforms a snippet can be rendered for, in suggestion order.
pub const SNIPPET_PLATFORMS: [PlatformType; 4] = [
    PlatformType::Apache,
    PlatformType::Nginx,
    PlatformType::Iis,
    PlatformType::Caddy,
];

fn template_for(platform: PlatformType) -> Option<(&'static str, &'static str)> {
    match platform {
        PlatformType::Apache | PlatformType::Litespeed => Some(("apache", APACHE_TEMPLATE)),
        PlatformType::Nginx => Some(("nginx", NGINX_TEMPLATE)),
        PlatformType::Iis => Some(("iis", IIS_TEMPLATE)),
        PlatformType::Caddy => Some(("caddy", CADDY_TEMPLATE)),
        PlatformType::Unknown => None,
    }
}

/// Render the routing snippet for `platform`, or `None` when no syntax is known.
pub fn render_rule(platform: PlatformType, rule_spec: &RuleSpec<'_>) -> Result<Option<String>> {
    let Some((name, source)) = template_for(platform) else {
        return Ok(None);
    };
    let mut env = Environment::new();
    env.add_template(name, source)
        .with_context(|| format!("load {name} template"))?;
    let template = env.get_template(name)?;
    let relative = rule_spec.path.trim_start_matches('/');
    let rendered = template
        .render(context! {
            path => rule_spec.path,
            pattern => regex::escape(relative),
            slug => slug::encode(rule_spec.path),
            static_target => rule_spec.target == RuleTarget::StaticFile,
            front_controller => rule_spec.front_controller.trim_start_matches('/'),
        })
        .with_context(|| format!("render {name} rule for {}", rule_spec.path))?;
    Ok(Some(rendered))
}

/// Suggestion text for an administrator: the detected platform's snippet,
/// or every known platform's when detection failed.
pub fn render_suggestion(platform: PlatformType, rule_spec: &RuleSpec<'_>) -> Result<String> {
    let platforms: Vec<PlatformType> = match template_for(platform) {
        Some(_) => vec![platform],
        None => SNIPPET_PLATFORMS.to_vec(),
    };
    let mut out = format!(
        "Automatic deployment of {} did not work. Add this to the server configuration:\n",
        rule_spec.path
    );
    for platform in platforms {
        if let Some(snippet) = render_rule(platform, rule_spec)? {
            out.push_str(&format!("\n[{platform}]\n{}\n", snippet.trim_end()));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_spec(target: RuleTarget) -> RuleSpec<'static> {
        RuleSpec {
            path: "/.well-known/ai.json",
            target,
            front_controller: "index.php",
        }
    }

    #[test]
    fn apache_rule_escapes_pattern() {
        let rule = render_rule(PlatformType::Apache, &rule_spec(RuleTarget::FrontController))
            .expect("render")
            .expect("apache supported");
        assert!(rule.contains(r"RewriteRule ^\.well-known/ai\.json$ index.php [L,QSA]"));
        assert!(rule.starts_with("RewriteEngine On"));
    }

    #[test]
    fn static_target_passes_through() {
        let rule = render_rule(PlatformType::Litespeed, &rule_spec(RuleTarget::StaticFile))
            .expect("render")
            .expect("litespeed supported");
        assert!(rule.contains(r"ai\.json$ - [L]"));

        let nginx = render_rule(PlatformType::Nginx, &rule_spec(RuleTarget::StaticFile))
            .expect("render")
            .expect("nginx supported");
        assert!(nginx.contains("location = /.well-known/ai.json {"));
        assert!(nginx.contains("try_files $uri =404;"));
    }

    #[test]
    fn unknown_platform_has_no_rule() {
        assert_eq!(
            render_rule(PlatformType::Unknown, &rule_spec(RuleTarget::StaticFile)).expect("render"),
            None
        );
    }

    #[test]
    fn suggestion_for_unknown_platform_lists_every_snippet() {
        let text = render_suggestion(PlatformType::Unknown, &rule_spec(RuleTarget::FrontController))
            .expect("render");
        for platform in SNIPPET_PLATFORMS {
            assert!(text.contains(&format!("[{platform}]")), "{platform} missing");
        }
        let iis_only = render_suggestion(PlatformType::Iis, &rule_spec(RuleTarget::FrontController))
            .expect("render");
        assert!(iis_only.contains("<action type=\"Rewrite\" url=\"index.php\" />"));
        assert!(!iis_only.contains("[nginx]"));
    }
}
