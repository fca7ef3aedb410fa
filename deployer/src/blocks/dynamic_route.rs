use super::{BlockContext, BuildingBlock};
use crate::core::types::{BlockId, BlockResult};
use crate::dispatch::{ContentRoute, RouteBinding};
use crate::endpoint::Content;

/// Binds the path in the dispatcher; the generator runs on every request.
pub struct RegisterDynamicRoute;

impl BuildingBlock for RegisterDynamicRoute {
    fn id(&self) -> BlockId {
        BlockId::RegisterDynamicRoute
    }

    fn execute(&self, path: &str, _content: &Content, ctx: &BlockContext<'_>) -> BlockResult {
        let binding = RouteBinding::Content(ContentRoute {
            generator: ctx.endpoint.generator.clone(),
            methods: ctx.endpoint.supported_methods.clone(),
            probe_nonce: None,
        });
        bind_journaled(path, binding, ctx);
        BlockResult::ok(self.id(), vec![format!("route:{path}")])
    }

    fn cleanup(&self, path: &str, ctx: &BlockContext<'_>) -> BlockResult {
        unbind_journaled(path, ctx);
        BlockResult::ok(self.id(), vec![format!("route:{path}")])
    }
}

/// Bind and remember what was bound before, first write wins.
pub(super) fn bind_journaled(path: &str, binding: RouteBinding, ctx: &BlockContext<'_>) {
    let previous = ctx.dispatcher.bind(path, binding);
    ctx.journal()
        .previous_routes
        .entry(path.to_string())
        .or_insert(previous);
}

/// Put back the journaled binding, or clear the path.
pub(super) fn unbind_journaled(path: &str, ctx: &BlockContext<'_>) {
    let previous = ctx.journal().previous_routes.remove(path).flatten();
    ctx.dispatcher.restore(path, previous);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchRequest;
    use crate::test_support::{TestSite, apache_profile, counting_endpoint};

    #[test]
    fn bound_route_serves_fresh_content_until_cleanup() {
        let site = TestSite::new();
        let (endpoint, calls) = counting_endpoint("/discovery.json");
        let profile = apache_profile();
        let ctx = site.block_context(&profile, &endpoint);
        let content = endpoint.generate().expect("content");

        assert!(RegisterDynamicRoute.execute(&endpoint.path, &content, &ctx).success());
        assert!(RegisterDynamicRoute.execute(&endpoint.path, &content, &ctx).success());
        assert_eq!(site.dispatcher.routes(), vec!["/discovery.json"]);

        let before = calls.load(std::sync::atomic::Ordering::SeqCst);
        let response = site
            .dispatcher
            .dispatch(&DispatchRequest::get("/discovery.json"))
            .expect("handled");
        assert_eq!(response.status, 200);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), before + 1);

        assert!(RegisterDynamicRoute.cleanup(&endpoint.path, &ctx).success());
        assert!(!site.dispatcher.handles("/discovery.json"));
        assert!(RegisterDynamicRoute.cleanup(&endpoint.path, &ctx).success());
    }
}
