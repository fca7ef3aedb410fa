use super::dynamic_route::{bind_journaled, unbind_journaled};
use super::{BlockContext, BuildingBlock};
use crate::core::errors::BlockError;
use crate::core::types::{BlockId, BlockResult};
use crate::dispatch::{ProxyRoute, RouteBinding};
use crate::endpoint::Content;

/// Binds the path to a forwarding handler for the endpoint's upstream.
pub struct RegisterProxyRoute;

impl BuildingBlock for RegisterProxyRoute {
    fn id(&self) -> BlockId {
        BlockId::RegisterProxyRoute
    }

    fn execute(&self, path: &str, _content: &Content, ctx: &BlockContext<'_>) -> BlockResult {
        let Some(target) = ctx.endpoint.proxy.clone() else {
            return BlockResult::err(
                self.id(),
                BlockError::unsupported(format!("{path} has no upstream configured")),
            );
        };
        let upstream = target.upstream.clone();
        let binding = RouteBinding::Proxy(ProxyRoute {
            target,
            methods: ctx.endpoint.supported_methods.clone(),
        });
        bind_journaled(path, binding, ctx);
        BlockResult::ok(self.id(), vec![format!("route:{path}"), upstream])
    }

    fn cleanup(&self, path: &str, ctx: &BlockContext<'_>) -> BlockResult {
        unbind_journaled(path, ctx);
        BlockResult::ok(self.id(), vec![format!("route:{path}")])
    }
}
