//! Runs a strategy's blocks in order and rolls back on the first failure.

use tracing::{info, instrument, warn};

use crate::blocks::{BlockContext, block};
use crate::core::errors::{CleanupError, UnknownStrategy};
use crate::core::registry::resolve;
use crate::core::types::{BlockId, BlockResult, CleanupSummary, ExecutionResult, ServerProfile};
use crate::dispatch::Dispatcher;
use crate::endpoint::{Content, Endpoint};
use crate::io::config::SiteConfig;

/// Shared handles a run executes against.
#[derive(Clone, Copy)]
pub struct DeployEnv<'a> {
    pub site: &'a SiteConfig,
    pub profile: &'a ServerProfile,
    pub dispatcher: &'a Dispatcher,
}

pub struct Executor;

impl Executor {
    /// Run `strategy_name` for `endpoint`.
    ///
    /// Unknown names fail before any block runs. Otherwise the result is
    /// either fully successful or every succeeded block has been cleaned up
    /// in reverse order (cleanup failures are recorded, never raised).
    #[instrument(skip_all, fields(strategy = strategy_name, path = %endpoint.path))]
    pub fn run(
        strategy_name: &str,
        endpoint: &Endpoint,
        content: &Content,
        env: DeployEnv<'_>,
    ) -> Result<ExecutionResult, UnknownStrategy> {
        let strategy = resolve(strategy_name)?;
        Ok(Self::run_blocks(strategy.name, strategy.blocks, endpoint, content, env))
    }

    /// Run an explicit block list with saga semantics.
    pub fn run_blocks(
        strategy_name: &str,
        blocks: &[BlockId],
        endpoint: &Endpoint,
        content: &Content,
        env: DeployEnv<'_>,
    ) -> ExecutionResult {
        let ctx = BlockContext::new(env.site, env.profile, env.dispatcher, endpoint);
        let mut block_results = Vec::with_capacity(blocks.len());
        let mut executed = Vec::new();
        let mut failed = Vec::new();

        for &id in blocks {
            let result = block(id).execute(&endpoint.path, content, &ctx);
            let ok = result.success();
            if let Some(err) = result.error() {
                warn!(block = %id, err = %err, "block failed, rolling back");
            }
            block_results.push(result);
            if ok {
                executed.push(id);
            } else {
                failed.push(id);
                break;
            }
        }

        let success = failed.is_empty();
        let cleanup_summary = if success {
            CleanupSummary::default()
        } else {
            reverse_cleanup(&executed, &endpoint.path, &ctx)
        };
        info!(success, executed = executed.len(), "strategy run finished");
        ExecutionResult {
            strategy: strategy_name.to_string(),
            success,
            blocks_executed: executed,
            blocks_failed: failed,
            block_results,
            cleanup_summary,
        }
    }

    /// Remove everything `strategy_name` deploys for `endpoint`.
    #[instrument(skip_all, fields(strategy = strategy_name, path = %endpoint.path))]
    pub fn teardown(
        strategy_name: &str,
        endpoint: &Endpoint,
        env: DeployEnv<'_>,
    ) -> Result<CleanupSummary, UnknownStrategy> {
        let strategy = resolve(strategy_name)?;
        let ctx = BlockContext::new(env.site, env.profile, env.dispatcher, endpoint);
        Ok(reverse_cleanup(strategy.blocks, &endpoint.path, &ctx))
    }
}

fn reverse_cleanup(blocks: &[BlockId], path: &str, ctx: &BlockContext<'_>) -> CleanupSummary {
    let mut summary = CleanupSummary::default();
    for &id in blocks.iter().rev() {
        let result: BlockResult = block(id).cleanup(path, ctx);
        match result.outcome {
            Ok(_) => summary.reversed.push(id),
            Err(error) => {
                warn!(block = %id, err = %error, "cleanup failed");
                summary.failures.push(CleanupError { block: id, error });
            }
        }
    }
    summary
}
