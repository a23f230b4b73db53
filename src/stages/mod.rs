//! Stage action catalog.
//!
//! Each stage consumes work in its `INPUT_STATUS` and produces work in
//! its `OUTPUT_STATUS`; implementations differ only in which external
//! collaborators they drive. The worker harness runs any of them
//! identically.

mod bundler;
mod deleter;
mod finisher;
mod locator;
mod move_verifier;
mod picker;
mod rate_limiter;
mod replicator;
mod tape;
mod tape_mover;
mod tape_retriever;
mod tape_verifier;
mod unpacker;

pub use bundler::Bundler;
pub use deleter::Deleter;
pub use finisher::Finisher;
pub use locator::Locator;
pub use move_verifier::MoveVerifier;
pub use picker::Picker;
pub use rate_limiter::RateLimiter;
pub use replicator::Replicator;
pub use tape_mover::TapeMover;
pub use tape_retriever::TapeRetriever;
pub use tape_verifier::TapeVerifier;
pub use unpacker::Unpacker;

use std::sync::Arc;

use crate::client::CoordinatorClient;
use crate::config::WorkerConfig;
use crate::worker::StageAction;

/// Instantiate a stage by name, reading its stage-specific environment.
pub fn build(
    stage: &str,
    config: &WorkerConfig,
    client: Arc<CoordinatorClient>,
) -> anyhow::Result<Arc<dyn StageAction>> {
    Ok(match stage {
        "picker" => Arc::new(Picker::from_env(config, client)?),
        "locator" => Arc::new(Locator::from_env(config, client)?),
        "bundler" => Arc::new(Bundler::from_env(config, client)?),
        "rate-limiter" => Arc::new(RateLimiter::from_env()?),
        "replicator" => Arc::new(Replicator::from_env()?),
        "move-verifier" => Arc::new(MoveVerifier::from_env()?),
        "tape-mover" => Arc::new(TapeMover::from_env()?),
        "tape-retriever" => Arc::new(TapeRetriever::from_env()?),
        "tape-verifier" => Arc::new(TapeVerifier::from_env(config)?),
        "deleter" => Arc::new(Deleter::from_env()?),
        "unpacker" => Arc::new(Unpacker::from_env(config)?),
        "finisher" => Arc::new(Finisher::new(client)),
        other => anyhow::bail!("unknown stage '{other}'"),
    })
}

/// Names accepted by `build`, for CLI help output.
pub const STAGE_NAMES: [&str; 12] = [
    "picker",
    "locator",
    "bundler",
    "rate-limiter",
    "replicator",
    "move-verifier",
    "tape-mover",
    "tape-retriever",
    "tape-verifier",
    "deleter",
    "unpacker",
    "finisher",
];
