//! Exhaustive traversal of the state graph of a live device.
//!
//! Every ordered pair of navigable states, self pairs included, is visited:
//! the device goes to the source, then to the target, and each arrival is
//! checked. This catches broken prompts and edges before a test suite relies
//! on them.

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectError, ObserverError};
use crate::navigator::Device;

/// Order in which sources and targets are enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalOrder {
    /// Sources and targets shuffled independently with a seeded generator, so
    /// a failing order can be reproduced.
    Seeded(u64),
    Explicit {
        sources: Vec<String>,
        targets: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfTestReport {
    /// `(source, target)` pairs in visiting order.
    pub visited: Vec<(String, String)>,
}

impl TraversalOrder {
    fn orderings(&self, device: &Device) -> (Vec<String>, Vec<String>) {
        match self {
            TraversalOrder::Seeded(seed) => {
                let states = device
                    .graph()
                    .navigable_states()
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                let mut rng = StdRng::seed_from_u64(*seed);
                let mut sources = states.clone();
                let mut targets = states;
                sources.shuffle(&mut rng);
                targets.shuffle(&mut rng);
                (sources, targets)
            }
            TraversalOrder::Explicit { sources, targets } => (sources.clone(), targets.clone()),
        }
    }
}

async fn visit(device: &Device, state: &str) -> Result<(), ConnectError> {
    device.goto_state(state).await?;
    let current = device.current_state();
    if current != state {
        return Err(ObserverError::UnexpectedState {
            expected: state.to_string(),
            found: current,
        }
        .into());
    }
    Ok(())
}

/// Visits every `(source, target)` pair; the first failing pair aborts with
/// [`ConnectError::SelfTestFailed`].
pub async fn iterate_over_device_states(
    device: &Device,
    order: TraversalOrder,
) -> Result<SelfTestReport, ConnectError> {
    let (sources, targets) = order.orderings(device);
    info!(
        "{}: self-test over {} sources and {} targets",
        device.name(),
        sources.len(),
        targets.len()
    );

    let mut report = SelfTestReport::default();
    for source in &sources {
        for target in &targets {
            debug!("{}: self-test '{}' -> '{}'", device.name(), source, target);
            let pair = async {
                visit(device, source).await?;
                visit(device, target).await
            };
            pair.await.map_err(|cause| ConnectError::SelfTestFailed {
                source_state: source.clone(),
                target: target.clone(),
                cause: Box::new(cause),
            })?;
            report.visited.push((source.clone(), target.clone()));
        }
    }
    Ok(report)
}
