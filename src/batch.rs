use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::task::{JoinHandle, LocalSet};

use crate::config::ClientConfig;
use crate::network_client::NetworkError;
use crate::session::{FailureReason, Outcome, SessionClient};
use crate::transport::Transport;
use crate::utils;

pub const DEFAULT_LAUNCH_DELAY: Duration = Duration::from_millis(300);

/// What to launch: `count` sessions against one game.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub game_pin: u32,
    pub count: usize,
    pub proxies: Vec<String>,
    pub launch_delay: Duration,
    pub name_prefix: String,
}

impl BatchPlan {
    pub fn new(game_pin: u32, count: usize) -> Self {
        Self {
            game_pin,
            count,
            proxies: Vec::new(),
            launch_delay: DEFAULT_LAUNCH_DELAY,
            name_prefix: utils::DEFAULT_PREFIX.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct BatchResult {
    pub total_requested: usize,
    pub succeeded: usize,
    /// One entry per session, in launch order.
    pub outcomes: Vec<Outcome>,
}

impl BatchResult {
    pub fn failed(&self) -> usize {
        self.total_requested - self.succeeded
    }
}

/// Round-robin proxy for session `index`.
pub fn proxy_for(proxies: &[String], index: usize) -> Option<&str> {
    if proxies.is_empty() {
        None
    } else {
        Some(proxies[index % proxies.len()].as_str())
    }
}

enum Launched {
    Running(JoinHandle<Outcome>),
    Rejected(FailureReason),
}

/// Launches every session of `plan` with a fixed stagger, then waits for all
/// of them. Sessions run as local tasks on the current thread; a session that
/// panics is counted as failed without disturbing the others.
pub async fn run_batch<T, F>(plan: &BatchPlan, config: Arc<ClientConfig>, make_transport: F) -> BatchResult
where
    T: Transport + 'static,
    T::Channel: 'static,
    F: Fn(usize, Option<&str>) -> Result<T, NetworkError>,
{
    LocalSet::new()
        .run_until(launch_and_collect(plan, config, make_transport))
        .await
}

async fn launch_and_collect<T, F>(plan: &BatchPlan, config: Arc<ClientConfig>, make_transport: F) -> BatchResult
where
    T: Transport + 'static,
    T::Channel: 'static,
    F: Fn(usize, Option<&str>) -> Result<T, NetworkError>,
{
    let mut launched = Vec::new();

    for index in 0..plan.count {
        let name = utils::make_nickname(&plan.name_prefix, &mut rand::thread_rng());
        let proxy = proxy_for(&plan.proxies, index);
        debug!("Bot {} ({}) using proxy {:?}", index, name, proxy);

        launched.push(match make_transport(index, proxy) {
            Ok(transport) => {
                let session = SessionClient::new(transport, config.clone(), plan.game_pin, name);
                Launched::Running(tokio::task::spawn_local(session.join()))
            }
            Err(e) => {
                error!("Bot {} ({}) could not be set up: {}", index, name, e);
                Launched::Rejected(FailureReason::UnexpectedError(e.to_string()))
            }
        });

        if index + 1 < plan.count {
            tokio::time::sleep(plan.launch_delay).await;
        }
    }

    let mut outcomes = Vec::with_capacity(launched.len());
    for (index, entry) in launched.into_iter().enumerate() {
        let outcome = match entry {
            Launched::Running(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Bot {} exception: {}", index, e);
                    Outcome::Failed(FailureReason::UnexpectedError(e.to_string()))
                }
            },
            Launched::Rejected(reason) => Outcome::Failed(reason),
        };
        outcomes.push(outcome);
    }

    let succeeded = outcomes.iter().filter(|o| o.is_joined()).count();
    info!("Batch finished: {}/{} joined", succeeded, plan.count);

    BatchResult {
        total_requested: plan.count,
        succeeded,
        outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_released_once, test_config, MockTransport};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn plan(count: usize, proxies: &[&str]) -> BatchPlan {
        BatchPlan {
            proxies: proxies.iter().map(|p| p.to_string()).collect(),
            launch_delay: Duration::ZERO,
            ..BatchPlan::new(123456, count)
        }
    }

    #[test]
    fn proxies_are_assigned_round_robin() {
        let proxies = vec!["a:1".to_string(), "b:2".to_string()];
        let assigned: Vec<_> = (0..5).map(|i| proxy_for(&proxies, i)).collect();
        assert_eq!(assigned, vec![Some("a:1"), Some("b:2"), Some("a:1"), Some("b:2"), Some("a:1")]);
        assert_eq!(proxy_for(&[], 3), None);
    }

    #[tokio::test]
    async fn sessions_receive_round_robin_proxies() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let recorder = seen.clone();
        let result = run_batch(&plan(5, &["a:1", "b:2"]), test_config(), move |index, proxy| {
            recorder.borrow_mut().push((index, proxy.map(str::to_string)));
            Ok(MockTransport::joining())
        })
        .await;

        assert_eq!(result.succeeded, 5);
        let seen = seen.borrow();
        let proxies: Vec<_> = seen.iter().map(|(_, p)| p.as_deref()).collect();
        assert_eq!(proxies, vec![Some("a:1"), Some("b:2"), Some("a:1"), Some("b:2"), Some("a:1")]);
    }

    #[tokio::test]
    async fn no_proxies_means_direct_connections() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let recorder = seen.clone();
        run_batch(&plan(3, &[]), test_config(), move |_, proxy| {
            recorder.borrow_mut().push(proxy.map(str::to_string));
            Ok(MockTransport::joining())
        })
        .await;
        assert_eq!(*seen.borrow(), vec![None, None, None]);
    }

    #[tokio::test]
    async fn panicking_session_is_isolated() {
        let transports: Vec<MockTransport> = (0..10)
            .map(|i| {
                let transport = MockTransport::joining();
                if i == 3 {
                    transport.panic_on_reserve();
                }
                transport
            })
            .collect();
        let handed_out = transports.clone();

        let result = run_batch(&plan(10, &[]), test_config(), move |index, _| Ok(handed_out[index].clone())).await;

        assert_eq!(result.total_requested, 10);
        assert_eq!(result.succeeded, 9);
        assert_eq!(result.failed(), 1);
        assert!(matches!(result.outcomes[3], Outcome::Failed(FailureReason::UnexpectedError(_))));
        for (index, outcome) in result.outcomes.iter().enumerate() {
            if index != 3 {
                assert_eq!(*outcome, Outcome::Joined, "session {}", index);
                assert_released_once(&transports[index]);
            }
        }
    }

    #[tokio::test]
    async fn transport_setup_failure_counts_as_failed() {
        let result = run_batch(&plan(4, &["bad"]), test_config(), |index, _| {
            if index == 1 {
                Err(NetworkError::Proxy("malformed proxy".to_string()))
            } else {
                Ok(MockTransport::joining())
            }
        })
        .await;

        assert_eq!(result.succeeded, 3);
        assert!(matches!(result.outcomes[1], Outcome::Failed(FailureReason::UnexpectedError(_))));
    }

    #[tokio::test]
    async fn failures_are_counted_not_fatal() {
        let result = run_batch(&plan(6, &[]), test_config(), |index, _| {
            let transport = MockTransport::joining();
            if index % 2 == 0 {
                transport.fail_open();
            }
            Ok(transport)
        })
        .await;

        assert_eq!(result.succeeded, 3);
        assert!(result.succeeded <= result.total_requested);
        assert_eq!(result.outcomes.len(), 6);
    }

    #[tokio::test]
    async fn large_batch_of_rejected_setups_collects_every_outcome() {
        let result = run_batch(&plan(5_000, &[]), test_config(), |_, _| {
            Err::<MockTransport, _>(NetworkError::Proxy("malformed proxy".to_string()))
        })
        .await;

        assert_eq!((result.succeeded, result.total_requested), (0, 5_000));
        assert_eq!(result.outcomes.len(), 5_000);
    }

    #[tokio::test]
    async fn empty_batch() {
        let result = run_batch(&plan(0, &[]), test_config(), |_, _| Ok(MockTransport::joining())).await;
        assert_eq!((result.succeeded, result.total_requested), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn launches_are_staggered() {
        let started = Rc::new(RefCell::new(Vec::new()));
        let recorder = started.clone();
        let staggered = BatchPlan {
            launch_delay: Duration::from_millis(300),
            ..plan(4, &[])
        };

        run_batch(&staggered, test_config(), move |_, _| {
            recorder.borrow_mut().push(tokio::time::Instant::now());
            Ok(MockTransport::joining())
        })
        .await;

        let started = started.borrow();
        assert_eq!(started.len(), 4);
        for pair in started.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(300));
        }
    }
}
