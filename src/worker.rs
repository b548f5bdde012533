use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;

use super::{
    AipError, Config, Entity, PreservationQueue, QueueError, QueueStore, RedisStore,
    RepositoryFetcher, SwiftDepositer, aip, log_preservation_event, log_preservation_failure,
};

#[derive(Debug, Error)]
pub(crate) enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Aip(#[from] AipError),
}

static SHUTDOWN_SIGNALLED: AtomicBool = AtomicBool::new(false);
static SIGNAL_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Cooperative run state threaded through the polling loop. A shutdown
/// request (from a signal or a caller) finishes the in-flight item and
/// stops before the next dequeue.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunContext {
    stopped: Arc<AtomicBool>,
}

impl RunContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn should_continue(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && !SHUTDOWN_SIGNALLED.load(Ordering::SeqCst)
    }

    pub(crate) fn request_shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

extern "C" fn handle_signal(_signal: libc::c_int) {
    // First signal: finish the current item and exit cleanly. Second
    // signal: the operator means it.
    if SIGNAL_COUNT.fetch_add(1, Ordering::SeqCst) >= 1 {
        unsafe { libc::_exit(1) };
    }
    SHUTDOWN_SIGNALLED.store(true, Ordering::SeqCst);
}

pub(crate) fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }
}

/// The long-running preservation loop: poll the queue, assemble and
/// deposit each entity, classify failures, repeat until shutdown.
pub(crate) fn run(config: &Config, ctx: &RunContext) -> Result<(), WorkerError> {
    let store = RedisStore::connect(&config.queue.redis_url).map_err(QueueError::Store)?;
    let queue = PreservationQueue::new(
        store,
        config.queue.name.clone(),
        config.queue.retry_prefix.clone(),
        config.minimum_age(),
        config.poll_interval(),
        config.queue.max_attempts,
        config.queue.base_backoff_seconds,
    );
    let fetcher = RepositoryFetcher::new(&config.repository);
    let depositer = SwiftDepositer::new(&config.swift, &config.aip_version);

    tracing::info!("worker started, polling {}", config.queue.name);
    loop {
        let entity = match queue.wait_for_next(ctx) {
            Ok(Some(entity)) => entity,
            Ok(None) => break,
            Err(QueueError::MalformedMember { member }) => {
                // Already consumed from the set; requeueing garbage would
                // loop forever.
                tracing::error!("dropping malformed queue member: {member}");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        process_entity(&entity, config, &queue, &fetcher, &depositer)?;
    }
    tracing::info!("worker stopped");
    Ok(())
}

/// Preserve one entity immediately, bypassing the queue.
pub(crate) fn preserve_single(config: &Config, entity: &Entity) -> Result<(), WorkerError> {
    let fetcher = RepositoryFetcher::new(&config.repository);
    let depositer = SwiftDepositer::new(&config.swift, &config.aip_version);
    deposit_entity(entity, config, &fetcher, &depositer)?;
    Ok(())
}

fn deposit_entity(
    entity: &Entity,
    config: &Config,
    fetcher: &RepositoryFetcher,
    depositer: &SwiftDepositer,
) -> Result<(), AipError> {
    aip::create(entity, config, fetcher, |filename, directory| {
        let deposited = depositer.deposit_file(filename, &entity.sanitized_uuid())?;
        log_preservation_event(&config.logdir, &deposited, directory);
        Ok(())
    })
}

/// One queue item, end to end. Retryable failures go back on the queue
/// with backoff until attempts run out; everything unpreservable is
/// logged and dropped so the queue keeps moving.
fn process_entity<S: QueueStore>(
    entity: &Entity,
    config: &Config,
    queue: &PreservationQueue<S>,
    fetcher: &RepositoryFetcher,
    depositer: &SwiftDepositer,
) -> Result<(), WorkerError> {
    tracing::info!("{entity}: preserving ...");
    match deposit_entity(entity, config, fetcher, depositer) {
        Ok(()) => {
            tracing::info!("{entity}: preserved");
            Ok(())
        }
        Err(err) if err.retryable() => {
            tracing::warn!("{entity}: attempt failed: {err}");
            let attempts = queue.record_failure(&entity.uuid)?;
            match queue.reschedule_with_backoff(entity, attempts) {
                Ok(()) => {
                    log_preservation_failure(
                        &config.logdir,
                        entity,
                        attempts,
                        false,
                        &err.to_string(),
                    );
                    tracing::info!(
                        "{entity}: requeued after attempt {attempts}, retrying in {}s",
                        queue.backoff(attempts)
                    );
                    Ok(())
                }
                Err(QueueError::MaxAttemptsExceeded { uuid, attempts }) => {
                    log_preservation_failure(
                        &config.logdir,
                        entity,
                        attempts,
                        true,
                        &err.to_string(),
                    );
                    tracing::error!("{uuid}: giving up after {attempts} attempts");
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }
        Err(err) => {
            log_preservation_failure(&config.logdir, entity, 0, true, &err.to_string());
            tracing::error!("{entity}: not preservable, dropping: {err}");
            Ok(())
        }
    }
}
