//! Background task queue with a durable dump file.
//!
//! Embedding refreshes run off the request path. Queued tasks are mirrored
//! into task-queue.json so a crash or restart re-runs whatever never
//! finished.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU16, Ordering},
        mpsc, Arc, RwLock,
    },
    thread::sleep,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::random;
use serde::{Deserialize, Serialize};

use crate::{
    app::errors::AppError,
    config::Config,
    eid::Eid,
    profiles::ProfileStore,
    semantic::{text, EmbeddingWorker},
};

const QUEUE_DUMP_FILE: &str = "task-queue.json";

pub fn now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis()
}

fn throttle(counter: Arc<AtomicU16>, config: Arc<RwLock<Config>>) {
    while counter.load(Ordering::Relaxed) >= config.read().unwrap().task_queue_max_threads {
        sleep(Duration::from_millis(100));
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Status {
    Interrupted,
    Pending,
    InProgress,
    Done,
    /// Failed, worth retrying
    Error(String),
    /// Failed permanently
    Rejected(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueDump {
    pub queue: Vec<TaskDump>,
    pub now: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDump {
    pub id: Eid,
    pub task: Task,
    pub status: Status,
    #[serde(default)]
    pub attempt: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Task {
    /// Re-embed a profile's search text and store the vector
    RefreshEmbedding { profile_id: Eid },

    /// Gracefully shut down the task queue
    Shutdown,
}

impl Task {
    pub fn run(&self, store: Arc<dyn ProfileStore>, embedder: Arc<EmbeddingWorker>) -> Status {
        match self {
            Task::RefreshEmbedding { profile_id } => {
                let refresh = || -> Result<(), AppError> {
                    let profile = store.get(profile_id)?.ok_or(AppError::NotFound)?;
                    let search_text = text::to_search_text(&profile);

                    log::debug!("embedding profile {profile_id}");
                    let vector = embedder.embed(&search_text)?;
                    store.set_embedding(profile_id, vector)?;

                    Ok(())
                };

                match refresh() {
                    Ok(()) => Status::Done,
                    Err(err) if is_retryable(&err) => Status::Error(err.to_string()),
                    Err(err) => Status::Rejected(err.to_string()),
                }
            }
            Task::Shutdown => unreachable!(),
        }
    }
}

/// Transient failures are retried; a deleted profile or a bad vector never
/// gets better on its own.
fn is_retryable(err: &AppError) -> bool {
    matches!(
        err,
        AppError::EmbeddingUnavailable(_) | AppError::IO(_) | AppError::Other(_)
    )
}

pub fn start_queue(
    task_rx: mpsc::Receiver<Task>,
    store: Arc<dyn ProfileStore>,
    embedder: Arc<EmbeddingWorker>,
    config: Arc<RwLock<Config>>,
    base_path: PathBuf,
) {
    let thread_ctr = Arc::new(AtomicU16::new(0));

    log::debug!("waiting for job");
    while let Ok(task) = task_rx.recv() {
        log::debug!("got the job");
        let store = store.clone();
        let embedder = embedder.clone();
        let thread_counter = thread_ctr.clone();
        let config = config.clone();
        let base_path = base_path.clone();

        // graceful shutdown: drain running workers first
        if let Task::Shutdown = &task {
            while thread_counter.load(Ordering::Relaxed) > 0 {
                sleep(Duration::from_millis(100));
            }
            return;
        };

        let id = save_task(&base_path, task.clone(), Status::Pending);
        let task_handle = std::thread::spawn({
            let thread_counter = thread_counter.clone();
            let id = id.clone();
            let base_path = base_path.clone();
            move || {
                throttle(thread_counter.clone(), config.clone());

                thread_counter.fetch_add(1, Ordering::Relaxed);
                set_status(&base_path, id.clone(), Status::InProgress);

                let max_retries = config.read().unwrap().task_queue_max_retries;
                let mut attempt = 0usize;

                loop {
                    let status = task.run(store.clone(), embedder.clone());

                    match &status {
                        Status::Error(msg) if attempt < max_retries => {
                            attempt += 1;
                            let delay_ms = 2000 * 2u64.pow(attempt as u32 - 1) + rand_jitter();
                            log::info!(
                                "task {id}: retrying (attempt {attempt}/{max_retries}) after error: {msg}, backoff {delay_ms}ms",
                            );
                            set_attempt(&base_path, id.clone(), attempt);
                            set_status(&base_path, id.clone(), Status::Pending);
                            sleep(Duration::from_millis(delay_ms));
                        }
                        _ => {
                            if let Status::Rejected(msg) = &status {
                                log::warn!("task {id}: rejected: {msg}");
                            }
                            set_status(&base_path, id.clone(), status);
                            break;
                        }
                    }
                }

                // remove task a bit later to give clients a chance to observe it
                std::thread::spawn({
                    let base_path = base_path.clone();
                    move || {
                        sleep(Duration::from_secs(10));
                        remove_task(&base_path, id);
                    }
                });
            }
        });

        // handle thread panics
        std::thread::spawn(move || {
            if let Err(err) = task_handle.join() {
                log::error!("task_handle panicked: {err:?}");
                remove_task(&base_path, id);
            }

            thread_counter.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

pub fn read_queue_dump(base_path: &Path) -> QueueDump {
    let dump_path = base_path.join(QUEUE_DUMP_FILE);

    if dump_path.exists() {
        match std::fs::read(&dump_path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|err| {
                log::error!("queue dump is malformed, starting empty: {err}");
                QueueDump {
                    queue: vec![],
                    now: now(),
                }
            }),
            Err(err) => {
                log::error!("failed to read queue dump: {err}");
                QueueDump {
                    queue: vec![],
                    now: now(),
                }
            }
        }
    } else {
        QueueDump {
            queue: vec![],
            now: now(),
        }
    }
}

pub fn write_queue_dump(base_path: &Path, queue_dump: &QueueDump) {
    let dump_path = base_path.join(QUEUE_DUMP_FILE);

    let queue_dump_str = serde_json::to_string_pretty(&queue_dump).unwrap();
    if let Err(err) = std::fs::write(&dump_path, queue_dump_str.as_bytes()) {
        log::error!("failed to write queue dump: {err}");
    }
}

pub fn save_task(base_path: &Path, task: Task, status: Status) -> Eid {
    let eid = Eid::new();

    let task_dump = TaskDump {
        id: eid.clone(),
        task,
        status,
        attempt: 0,
    };

    let mut queue_dump = read_queue_dump(base_path);
    queue_dump.queue.push(task_dump);
    queue_dump.now = now();
    write_queue_dump(base_path, &queue_dump);

    eid
}

pub fn set_status(base_path: &Path, id: Eid, status: Status) {
    let mut queue_dump = read_queue_dump(base_path);
    if let Some(task_dump) = queue_dump.queue.iter_mut().find(|td| td.id == id) {
        task_dump.status = status;
    }

    queue_dump.now = now();
    write_queue_dump(base_path, &queue_dump);
}

fn set_attempt(base_path: &Path, id: Eid, attempt: usize) {
    let mut queue_dump = read_queue_dump(base_path);
    if let Some(task_dump) = queue_dump.queue.iter_mut().find(|td| td.id == id) {
        task_dump.attempt = attempt;
    }
    queue_dump.now = now();
    write_queue_dump(base_path, &queue_dump);
}

pub fn remove_task(base_path: &Path, id: Eid) {
    let mut queue_dump = read_queue_dump(base_path);
    queue_dump.queue.retain(|td| td.id != id);
    queue_dump.now = now();
    write_queue_dump(base_path, &queue_dump);
}

fn rand_jitter() -> u64 {
    random::<u64>() % 2000
}
