//! Subprocess executor: a reusable primitive for running an external
//! command with input piped on stdin, capturing byte-capped stdout/stderr,
//! and enforcing a wall-clock timeout (§4.3).
//!
//! Offers a blocking `run` and a fire-and-forget `submit`/`wait` pair
//! backed by a tracked job table. All job-table mutations are serialized
//! behind one `Mutex`; `wait` blocks on a `Condvar` signaled whenever any
//! job reaches a terminal state.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Lifecycle states for a tracked job (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }
}

/// Captured result of one subprocess invocation.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
    pub time_ms: u64,
    pub timed_out: bool,
    pub truncated: bool,
}

/// A tracked subprocess invocation managed by the executor.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub command: Vec<String>,
    pub input_data: Option<String>,
    pub status: JobStatus,
    pub result: Option<Outcome>,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub timeout_s: u64,
    pub max_output: usize,
}

const DEFAULT_MAX_JOBS: usize = 100;

struct JobTable {
    jobs: HashMap<String, Job>,
    /// Insertion order, oldest first, for eviction.
    order: Vec<String>,
}

/// Executes subprocesses with isolation, timeout, and output caps.
pub struct SubprocessExecutor {
    default_timeout: Duration,
    max_output: usize,
    max_jobs: usize,
    table: Arc<Mutex<JobTable>>,
    condvar: Arc<Condvar>,
}

impl SubprocessExecutor {
    pub fn new(default_timeout: Duration, max_output: usize) -> Self {
        Self {
            default_timeout,
            max_output,
            max_jobs: DEFAULT_MAX_JOBS,
            table: Arc::new(Mutex::new(JobTable {
                jobs: HashMap::new(),
                order: Vec::new(),
            })),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Run a subprocess synchronously, piping `input_data` on stdin.
    pub fn run(
        &self,
        command: &[String],
        input_data: Option<&str>,
        timeout: Option<Duration>,
        max_output: Option<usize>,
    ) -> Outcome {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let cap = max_output.unwrap_or(self.max_output);
        run_command(command, input_data, timeout, cap)
    }

    /// Submit a job for background execution. Returns the job id immediately.
    pub fn submit(
        &self,
        command: Vec<String>,
        input_data: Option<String>,
        timeout: Option<Duration>,
    ) -> String {
        let job_id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        let timeout = timeout.unwrap_or(self.default_timeout);
        let job = Job {
            id: job_id.clone(),
            command: command.clone(),
            input_data: input_data.clone(),
            status: JobStatus::Pending,
            result: None,
            created_at: Instant::now(),
            started_at: None,
            completed_at: None,
            timeout_s: timeout.as_secs(),
            max_output: self.max_output,
        };

        {
            let mut table = self.table.lock().expect("job table lock poisoned");
            evict_old_jobs(&mut table, self.max_jobs);
            table.order.push(job_id.clone());
            table.jobs.insert(job_id.clone(), job);
        }

        let table = Arc::clone(&self.table);
        let condvar = Arc::clone(&self.condvar);
        let max_output = self.max_output;
        let id_for_thread = job_id.clone();
        std::thread::spawn(move || {
            {
                let mut guard = table.lock().expect("job table lock poisoned");
                match guard.jobs.get_mut(&id_for_thread) {
                    Some(job) if job.status == JobStatus::Cancelled => return,
                    Some(job) => {
                        job.status = JobStatus::Running;
                        job.started_at = Some(Instant::now());
                    }
                    None => return,
                }
            }

            let (command, input_data, timeout_s) = {
                let guard = table.lock().expect("job table lock poisoned");
                let job = guard.jobs.get(&id_for_thread).expect("job present");
                (
                    job.command.clone(),
                    job.input_data.clone(),
                    Duration::from_secs(job.timeout_s),
                )
            };

            let outcome = run_command(&command, input_data.as_deref(), timeout_s, max_output);

            let mut guard = table.lock().expect("job table lock poisoned");
            if let Some(job) = guard.jobs.get_mut(&id_for_thread) {
                job.status = if outcome.timed_out {
                    JobStatus::Timeout
                } else if outcome.returncode == 0 {
                    JobStatus::Completed
                } else {
                    JobStatus::Failed
                };
                job.completed_at = Some(Instant::now());
                job.result = Some(outcome);
            }
            drop(guard);
            condvar.notify_all();
        });

        job_id
    }

    /// Look up a job's current snapshot.
    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        let table = self.table.lock().expect("job table lock poisoned");
        table.jobs.get(job_id).cloned()
    }

    /// Block until a job reaches a terminal state. Returns `None` if the id
    /// is unknown.
    pub fn wait(&self, job_id: &str) -> Option<Outcome> {
        let mut guard = self.table.lock().expect("job table lock poisoned");
        loop {
            match guard.jobs.get(job_id) {
                None => return None,
                Some(job) if job.status.is_terminal() => return job.result.clone(),
                Some(_) => {
                    guard = self
                        .condvar
                        .wait(guard)
                        .expect("job table condvar wait poisoned");
                }
            }
        }
    }

    /// Cancel a pending job. Returns `true` if the job was pending and is
    /// now cancelled. Cancelling a running job is a documented no-op.
    pub fn cancel(&self, job_id: &str) -> bool {
        let mut guard = self.table.lock().expect("job table lock poisoned");
        if let Some(job) = guard.jobs.get_mut(job_id) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Instant::now());
                drop(guard);
                self.condvar.notify_all();
                return true;
            }
        }
        false
    }

    /// Number of tracked jobs (terminal and non-terminal).
    pub fn job_count(&self) -> usize {
        self.table.lock().expect("job table lock poisoned").jobs.len()
    }
}

fn evict_old_jobs(table: &mut JobTable, max_jobs: usize) {
    if table.jobs.len() < max_jobs {
        return;
    }
    let overflow = table.jobs.len() - max_jobs + 1;
    let mut evicted = 0;
    let mut remaining_order = Vec::with_capacity(table.order.len());
    for id in table.order.drain(..) {
        if evicted < overflow {
            let terminal = table
                .jobs
                .get(&id)
                .map(|j| j.status.is_terminal())
                .unwrap_or(true);
            if terminal {
                table.jobs.remove(&id);
                evicted += 1;
                continue;
            }
        }
        remaining_order.push(id);
    }
    table.order = remaining_order;
}

/// Spawn `command`, write `input_data` to stdin, wait up to `timeout`,
/// capturing stdout/stderr each truncated to `max_output` bytes.
fn run_command(
    command: &[String],
    input_data: Option<&str>,
    timeout: Duration,
    max_output: usize,
) -> Outcome {
    let start = Instant::now();
    let Some((program, args)) = command.split_first() else {
        return Outcome {
            returncode: -1,
            stderr: "empty command".to_string(),
            time_ms: elapsed_ms(start),
            ..Default::default()
        };
    };

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(_) => {
            return Outcome {
                returncode: -1,
                stderr: format!("command not found: {program}"),
                time_ms: elapsed_ms(start),
                ..Default::default()
            };
        }
    };

    if let Some(input) = input_data {
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(input.as_bytes());
        }
    } else {
        // Drop stdin so the child sees EOF immediately rather than blocking.
        drop(child.stdin.take());
    }

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    break None;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => break None,
        }
    };

    if status.is_none() {
        let _ = child.kill();
        let _ = child.wait();
        let _ = stdout_handle.join();
        let _ = stderr_handle.join();
        return Outcome {
            returncode: -1,
            stdout: String::new(),
            stderr: format!("process timed out after {}s", timeout.as_secs()),
            time_ms: elapsed_ms(start),
            timed_out: true,
            truncated: false,
        };
    }

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();
    let truncated = stdout_bytes.len() > max_output || stderr_bytes.len() > max_output;
    let stdout = cap_string(&stdout_bytes, max_output);
    let stderr = cap_string(&stderr_bytes, max_output);

    Outcome {
        returncode: status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1),
        stdout,
        stderr,
        time_ms: elapsed_ms(start),
        timed_out: false,
        truncated,
    }
}

/// Truncate `bytes` to at most `max_output` bytes, backing off to the
/// largest UTF-8 char boundary at or below the cap so the returned string
/// never exceeds `max_output` bytes (a naive byte slice can split a
/// multibyte sequence, and `from_utf8_lossy` then expands it to a 3-byte
/// replacement character, growing past the cap).
fn cap_string(bytes: &[u8], max_output: usize) -> String {
    let mut end = bytes.len().min(max_output);
    while end > 0 && std::str::from_utf8(&bytes[..end]).is_err() {
        end -= 1;
    }
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
