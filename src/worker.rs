//! Out-of-process batch workers.
//!
//! The parent splits its traces into contiguous chunks and hands each chunk to
//! a `seispick-worker` process as one bincode [`WorkerRequest`] on stdin. The
//! worker runs the sequential pipeline and answers with one
//! [`WorkerResponse`] on stdout. Nothing else is shared between the two.

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::analysis::{run_sequential, DetectionConfig, TraceOutcome};
use crate::error::{PickError, Result};
use crate::picking::{AbortFlag, Algorithm};
use crate::record::Trace;

pub const WORKER_BIN: &str = "seispick-worker";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub traces: Vec<Trace>,
    pub algorithm: Algorithm,
    pub config: DetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub traces: Vec<Trace>,
    pub outcomes: Vec<TraceOutcome>,
}

/// Worker side: reads one request, runs it, writes one response.
pub fn serve<R: Read, W: Write>(input: R, output: W) -> Result<usize> {
    let request: WorkerRequest = bincode::deserialize_from(BufReader::new(input))?;
    let mut traces = request.traces;
    debug!("worker received {} traces", traces.len());

    let outcomes = run_sequential(&mut traces, &request.algorithm, &request.config, &AbortFlag::new());
    let count = traces.len();

    let mut output = BufWriter::new(output);
    bincode::serialize_into(&mut output, &WorkerResponse { traces, outcomes })?;
    output.flush()?;
    Ok(count)
}

/// Finds the worker executable: the configured one, else `seispick-worker`
/// beside the current executable or one directory up (test harnesses run from
/// `target/<profile>/deps`).
pub fn worker_program(config: &DetectionConfig) -> Result<PathBuf> {
    if let Some(program) = &config.worker_program {
        return Ok(program.clone());
    }
    let exe = std::env::current_exe()?;
    let name = format!("{}{}", WORKER_BIN, std::env::consts::EXE_SUFFIX);
    exe.ancestors()
        .skip(1)
        .take(2)
        .map(|dir| dir.join(&name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| PickError::Worker(format!("cannot find {} next to {}", name, exe.display())))
}

/// How often the dispatcher looks at the abort flag while workers run.
const ABORT_POLL: Duration = Duration::from_millis(50);

type ChunkResults = Vec<Option<Result<WorkerResponse>>>;

/// Parent side: fans `traces` out over worker processes and writes their
/// events and characteristic functions back onto the originals.
///
/// Raising `abort` kills the running workers; their traces come back failed
/// and untouched.
pub(crate) fn run_parallel(
    traces: &mut [Trace],
    algorithm: &Algorithm,
    config: &DetectionConfig,
    abort: &AbortFlag,
) -> Result<Vec<TraceOutcome>> {
    if abort.is_aborted() {
        return Ok(traces.iter().map(|t| TraceOutcome::failed(t.id(), PickError::Aborted.to_string())).collect());
    }

    let workers = config.processes.min(traces.len()).max(1);
    let chunk_size = traces.len().div_ceil(workers);
    let chunks: Vec<Vec<Trace>> = traces.chunks(chunk_size).map(|c| c.to_vec()).collect();
    let chunk_ids: Vec<Vec<Uuid>> = chunks.iter().map(|c| c.iter().map(Trace::id).collect()).collect();
    info!("dispatching {} traces to {} workers", traces.len(), chunks.len());

    let program = worker_program(config).map_err(|e| e.to_string());
    let results = if Handle::try_current().is_ok() {
        // Blocking on a runtime from inside another one panics, so drive the
        // pool from its own thread.
        debug!("called from inside a tokio runtime, dispatching on a separate thread");
        std::thread::scope(|scope| {
            scope.spawn(|| dispatch(chunks, algorithm, config, program, abort)).join()
        })
        .map_err(|_| PickError::Worker("worker dispatch thread panicked".to_string()))??
    } else {
        dispatch(chunks, algorithm, config, program, abort)?
    };

    let mut by_trace: HashMap<Uuid, TraceOutcome> = HashMap::new();
    for (ids, result) in chunk_ids.iter().zip(results) {
        match result {
            Some(Ok(response)) => {
                for returned in response.traces {
                    if let Some(original) = traces.iter_mut().find(|t| t.id() == returned.id()) {
                        original.events = returned.events;
                        original.cf = returned.cf;
                    }
                }
                for outcome in response.outcomes {
                    by_trace.insert(outcome.trace_id, outcome);
                }
            }
            Some(Err(e)) => {
                error!("worker for {} traces failed: {}", ids.len(), e);
                for &id in ids {
                    by_trace.insert(id, TraceOutcome::failed(id, e.to_string()));
                }
            }
            None => {
                for &id in ids {
                    by_trace.insert(id, TraceOutcome::failed(id, "worker task did not complete"));
                }
            }
        }
    }

    Ok(traces
        .iter()
        .map(|t| {
            by_trace
                .remove(&t.id())
                .unwrap_or_else(|| TraceOutcome::failed(t.id(), "worker returned no result for this trace"))
        })
        .collect())
}

fn dispatch(
    chunks: Vec<Vec<Trace>>,
    algorithm: &Algorithm,
    config: &DetectionConfig,
    program: std::result::Result<PathBuf, String>,
    abort: &AbortFlag,
) -> Result<ChunkResults> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let mut results: ChunkResults = chunks.iter().map(|_| None).collect();

    runtime.block_on(async {
        let mut set = JoinSet::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let request = WorkerRequest { traces: chunk, algorithm: algorithm.clone(), config: config.clone() };
            let program = match &program {
                Ok(program) => program.clone(),
                Err(e) => {
                    results[index] = Some(Err(PickError::Worker(e.clone())));
                    continue;
                }
            };
            set.spawn(async move { (index, run_worker(&program, request).await) });
        }

        let mut poll = tokio::time::interval(ABORT_POLL);
        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(Ok((index, result))) => results[index] = Some(result),
                    Some(Err(e)) => error!("worker task failed: {}", e),
                    None => break,
                },
                _ = poll.tick() => {
                    if abort.is_aborted() {
                        info!("batch aborted, stopping {} workers", set.len());
                        // Dropping the tasks kills their children.
                        set.shutdown().await;
                        for pending in results.iter_mut().filter(|r| r.is_none()) {
                            *pending = Some(Err(PickError::Aborted));
                        }
                        break;
                    }
                }
            }
        }
    });
    Ok(results)
}

async fn run_worker(program: &Path, request: WorkerRequest) -> Result<WorkerResponse> {
    let payload = bincode::serialize(&request)?;
    let mut child = Command::new(program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PickError::Worker(format!("failed to start {}: {}", program.display(), e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PickError::Worker("worker stdin was not captured".to_string()))?;
    let writer = tokio::spawn(async move {
        stdin.write_all(&payload).await?;
        stdin.shutdown().await
    });

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(PickError::Worker(format!("{} exited with {}", program.display(), output.status)));
    }
    writer
        .await
        .map_err(|e| PickError::Worker(format!("writing the request failed: {}", e)))??;

    Ok(bincode::deserialize(&output.stdout)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picking::StaLta;
    use crate::record::Signal;

    fn request() -> WorkerRequest {
        let x: Vec<f64> = (0..1000)
            .map(|i| if i >= 600 { (i as f64 * 0.7).sin() } else { 0.01 * (i as f64).cos() })
            .collect();
        let traces = vec![Trace::new(Signal::new(x, 100.0).unwrap()).with_label("z")];
        WorkerRequest {
            traces,
            algorithm: StaLta::new(0.5, 3.0).unwrap().into(),
            config: DetectionConfig { allow_multiprocessing: false, ..DetectionConfig::default() },
        }
    }

    #[test]
    fn test_serve_round_trip() {
        let request = request();
        let id = request.traces[0].id();
        let input = bincode::serialize(&request).unwrap();
        let mut output = Vec::new();

        let served = serve(input.as_slice(), &mut output).unwrap();
        assert_eq!(served, 1);

        let response: WorkerResponse = bincode::deserialize(&output).unwrap();
        assert_eq!(response.outcomes, vec![TraceOutcome { trace_id: id, result: Ok(1) }]);
        assert_eq!(response.traces[0].id(), id);
        assert_eq!(response.traces[0].cf().len(), 1000);
        assert_eq!(response.traces[0].label.as_deref(), Some("z"));
    }

    #[test]
    fn test_serve_rejects_garbage() {
        let mut output = Vec::new();
        assert!(matches!(serve(&[1u8, 2, 3][..], &mut output), Err(PickError::Codec(_))));
        assert!(output.is_empty());
    }

    #[test]
    fn test_configured_worker_program_wins() {
        let config = DetectionConfig {
            worker_program: Some(PathBuf::from("/opt/bin/picker")),
            ..DetectionConfig::default()
        };
        assert_eq!(worker_program(&config).unwrap(), PathBuf::from("/opt/bin/picker"));
    }

    #[test]
    fn test_missing_worker_fails_every_trace() {
        let (mut request, config) = two_trace_request();
        let outcomes = run_parallel(&mut request.traces, &request.algorithm, &config, &AbortFlag::new()).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.as_ref().unwrap_err().contains("failed to start")));
        assert!(request.traces.iter().all(|t| t.events().is_empty() && t.cf().is_empty()));
    }

    fn two_trace_request() -> (WorkerRequest, DetectionConfig) {
        let mut request = request();
        let second = Trace::new(request.traces[0].signal().clone());
        request.traces.push(second);
        let config = DetectionConfig {
            processes: 2,
            worker_program: Some(PathBuf::from("/nonexistent/seispick-worker")),
            ..DetectionConfig::default()
        };
        (request, config)
    }

    #[tokio::test]
    async fn test_dispatch_from_inside_a_runtime() {
        let (mut request, config) = two_trace_request();
        let outcomes = run_parallel(&mut request.traces, &request.algorithm, &config, &AbortFlag::new()).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.as_ref().unwrap_err().contains("failed to start")));
    }

    #[test]
    fn test_aborted_batch_spawns_nothing() {
        let (mut request, config) = two_trace_request();
        let flag = AbortFlag::new();
        flag.abort();
        let outcomes = run_parallel(&mut request.traces, &request.algorithm, &config, &flag).unwrap();
        assert_eq!(outcomes.len(), 2);
        // The missing worker would have said "failed to start" had it been tried.
        assert!(outcomes.iter().all(|o| o.result.as_ref().unwrap_err().contains("aborted")));
        assert!(request.traces.iter().all(|t| t.cf().is_empty()));
    }
}
