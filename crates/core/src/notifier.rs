//! Launches an external command after a project's watch is installed.
//!
//! At most one process runs per project. Notifications that arrive while it
//! runs collapse into a single rerun with the latest arguments.

use filewatchd_api::ExternalNotifier;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::Command;
use tokio::runtime::Handle;

#[derive(Debug, Clone)]
struct Invocation {
    project_id: String,
    local_root: String,
    creation_time_millis: Option<u64>,
}

enum RunState {
    Running,
    RerunRequested(Invocation),
}

pub struct ProcessNotifier {
    program: PathBuf,
    base_args: Vec<String>,
    runtime: Handle,
    runs: Arc<Mutex<HashMap<String, RunState>>>,
}

impl ProcessNotifier {
    pub fn new(program: impl Into<PathBuf>, runtime: Handle) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            runtime,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Arguments placed before `project sync ...`.
    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }
}

impl ExternalNotifier for ProcessNotifier {
    fn notify(&self, project_id: &str, local_root: &str, creation_time_millis: Option<u64>) {
        let invocation = Invocation {
            project_id: project_id.to_string(),
            local_root: local_root.to_string(),
            creation_time_millis,
        };

        {
            let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = runs.get_mut(project_id) {
                tracing::debug!("Notifier already running for {}, scheduling rerun", project_id);
                *state = RunState::RerunRequested(invocation);
                return;
            }
            runs.insert(project_id.to_string(), RunState::Running);
        }

        let program = self.program.clone();
        let base_args = self.base_args.clone();
        let runs = Arc::clone(&self.runs);
        self.runtime.spawn(async move {
            let mut next = Some(invocation);
            while let Some(invocation) = next.take() {
                run_once(&program, &base_args, &invocation).await;

                let mut runs = runs.lock().unwrap_or_else(PoisonError::into_inner);
                match runs.remove(&invocation.project_id) {
                    Some(RunState::RerunRequested(rerun)) => {
                        runs.insert(invocation.project_id.clone(), RunState::Running);
                        next = Some(rerun);
                    }
                    Some(RunState::Running) | None => {}
                }
            }
        });
    }
}

async fn run_once(program: &Path, base_args: &[String], invocation: &Invocation) {
    let time = invocation.creation_time_millis.unwrap_or(0).to_string();
    let output = Command::new(program)
        .args(base_args)
        .args(["project", "sync", "--path"])
        .arg(&invocation.local_root)
        .args(["--id", invocation.project_id.as_str(), "--time", time.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            tracing::info!("Notifier finished for project {}", invocation.project_id);
        }
        Ok(output) => tracing::warn!(
            "Notifier for project {} exited with {}: {}",
            invocation.project_id,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => tracing::warn!(
            "Failed to launch {} for project {}: {}",
            program.display(),
            invocation.project_id,
            e
        ),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_notifications_coalesce_into_one_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("runs.log");
        let script = dir.path().join("notify.sh");
        std::fs::write(
            &script,
            format!("echo \"$@\" >> '{}'\nsleep 0.3\n", log.display()),
        )
        .unwrap();

        let notifier = ProcessNotifier::new("/bin/sh", Handle::current())
            .with_base_args(vec![script.display().to_string()]);
        notifier.notify("p1", "/work/p1", Some(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        notifier.notify("p1", "/work/p1", Some(2));
        notifier.notify("p1", "/work/p1", Some(3));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let runs = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<_> = runs.lines().collect();
        assert_eq!(lines.len(), 2, "runs: {runs}");
        assert_eq!(lines[0], "project sync --path /work/p1 --id p1 --time 1");
        assert_eq!(lines[1], "project sync --path /work/p1 --id p1 --time 3");
    }
}
