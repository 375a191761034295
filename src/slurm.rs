//! SLURM scheduler environment helpers.
//!
//! When launched inside a SLURM allocation, the default worker count follows
//! the allocation instead of the host's core count. These functions return
//! `None` if the variable is not set (e.g., when not running under SLURM).
//!
//! # Environment Variables
//!
//! | Function | Variable | Description |
//! |----------|----------|-------------|
//! | `job_id()` | `SLURM_JOB_ID` | Unique job identifier |
//! | `ntasks()` | `SLURM_NTASKS` | Tasks in the whole job |
//! | `local_size()` | `SLURM_NTASKS_PER_NODE` | Number of tasks on this node |
//! | `cpus_per_task()` | `SLURM_CPUS_PER_TASK` | CPUs allocated per task |

use std::env;

fn parse_positive(var: &str) -> Option<usize> {
    env::var(var)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .filter(|&n: &usize| n > 0)
}

/// Check if running under SLURM job scheduler.
pub fn is_slurm_job() -> bool {
    env::var("SLURM_JOB_ID").is_ok()
}

/// Get the SLURM job ID.
pub fn job_id() -> Option<String> {
    env::var("SLURM_JOB_ID").ok()
}

/// Get the number of tasks in the job.
pub fn ntasks() -> Option<usize> {
    parse_positive("SLURM_NTASKS")
}

/// Get the number of tasks per node.
pub fn local_size() -> Option<usize> {
    parse_positive("SLURM_NTASKS_PER_NODE").or_else(|| {
        // Fallback: parse first entry of SLURM_TASKS_PER_NODE (format: "4(x2)")
        env::var("SLURM_TASKS_PER_NODE")
            .ok()
            .and_then(|s| s.split(['(', ',']).next().and_then(|n| n.parse().ok()))
            .filter(|&n: &usize| n > 0)
    })
}

/// Get the number of CPUs per task.
pub fn cpus_per_task() -> Option<usize> {
    parse_positive("SLURM_CPUS_PER_TASK")
}

/// Worker count implied by the allocation.
///
/// A single task granted several CPUs runs one worker per CPU; otherwise the
/// task count wins.
pub fn worker_hint() -> Option<usize> {
    if !is_slurm_job() {
        return None;
    }
    match (ntasks().or_else(local_size), cpus_per_task()) {
        (Some(1) | None, Some(cpus)) => Some(cpus),
        (Some(tasks), _) => Some(tasks),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that mutate environment variables are combined into a single test
    /// to avoid data races when tests run in parallel.
    #[test]
    fn slurm_env_var_parsing() {
        const VARS: [&str; 5] = [
            "SLURM_JOB_ID",
            "SLURM_NTASKS",
            "SLURM_NTASKS_PER_NODE",
            "SLURM_TASKS_PER_NODE",
            "SLURM_CPUS_PER_TASK",
        ];
        let clear = || {
            for var in VARS {
                unsafe { std::env::remove_var(var) };
            }
        };
        clear();

        // --- outside a job there is no hint ---
        unsafe { std::env::set_var("SLURM_NTASKS", "8") };
        assert!(!is_slurm_job());
        assert_eq!(worker_hint(), None);

        // --- task count wins inside a job ---
        unsafe { std::env::set_var("SLURM_JOB_ID", "12345") };
        assert!(is_slurm_job());
        assert_eq!(job_id(), Some("12345".to_string()));
        assert_eq!(worker_hint(), Some(8));

        // --- local_size: parses SLURM_TASKS_PER_NODE "4(x2)" format ---
        unsafe {
            std::env::remove_var("SLURM_NTASKS");
            std::env::set_var("SLURM_TASKS_PER_NODE", "4(x2)");
        }
        assert_eq!(local_size(), Some(4));
        assert_eq!(worker_hint(), Some(4));

        // --- local_size: SLURM_NTASKS_PER_NODE takes priority ---
        unsafe { std::env::set_var("SLURM_NTASKS_PER_NODE", "6") };
        assert_eq!(local_size(), Some(6));

        // --- one task with many CPUs runs a worker per CPU ---
        unsafe {
            std::env::set_var("SLURM_NTASKS", "1");
            std::env::set_var("SLURM_CPUS_PER_TASK", "16");
        }
        assert_eq!(cpus_per_task(), Some(16));
        assert_eq!(worker_hint(), Some(16));

        // --- zero and garbage are ignored ---
        unsafe {
            std::env::set_var("SLURM_NTASKS", "0");
            std::env::set_var("SLURM_CPUS_PER_TASK", "many");
        }
        assert_eq!(ntasks(), None);
        assert_eq!(cpus_per_task(), None);

        clear();
    }
}
