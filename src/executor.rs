//! Blocking compute boundary
//!
//! Path search and metadata assembly are CPU-bound. Scheduling passes run
//! them through [`offload_compute`] so a large claim batch never stalls the
//! tokio reactor that drives catalog I/O and the daemon timer.

use tokio::task;

use crate::error::{ConveyorError, Result};

/// Run a CPU-heavy closure on tokio's blocking pool
///
/// A panic inside `task` surfaces as [`ConveyorError::Task`].
pub async fn offload_compute<F, T>(task: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(task)
        .await
        .map_err(|join_err| ConveyorError::Task(format!("Compute task panicked: {}", join_err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[tokio::test]
    async fn test_offload_compute_basic() {
        let sum = offload_compute(|| (1..=100u64).sum::<u64>()).await.unwrap();
        assert_eq!(sum, 5050);
    }

    #[tokio::test]
    async fn test_offload_parallel_inside() {
        let squares = offload_compute(|| {
            (0..64u64).into_par_iter().map(|n| n * n).collect::<Vec<_>>()
        })
        .await
        .unwrap();
        assert_eq!(squares.len(), 64);
        assert_eq!(squares[8], 64);
    }

    #[tokio::test]
    async fn test_offload_compute_panic() {
        let result = offload_compute(|| -> u8 { panic!("boom") }).await;
        let err = result.unwrap_err();
        assert!(matches!(err, ConveyorError::Task(_)));
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn test_reactor_stays_responsive() {
        let heavy = tokio::spawn(offload_compute(|| {
            std::thread::sleep(std::time::Duration::from_millis(50));
            1u8
        }));
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        assert_eq!(heavy.await.unwrap().unwrap(), 1);
    }
}
