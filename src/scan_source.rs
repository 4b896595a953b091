//! Scan producer for the live tracking loop.
//!
//! Replays recorded scan batches at a fixed cadence into a bounded channel.
//! A batch that finds the channel full is discarded: the consumer is still
//! busy with the previous tick and the next scan will be fresher anyway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::scan_log::ScanTick;

/// Sends `ticks` one per `interval`. Returns the number of batches delivered.
pub async fn replay_loop(
    ticks: Vec<ScanTick>,
    interval: Duration,
    tx: mpsc::Sender<ScanTick>,
    dropped: Arc<AtomicU64>,
) -> u64 {
    let mut sent = 0u64;

    for tick in ticks {
        match tx.try_send(tick) {
            Ok(_) => {
                sent += 1;
                if sent % 50 == 0 {
                    log::debug!("[scan] {} batches delivered", sent);
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::info!("[scan] Channel closed after {} batches", sent);
                break;
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Previous tick still in flight, drop this scan
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        if !interval.is_zero() {
            sleep(interval).await;
        }
    }

    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawScanSample;

    fn ticks(n: usize) -> Vec<ScanTick> {
        (0..n)
            .map(|i| ScanTick {
                timestamp: i as f64,
                samples: vec![RawScanSample::new("AA:BB:CC:1", -50.0)],
                truth: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_busy_consumer_drops_scans() {
        let (tx, mut rx) = mpsc::channel(1);
        let dropped = Arc::new(AtomicU64::new(0));

        // Nobody receives while the producer runs
        let sent = replay_loop(ticks(5), Duration::ZERO, tx, dropped.clone()).await;

        assert_eq!(sent, 1);
        assert_eq!(dropped.load(Ordering::Relaxed), 4);
        assert_eq!(rx.recv().await.map(|t| t.timestamp), Some(0.0));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_idle_consumer_receives_everything() {
        let (tx, mut rx) = mpsc::channel(8);
        let dropped = Arc::new(AtomicU64::new(0));

        let producer = tokio::spawn(replay_loop(
            ticks(5),
            Duration::from_millis(1),
            tx,
            dropped.clone(),
        ));

        let mut received = Vec::new();
        while let Some(tick) = rx.recv().await {
            received.push(tick.timestamp);
        }

        assert_eq!(producer.await.unwrap(), 5);
        assert_eq!(received, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_closed_channel_stops_producer() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let dropped = Arc::new(AtomicU64::new(0));
        let sent = replay_loop(ticks(3), Duration::ZERO, tx, dropped.clone()).await;
        assert_eq!(sent, 0);
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }
}
