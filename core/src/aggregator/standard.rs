use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{AggregationAlgorithm, Aggregator};
use crate::candidate::Candidate;

const UNSET: u64 = u64::MAX;

/// K-th best distance seen so far, readable without locking.
#[derive(Debug)]
pub(crate) struct WorstDistance {
    bits: AtomicU64,
}

impl WorstDistance {
    fn new() -> Self {
        Self {
            bits: AtomicU64::new(UNSET),
        }
    }

    fn load(&self) -> Option<f32> {
        decode(self.bits.load(Ordering::Acquire))
    }

    fn rejects(&self, distance: f32) -> bool {
        self.load()
            .is_some_and(|worst| distance.total_cmp(&worst).is_ge())
    }

    /// Stores `distance` only if it improves on the current marker.
    fn lower_to(&self, distance: f32) {
        let next = u64::from(distance.to_bits());
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            if let Some(worst) = decode(current) {
                if distance.total_cmp(&worst).is_ge() {
                    return;
                }
            }
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

fn decode(bits: u64) -> Option<f32> {
    if bits == UNSET {
        None
    } else {
        u32::try_from(bits).ok().map(f32::from_bits)
    }
}

struct Worker {
    stop: CancellationToken,
    handle: JoinHandle<Vec<Candidate>>,
}

/// Ordered insertion with pruning, serialized through one consumer task.
pub struct StandardAggregator {
    num: usize,
    fnum: usize,
    visited: DashSet<String>,
    worst: Arc<WorstDistance>,
    sender: mpsc::Sender<Candidate>,
    receiver: Mutex<Option<mpsc::Receiver<Candidate>>>,
    worker: Mutex<Option<Worker>>,
}

impl StandardAggregator {
    pub fn new(num: usize, fnum: usize, replica: usize) -> Self {
        let capacity = num.saturating_mul(replica).max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            num,
            fnum: fnum.max(num),
            visited: DashSet::with_capacity(capacity),
            worst: Arc::new(WorstDistance::new()),
            sender,
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        }
    }

    /// Current K-th best distance, once `num` candidates have been kept.
    pub fn worst_distance(&self) -> Option<f32> {
        self.worst.load()
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<Candidate>> {
        self.receiver
            .lock()
            .ok()
            .and_then(|mut receiver| receiver.take())
    }
}

#[async_trait]
impl Aggregator for StandardAggregator {
    fn start(&self, token: &CancellationToken) {
        let Some(receiver) = self.take_receiver() else {
            tracing::warn!("standard aggregator started twice");
            return;
        };
        let stop = token.child_token();
        let handle = tokio::spawn(consume(
            receiver,
            stop.clone(),
            self.num,
            Arc::clone(&self.worst),
        ));
        if let Ok(mut worker) = self.worker.lock() {
            *worker = Some(Worker { stop, handle });
        }
    }

    async fn send(&self, token: &CancellationToken, candidates: &[Candidate]) {
        if self.num == 0 {
            return;
        }
        for candidate in candidates.iter().take(self.fnum) {
            if self.sender.is_closed() || token.is_cancelled() {
                return;
            }
            if self.worst.rejects(candidate.distance) {
                continue;
            }
            if !self.visited.insert(candidate.id.clone()) {
                continue;
            }
            let admitted = tokio::select! {
                biased;
                _ = token.cancelled() => false,
                sent = self.sender.send(candidate.clone()) => sent.is_ok(),
            };
            if !admitted {
                // Dropped before reaching the consumer; let another shard's
                // copy take its place.
                let _ = self.visited.remove(&candidate.id);
                return;
            }
        }
    }

    async fn result(&self) -> Vec<Candidate> {
        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        let mut kept = match worker {
            Some(worker) => {
                worker.stop.cancel();
                match worker.handle.await {
                    Ok(kept) => kept,
                    Err(error) => {
                        tracing::warn!(%error, "standard aggregator consumer task failed");
                        Vec::new()
                    }
                }
            }
            None => {
                let mut kept = Vec::with_capacity(self.num);
                if let Some(mut receiver) = self.take_receiver() {
                    receiver.close();
                    while let Ok(candidate) = receiver.try_recv() {
                        insert_pruned(&mut kept, self.num, &self.worst, candidate);
                    }
                }
                kept
            }
        };
        kept.truncate(self.num);
        kept
    }

    fn num(&self) -> usize {
        self.num
    }

    fn fnum(&self) -> usize {
        self.fnum
    }

    fn algorithm(&self) -> AggregationAlgorithm {
        AggregationAlgorithm::ConcurrentQueue
    }
}

async fn consume(
    mut receiver: mpsc::Receiver<Candidate>,
    stop: CancellationToken,
    num: usize,
    worst: Arc<WorstDistance>,
) -> Vec<Candidate> {
    let mut kept = Vec::with_capacity(num);
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            received = receiver.recv() => match received {
                Some(candidate) => insert_pruned(&mut kept, num, &worst, candidate),
                None => break,
            },
        }
    }

    // Everything already accepted into the queue still counts.
    receiver.close();
    while let Some(candidate) = receiver.recv().await {
        insert_pruned(&mut kept, num, &worst, candidate);
    }
    kept
}

/// Inserts `candidate` into the ascending `kept` list, scanning from the tail
/// since late arrivals mostly land near the worse end.
fn insert_pruned(
    kept: &mut Vec<Candidate>,
    num: usize,
    worst: &WorstDistance,
    candidate: Candidate,
) {
    if kept.len() >= num && worst.rejects(candidate.distance) {
        return;
    }
    let mut position = kept.len();
    while position > 0 && kept[position - 1].cmp_distance(&candidate).is_gt() {
        position -= 1;
    }
    if position >= num {
        return;
    }
    kept.insert(position, candidate);
    kept.truncate(num);
    if kept.len() == num {
        if let Some(last) = kept.last() {
            worst.lower_to(last.distance);
        }
    }
}
