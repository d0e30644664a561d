//! Message passing between ranks.
//!
//! Each rank owns a partition of every zone. Ranks only exchange explicit
//! data through a [`Communicator`]; nothing mutable is shared.
//! [`ChannelComm`] joins in-process ranks (one per thread) with one FIFO
//! channel per ordered rank pair, so messages of consecutive collectives
//! can never overtake each other.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{unbounded, Receiver, Sender};
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::error::CommError;

/// Displacement of one marker vertex, keyed by global point index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HaloRecord {
    pub marker: usize,
    pub global_index: u64,
    pub displacement: [f64; 3],
}

pub trait Communicator: Send {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Every rank contributes its records and receives the records of all
    /// ranks, ordered by rank. Blocks until all peers have contributed.
    fn all_gather(&self, local: Vec<HaloRecord>) -> Result<Vec<HaloRecord>, CommError>;

    fn all_reduce_sum(&self, local: u64) -> Result<u64, CommError>;
}

/// A single-rank world.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather(&self, local: Vec<HaloRecord>) -> Result<Vec<HaloRecord>, CommError> {
        Ok(local)
    }

    fn all_reduce_sum(&self, local: u64) -> Result<u64, CommError> {
        Ok(local)
    }
}

#[derive(Debug, Clone)]
enum Message {
    Records(Vec<HaloRecord>),
    Count(u64),
}

#[derive(Debug)]
pub struct ChannelComm {
    rank: usize,
    size: usize,
    // Indexed by peer rank; `None` at our own rank.
    senders: Vec<Option<Sender<Message>>>,
    receivers: Vec<Option<Receiver<Message>>>,
}

impl ChannelComm {
    /// Creates `size` connected ranks. Hand one to each thread.
    pub fn cluster(size: usize) -> Vec<ChannelComm> {
        let mut senders: Vec<Vec<Option<Sender<Message>>>> = (0..size).map(|_| vec![None; size]).collect();
        let mut receivers: Vec<Vec<Option<Receiver<Message>>>> = (0..size).map(|_| vec![None; size]).collect();
        for from in 0..size {
            for to in 0..size {
                if from != to {
                    let (tx, rx) = unbounded();
                    senders[from][to] = Some(tx);
                    receivers[to][from] = Some(rx);
                }
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ChannelComm { rank, size, senders, receivers })
            .collect()
    }

    fn broadcast(&self, message: Message) -> Result<(), CommError> {
        for (peer, sender) in self.senders.iter().enumerate() {
            if let Some(sender) = sender {
                sender
                    .send(message.clone())
                    .map_err(|_| CommError::Disconnected { peer })?;
            }
        }
        Ok(())
    }

    fn receive(&self, peer: usize) -> Result<Message, CommError> {
        match &self.receivers[peer] {
            Some(rx) => rx.recv().map_err(|_| CommError::Disconnected { peer }),
            None => Err(CommError::UnexpectedMessage { peer, expected: "a remote rank" }),
        }
    }
}

impl Communicator for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather(&self, local: Vec<HaloRecord>) -> Result<Vec<HaloRecord>, CommError> {
        self.broadcast(Message::Records(local.clone()))?;
        let mut gathered = Vec::new();
        for peer in 0..self.size {
            if peer == self.rank {
                gathered.extend_from_slice(&local);
                continue;
            }
            match self.receive(peer)? {
                Message::Records(records) => gathered.extend(records),
                Message::Count(_) => {
                    return Err(CommError::UnexpectedMessage { peer, expected: "halo records" })
                }
            }
        }
        debug!(rank = self.rank, n_records = gathered.len(), "all_gather complete");
        Ok(gathered)
    }

    fn all_reduce_sum(&self, local: u64) -> Result<u64, CommError> {
        self.broadcast(Message::Count(local))?;
        let mut total = local;
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            match self.receive(peer)? {
                Message::Count(n) => total += n,
                Message::Records(_) => {
                    return Err(CommError::UnexpectedMessage { peer, expected: "a count" })
                }
            }
        }
        Ok(total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub rank: usize,
    pub size: usize,
}

static SESSION: OnceCell<SessionInfo> = OnceCell::new();
static FINALIZED: AtomicBool = AtomicBool::new(false);

/// Process-wide communication context. Initialised once at process start and
/// torn down when dropped; a second `init` in the same process fails.
#[derive(Debug)]
pub struct CommSession {
    info: SessionInfo,
}

impl CommSession {
    pub fn init() -> Result<Self, CommError> {
        if FINALIZED.load(Ordering::SeqCst) {
            return Err(CommError::Finalized);
        }
        let info = SessionInfo { rank: 0, size: 1 };
        SESSION.set(info).map_err(|_| CommError::AlreadyInitialized)?;
        info!(rank = info.rank, size = info.size, "Communication context initialised");
        Ok(Self { info })
    }

    pub fn info(&self) -> SessionInfo {
        self.info
    }

    pub fn communicator(&self) -> Box<dyn Communicator> {
        Box::new(SerialComm)
    }

    pub fn finalize(self) {
        drop(self);
    }
}

impl Drop for CommSession {
    fn drop(&mut self) {
        FINALIZED.store(true, Ordering::SeqCst);
        info!("Communication context finalised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn record(global_index: u64, value: f64) -> HaloRecord {
        HaloRecord { marker: 0, global_index, displacement: [value, 0.0, 0.0] }
    }

    #[test]
    fn test_serial_comm_is_identity() {
        let comm = SerialComm;
        let records = vec![record(1, 0.5)];
        assert_eq!(comm.all_gather(records.clone()).unwrap(), records);
        assert_eq!(comm.all_reduce_sum(7).unwrap(), 7);
    }

    #[test]
    fn test_channel_all_gather_orders_by_rank() {
        let handles: Vec<_> = ChannelComm::cluster(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let rank = comm.rank() as u64;
                    let first = comm.all_gather(vec![record(rank, rank as f64)]).unwrap();
                    // A second collective right after must not mix with the first.
                    let second = comm.all_reduce_sum(rank + 1).unwrap();
                    (first, second)
                })
            })
            .collect();
        for handle in handles {
            let (gathered, total) = handle.join().unwrap();
            let ids: Vec<u64> = gathered.iter().map(|r| r.global_index).collect();
            assert_eq!(ids, vec![0, 1, 2]);
            assert_eq!(total, 6);
        }
    }

    #[test]
    fn test_disconnected_peer_reported() {
        let mut cluster = ChannelComm::cluster(2);
        let lonely = cluster.remove(0);
        drop(cluster);
        assert!(matches!(lonely.all_reduce_sum(1), Err(CommError::Disconnected { peer: 1 })));
    }

    #[test]
    fn test_session_initialises_once() {
        let session = CommSession::init().unwrap();
        assert_eq!(session.info(), SessionInfo { rank: 0, size: 1 });
        assert!(matches!(CommSession::init(), Err(CommError::AlreadyInitialized)));
        assert_eq!(session.communicator().size(), 1);
        session.finalize();
        assert!(CommSession::init().is_err());
    }
}
