use crate::events::DomainEvent;
use crate::ports::{Delivery, EventBus, Offset, PartitionReader};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Error, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

const META_TREE: &str = "event_log.meta";
const OFFSETS_TREE: &str = "event_log.offsets";
const DEAD_LETTERS_TREE: &str = "event_log.dead_letters";
const PARTITIONS_KEY: &str = "partitions";

/// A delivery that could not be processed, kept for inspection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetter {
    pub group_id: String,
    pub partition: u32,
    pub offset: Offset,
    pub reason: String,
    pub event: Option<DomainEvent>,
    /// Raw payload when the stored event could not be decoded.
    pub payload: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

struct PartitionLog {
    events: sled::Tree,
    next_offset: Mutex<Offset>,
    /// Latest head (next offset to be written), used to wake readers.
    head: watch::Sender<Offset>,
}

/// Partitioned append-only event log on sled.
///
/// Each partition is its own tree keyed by big-endian offset, so iteration
/// order is offset order. Consumer-group positions live in a shared
/// offsets tree keyed `{group}/{partition}`.
pub struct SledEventLog {
    partitions: Vec<Arc<PartitionLog>>,
    offsets: sled::Tree,
    dead_letters: sled::Tree,
}

impl SledEventLog {
    /// Open (or create) the log with `partition_count` partitions. The count
    /// is fixed on first open; reopening with a different count fails.
    pub fn open(db: &sled::Db, partition_count: u32) -> Result<Self> {
        if partition_count == 0 {
            return Err(Error::Startup("event log needs at least one partition".into()));
        }

        let meta = open_tree(db, META_TREE)?;
        match meta.get(PARTITIONS_KEY)? {
            Some(stored) => {
                let stored = u32::from_be_bytes(stored.as_ref().try_into().map_err(|_| {
                    Error::Startup("corrupt event log partition count".into())
                })?);
                if stored != partition_count {
                    return Err(Error::Startup(format!(
                        "event log was created with {} partitions, configured {}",
                        stored, partition_count
                    )));
                }
            }
            None => {
                meta.insert(PARTITIONS_KEY, partition_count.to_be_bytes().to_vec())?;
            }
        }

        let mut partitions = Vec::with_capacity(partition_count as usize);
        for partition in 0..partition_count {
            let events = open_tree(db, &format!("event_log.partition.{}", partition))?;
            let next = match events.last()? {
                Some((key, _)) => decode_offset(&key)? + 1,
                None => 0,
            };
            let (head, _) = watch::channel(next);
            partitions.push(Arc::new(PartitionLog {
                events,
                next_offset: Mutex::new(next),
                head,
            }));
        }

        info!(partitions = partition_count, "Event log opened");

        Ok(Self {
            partitions,
            offsets: open_tree(db, OFFSETS_TREE)?,
            dead_letters: open_tree(db, DEAD_LETTERS_TREE)?,
        })
    }

    /// Partition for a key, stable across restarts (FNV-1a).
    pub fn partition_for(&self, key: &str) -> u32 {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in key.as_bytes() {
            hash ^= *byte as u32;
            hash = hash.wrapping_mul(0x0100_0193);
        }
        hash % self.partitions.len() as u32
    }

    /// Last committed offset of `group_id` on `partition`.
    pub fn committed(&self, group_id: &str, partition: u32) -> Result<Option<Offset>> {
        match self.offsets.get(group_key(group_id, partition))? {
            Some(bytes) => Ok(Some(decode_offset(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn dead_letters(&self, group_id: &str) -> Result<Vec<DeadLetter>> {
        let mut letters = Vec::new();
        for result in self.dead_letters.scan_prefix(format!("{}/", group_id)) {
            let (_, value) = result?;
            letters.push(serde_json::from_slice(&value)?);
        }
        Ok(letters)
    }
}

#[async_trait]
impl EventBus for SledEventLog {
    fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    async fn append(&self, partition_key: &str, event: &DomainEvent) -> Result<Offset> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| Error::Bus(format!("Failed to serialize event: {}", e)))?;
        let log = &self.partitions[self.partition_for(partition_key) as usize];

        let mut next = log.next_offset.lock().unwrap_or_else(|e| e.into_inner());
        let offset = *next;
        log.events
            .insert(offset.to_be_bytes(), payload)
            .map_err(|e| Error::Bus(format!("Failed to append event: {}", e)))?;
        *next += 1;
        log.head.send_replace(*next);

        Ok(offset)
    }

    async fn subscribe(&self, group_id: &str) -> Result<Vec<Box<dyn PartitionReader>>> {
        let mut readers: Vec<Box<dyn PartitionReader>> = Vec::with_capacity(self.partitions.len());
        for (partition, log) in self.partitions.iter().enumerate() {
            let partition = partition as u32;
            let position = self
                .committed(group_id, partition)
                .map_err(|e| Error::Bus(format!("Failed to load committed offset: {}", e)))?
                .map_or(0, |committed| committed + 1);

            readers.push(Box::new(SledPartitionReader {
                group_id: group_id.to_string(),
                partition,
                position,
                head: log.head.subscribe(),
                log: log.clone(),
                offsets: self.offsets.clone(),
                dead_letters: self.dead_letters.clone(),
            }));
        }
        Ok(readers)
    }

    async fn dead_letter(&self, group_id: &str, delivery: &Delivery, reason: &str) -> Result<()> {
        let letter = DeadLetter {
            group_id: group_id.to_string(),
            partition: delivery.partition,
            offset: delivery.offset,
            reason: reason.to_string(),
            event: Some(delivery.event.clone()),
            payload: None,
            recorded_at: Utc::now(),
        };
        record_dead_letter(&self.dead_letters, &letter)
    }
}

struct SledPartitionReader {
    group_id: String,
    partition: u32,
    /// Next offset to hand out.
    position: Offset,
    head: watch::Receiver<Offset>,
    log: Arc<PartitionLog>,
    offsets: sled::Tree,
    dead_letters: sled::Tree,
}

#[async_trait]
impl PartitionReader for SledPartitionReader {
    fn partition(&self) -> u32 {
        self.partition
    }

    async fn next(&mut self) -> Result<Delivery> {
        loop {
            let stored = self
                .log
                .events
                .get(self.position.to_be_bytes())
                .map_err(|e| Error::Bus(format!("Failed to read event: {}", e)))?;

            if let Some(payload) = stored {
                let offset = self.position;
                self.position += 1;

                match serde_json::from_slice::<DomainEvent>(&payload) {
                    Ok(event) => {
                        return Ok(Delivery {
                            partition: self.partition,
                            offset,
                            event,
                        });
                    }
                    Err(e) => {
                        warn!(
                            partition = self.partition,
                            offset,
                            error = %e,
                            "Undecodable event, moving to dead letters"
                        );
                        let letter = DeadLetter {
                            group_id: self.group_id.clone(),
                            partition: self.partition,
                            offset,
                            reason: format!("undecodable event: {}", e),
                            event: None,
                            payload: Some(String::from_utf8_lossy(&payload).into_owned()),
                            recorded_at: Utc::now(),
                        };
                        record_dead_letter(&self.dead_letters, &letter)?;
                        continue;
                    }
                }
            }

            if *self.head.borrow_and_update() > self.position {
                continue;
            }
            self.head
                .changed()
                .await
                .map_err(|_| Error::Bus("event log closed".into()))?;
        }
    }

    async fn commit(&mut self, offset: Offset) -> Result<()> {
        self.offsets
            .insert(group_key(&self.group_id, self.partition), offset.to_be_bytes().to_vec())
            .map_err(|e| Error::Bus(format!("Failed to commit offset: {}", e)))?;
        Ok(())
    }
}

fn open_tree(db: &sled::Db, name: &str) -> Result<sled::Tree> {
    db.open_tree(name)
        .map_err(|e| Error::Startup(format!("Failed to open tree {}: {}", name, e)))
}

fn group_key(group_id: &str, partition: u32) -> String {
    format!("{}/{}", group_id, partition)
}

fn decode_offset(bytes: &[u8]) -> Result<Offset> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Bus(format!("corrupt offset of {} bytes", bytes.len())))?;
    Ok(Offset::from_be_bytes(raw))
}

fn record_dead_letter(tree: &sled::Tree, letter: &DeadLetter) -> Result<()> {
    let key = format!("{}/{}/{:020}", letter.group_id, letter.partition, letter.offset);
    let value = serde_json::to_vec(letter)?;
    tree.insert(key, value)
        .map_err(|e| Error::Bus(format!("Failed to record dead letter: {}", e)))?;
    Ok(())
}
