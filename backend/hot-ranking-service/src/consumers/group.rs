use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dead_letter::DeadLetterSink;
use super::worker::PartitionWorker;
use super::{ConsumedMessage, HandlerMode, OffsetCommitter};
use crate::config::KafkaConfig;
use crate::error::Result;
use crate::shutdown::wait_for_shutdown;

const WORKER_QUEUE_CAPACITY: usize = 1024;
const BACKLOG_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Commits offsets on the shared consumer.
pub struct KafkaOffsetCommitter {
    consumer: Arc<StreamConsumer>,
}

impl KafkaOffsetCommitter {
    pub fn new(consumer: Arc<StreamConsumer>) -> Self {
        Self { consumer }
    }
}

impl OffsetCommitter for KafkaOffsetCommitter {
    fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(next_offset))?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        debug!(topic = %topic, partition = partition, offset = next_offset, "Committed offset");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedState {
    Flowing,
    Backlogged,
    Closed,
}

/// Hands messages to one partition worker without blocking the poll loop.
/// Whatever the worker queue cannot take waits in `backlog`, in order.
struct PartitionFeed {
    sender: mpsc::Sender<ConsumedMessage>,
    backlog: VecDeque<ConsumedMessage>,
    paused: bool,
}

impl PartitionFeed {
    fn new(sender: mpsc::Sender<ConsumedMessage>) -> Self {
        Self {
            sender,
            backlog: VecDeque::new(),
            paused: false,
        }
    }

    fn offer(&mut self, message: ConsumedMessage) -> FeedState {
        self.backlog.push_back(message);
        self.flush()
    }

    fn flush(&mut self) -> FeedState {
        while let Some(message) = self.backlog.pop_front() {
            match self.sender.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(message)) => {
                    self.backlog.push_front(message);
                    return FeedState::Backlogged;
                }
                Err(TrySendError::Closed(_)) => {
                    self.backlog.clear();
                    return FeedState::Closed;
                }
            }
        }
        FeedState::Flowing
    }

    fn is_backlogged(&self) -> bool {
        !self.backlog.is_empty()
    }
}

/// A Kafka consumer group with manual commits and one worker per partition.
pub struct ConsumerGroup {
    name: String,
    consumer: Arc<StreamConsumer>,
    routes: HashMap<String, HandlerMode>,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl ConsumerGroup {
    pub fn new(
        kafka: &KafkaConfig,
        group_id: &str,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &kafka.bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .create()?;

        Ok(Self {
            name: group_id.to_string(),
            consumer: Arc::new(consumer),
            routes: HashMap::new(),
            dead_letters,
        })
    }

    pub fn route(mut self, topic: impl Into<String>, mode: HandlerMode) -> Self {
        self.routes.insert(topic.into(), mode);
        self
    }

    /// Poll until `shutdown` flips, then close worker channels and wait for
    /// in-flight messages and batches to commit.
    ///
    /// A partition whose worker queue is full is paused on the consumer and
    /// resumed once its backlog drains, so a slow partition never stalls
    /// polling or shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let topics: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;
        info!(group = %self.name, topics = ?topics, "Consumer group started");

        let committer: Arc<dyn OffsetCommitter> =
            Arc::new(KafkaOffsetCommitter::new(Arc::clone(&self.consumer)));
        let worker_shutdown = shutdown.clone();
        let mut feeds: HashMap<(String, i32), PartitionFeed> = HashMap::new();
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let mut flush_tick = tokio::time::interval(BACKLOG_FLUSH_INTERVAL);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let backlogged = feeds.values().any(PartitionFeed::is_backlogged);
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = flush_tick.tick(), if backlogged => {
                    for ((topic, partition), feed) in feeds.iter_mut() {
                        if feed.paused && feed.flush() != FeedState::Backlogged {
                            self.set_paused(topic, *partition, false);
                            feed.paused = false;
                        }
                    }
                }
                received = self.consumer.recv() => match received {
                    Ok(record) => {
                        let message = ConsumedMessage::from_kafka(&record);
                        drop(record);

                        let Some(mode) = self.routes.get(&message.topic) else {
                            warn!(topic = %message.topic, "Message on unrouted topic, ignoring");
                            continue;
                        };

                        let (topic, partition) = (message.topic.clone(), message.partition);
                        let feed = feeds.entry((topic.clone(), partition)).or_insert_with(|| {
                            let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
                            let worker = PartitionWorker::new(
                                topic.clone(),
                                partition,
                                mode.clone(),
                                Arc::clone(&committer),
                                Arc::clone(&self.dead_letters),
                            )
                            .with_shutdown(worker_shutdown.clone());
                            handles.push(tokio::spawn(worker.run(rx)));
                            PartitionFeed::new(tx)
                        });

                        match feed.offer(message) {
                            FeedState::Flowing => {}
                            FeedState::Backlogged if !feed.paused => {
                                self.set_paused(&topic, partition, true);
                                feed.paused = true;
                            }
                            FeedState::Backlogged => {}
                            FeedState::Closed => error!(
                                group = %self.name,
                                topic = %topic,
                                partition = partition,
                                "Partition worker gone, message not processed"
                            ),
                        }
                    }
                    Err(e) => {
                        error!(group = %self.name, error = %e, "Kafka error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }

        let abandoned: usize = feeds.values().map(|feed| feed.backlog.len()).sum();
        info!(
            group = %self.name,
            workers = handles.len(),
            abandoned = abandoned,
            "Consumer group draining"
        );
        drop(feeds);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(group = %self.name, error = %e, "Partition worker terminated abnormally");
            }
        }
        info!(group = %self.name, "Consumer group stopped");
        Ok(())
    }

    fn set_paused(&self, topic: &str, partition: i32, paused: bool) {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(topic, partition);
        let result = if paused {
            self.consumer.pause(&tpl)
        } else {
            self.consumer.resume(&tpl)
        };
        match result {
            Ok(()) => debug!(
                group = %self.name,
                topic = %topic,
                partition = partition,
                paused = paused,
                "Partition fetch state changed"
            ),
            Err(e) => warn!(
                group = %self.name,
                topic = %topic,
                partition = partition,
                paused = paused,
                error = %e,
                "Failed to change partition fetch state"
            ),
        }
    }
}
