//! A simple persisted queue with visibility timeouts

use anyhow::{Context, Result};
use fjall::{PersistMode, TransactionalKeyspace, TransactionalPartitionHandle};
use minicbor::{Decode, Encode};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activity_pub::message::QueueItem;

type Bytes = [u8; 16];

#[derive(Debug, Encode, Decode)]
struct QueueMessage {
    #[n(0)]
    body: Vec<u8>,
    #[n(1)]
    receipt_handle: Bytes,
    #[n(2)]
    approximate_receive_count: u64,
}

#[derive(Debug)]
pub(crate) struct Received {
    pub(crate) key: Bytes,
    pub(crate) receipt_handle: Bytes,
    pub(crate) approximate_receive_count: u64,
    pub(crate) item: QueueItem,
}

#[derive(Clone)]
pub(crate) struct SimpleQueue {
    keyspace: TransactionalKeyspace,
    messages: TransactionalPartitionHandle,
    visibility: TransactionalPartitionHandle,
}

impl SimpleQueue {
    pub(crate) fn new(keyspace: TransactionalKeyspace) -> Result<SimpleQueue> {
        let messages = keyspace.open_partition("sq_messages", Default::default())?;
        let visibility = keyspace.open_partition("sq_visibility", Default::default())?;
        Ok(SimpleQueue {
            keyspace,
            messages,
            visibility,
        })
    }

    pub(crate) fn now() -> u64 {
        u64::try_from(jiff::Timestamp::now().as_second()).unwrap_or_default()
    }
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> Result<bool> {
        self.messages
            .inner()
            .is_empty()
            .context("unable to read from messages tree")
    }
    pub(crate) fn send_message(&self, item: &QueueItem) -> Result<()> {
        // v7 keys keep the queue in FIFO order
        let key = Uuid::now_v7().into_bytes();
        let message = QueueMessage {
            body: item.to_bytes()?,
            receipt_handle: key,
            approximate_receive_count: 0,
        };

        debug!(target: "sq", ?key, kind = item.label(), "send message");

        let bytes = minicbor::to_vec(&message).context("unable to encode queue message")?;
        let mut tx = self.keyspace.write_tx();
        tx.insert(&self.messages, &key[..], bytes);
        tx.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
    // Use client side generated `now` to track visibility timeout so it is
    // consistent across system restart or crashes.
    pub(crate) fn receive_message(
        &self,
        now: u64,
        visibility_timeout: u64,
    ) -> Result<Option<Received>> {
        let mut tx = self.keyspace.write_tx();

        let mut found = None;
        let mut poisoned = false;
        for item in self.messages.inner().iter() {
            let (key, value_bytes) = item?;
            if let Some(visible_at) = tx.get(&self.visibility, &key)? {
                let visible_at = u64::from_le_bytes(visible_at.as_ref().try_into()?);
                if visible_at > now {
                    continue;
                }
            }
            // undecodable messages can never be processed, drop them here
            match decode_message(&value_bytes) {
                Ok(decoded) => {
                    found = Some((key, decoded));
                    break;
                }
                Err(error) => {
                    warn!(target: "sq", ?key, error = format!("{error:#}"), "deleting undecodable message");
                    tx.remove(&self.messages, key.clone());
                    tx.remove(&self.visibility, key);
                    poisoned = true;
                }
            }
        }
        let Some((key, (mut message, item))) = found else {
            if poisoned {
                tx.commit()?;
                self.keyspace.persist(PersistMode::SyncAll)?;
            }
            return Ok(None);
        };

        message.receipt_handle = Uuid::now_v7().into_bytes();
        message.approximate_receive_count += 1;

        let new_visible_at = now + visibility_timeout;
        tx.insert(&self.visibility, key.clone(), new_visible_at.to_le_bytes());
        let bytes = minicbor::to_vec(&message).context("unable to encode queue message")?;
        tx.insert(&self.messages, key.clone(), bytes);
        tx.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;

        let key: Bytes = key.as_ref().try_into()?;
        debug!(
            target: "sq",
            ?key,
            receive_count = message.approximate_receive_count,
            "received message"
        );

        Ok(Some(Received {
            key,
            receipt_handle: message.receipt_handle,
            approximate_receive_count: message.approximate_receive_count,
            item,
        }))
    }
    /// Delete a message, only if `receipt_handle` is from its latest receive.
    pub(crate) fn delete_message(&self, key: Bytes, receipt_handle: Bytes) -> Result<bool> {
        let mut tx = self.keyspace.write_tx();

        let Some(message) = tx.get(&self.messages, key)? else {
            return Ok(true);
        };
        let message: QueueMessage =
            minicbor::decode(&message).context("unable to decode queue message")?;
        if message.receipt_handle != receipt_handle {
            return Ok(false);
        }
        debug!(target: "sq", ?key, "delete message");
        tx.remove(&self.messages, &key[..]);
        tx.remove(&self.visibility, &key[..]);
        tx.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(true)
    }
}

fn decode_message(bytes: &[u8]) -> Result<(QueueMessage, QueueItem)> {
    let message: QueueMessage =
        minicbor::decode(bytes).context("unable to decode queue message")?;
    let item = QueueItem::from_bytes(&message.body)?;
    Ok((message, item))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::{QueueMessage, Received, SimpleQueue};
    use crate::activity_pub::message::{Envelope, QueueItem};

    fn item(body: &str) -> QueueItem {
        QueueItem::Delivery(Envelope::unsigned(body.to_string()))
    }

    fn open_queue(dir: &std::path::Path) -> Result<SimpleQueue> {
        let keyspace = fjall::Config::new(dir).temporary(true).open_transactional()?;
        SimpleQueue::new(keyspace)
    }

    #[test]
    fn test_basic_flow() -> Result<()> {
        let dir = tempdir()?;
        let queue = open_queue(dir.path())?;

        assert!(queue.receive_message(1, 30)?.is_none());

        queue.send_message(&item("test1"))?;

        let Received {
            key,
            receipt_handle,
            approximate_receive_count,
            item: received,
        } = queue.receive_message(2, 30)?.unwrap();
        assert_eq!(received, item("test1"));
        assert_eq!(approximate_receive_count, 1);

        assert!(queue.delete_message(key, receipt_handle)?);
        assert!(queue.receive_message(3, 30)?.is_none());
        assert!(queue.is_empty()?);
        Ok(())
    }

    #[test]
    fn test_fifo_order() -> Result<()> {
        let dir = tempdir()?;
        let queue = open_queue(dir.path())?;

        queue.send_message(&item("first"))?;
        queue.send_message(&item("second"))?;

        let first = queue.receive_message(1, 30)?.unwrap();
        assert_eq!(first.item, item("first"));
        let second = queue.receive_message(1, 30)?.unwrap();
        assert_eq!(second.item, item("second"));
        Ok(())
    }

    #[test]
    fn test_visibility_timeout() -> Result<()> {
        let dir = tempdir()?;
        let queue = open_queue(dir.path())?;

        queue.send_message(&item("test2"))?;

        let first = queue.receive_message(1, 1)?.unwrap();
        // still hidden
        assert!(queue.receive_message(1, 1)?.is_none());

        let second = queue.receive_message(10, 1)?.unwrap();
        assert_eq!(first.key, second.key);
        assert_eq!(first.item, second.item);
        assert_ne!(first.receipt_handle, second.receipt_handle);
        assert_eq!(second.approximate_receive_count, 2);
        Ok(())
    }

    #[test]
    fn test_handle_rotation() -> Result<()> {
        let dir = tempdir()?;
        let queue = open_queue(dir.path())?;

        queue.send_message(&item("test3"))?;

        let first = queue.receive_message(1, 0)?.unwrap();
        let second = queue.receive_message(2, 0)?.unwrap();
        assert_eq!(first.key, second.key);

        assert!(!queue.delete_message(first.key, first.receipt_handle)?);
        assert!(queue.delete_message(second.key, second.receipt_handle)?);
        Ok(())
    }

    #[test]
    fn test_undecodable_messages_are_deleted() -> Result<()> {
        let dir = tempdir()?;
        let queue = open_queue(dir.path())?;

        let mut garbage_body = [0u8; 16];
        garbage_body[15] = 1;
        let message = QueueMessage {
            body: vec![0xff, 0x00],
            receipt_handle: garbage_body,
            approximate_receive_count: 0,
        };
        let mut tx = queue.keyspace.write_tx();
        tx.insert(&queue.messages, &[0u8; 16][..], vec![0xffu8]);
        tx.insert(&queue.messages, &garbage_body[..], minicbor::to_vec(&message)?);
        tx.commit()?;

        assert!(queue.receive_message(1, 30)?.is_none());
        assert!(queue.is_empty()?);

        queue.send_message(&item("after"))?;
        let received = queue.receive_message(2, 30)?.unwrap();
        assert_eq!(received.item, item("after"));
        Ok(())
    }

    #[test]
    fn test_concurrent_access() -> Result<()> {
        let dir = tempdir()?;
        let queue = open_queue(dir.path())?;

        let mut handles = vec![];
        for i in 0..10 {
            let q = queue.clone();
            handles.push(std::thread::spawn(move || {
                q.send_message(&item(&format!("msg{i}"))).unwrap();
            }));
        }
        for handle in handles.drain(..) {
            handle.join().unwrap();
        }

        for _ in 0..5 {
            let q = queue.clone();
            handles.push(std::thread::spawn(move || {
                while let Some(received) = q.receive_message(SimpleQueue::now(), 30).unwrap() {
                    assert!(
                        q.delete_message(received.key, received.receipt_handle)
                            .unwrap()
                    );
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(queue.receive_message(SimpleQueue::now(), 30)?.is_none());
        assert!(queue.is_empty()?);
        Ok(())
    }
}
