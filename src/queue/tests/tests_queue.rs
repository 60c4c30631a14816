#[cfg(test)]
mod tests {
    use crate::queue::{RequestOp, WriteQueue};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = WriteQueue::new(100);
        for i in 0..10u8 {
            queue.push(RequestOp::Put, vec![i], vec![i]);
        }

        let batch = queue.pop_batch(100);
        assert_eq!(batch.len(), 10);
        for (i, request) in batch.iter().enumerate() {
            assert_eq!(request.key, vec![i as u8]);
        }
    }

    #[test]
    fn test_pop_batch_respects_max() {
        let queue = WriteQueue::new(100);
        for i in 0..10u8 {
            queue.push(RequestOp::Put, vec![i], Vec::new());
        }

        let batch = queue.pop_batch(4);
        assert_eq!(batch.len(), 4);
        let batch = queue.pop_batch(100);
        assert_eq!(batch.len(), 6);
    }

    #[test]
    fn test_completion_resolves_handle() {
        let queue = WriteQueue::new(10);
        let handle = queue.push(RequestOp::Put, b"k".to_vec(), b"v".to_vec());

        let batch = queue.pop_batch(1);
        for request in batch {
            request.complete(true);
        }
        assert!(handle.wait());
    }

    #[test]
    fn test_dropped_request_fails_handle() {
        let queue = WriteQueue::new(10);
        let handle = queue.push(RequestOp::Put, b"k".to_vec(), b"v".to_vec());

        let batch = queue.pop_batch(1);
        drop(batch);
        assert!(!handle.wait());
    }

    #[test]
    fn test_push_after_shutdown_fails() {
        let queue = WriteQueue::new(10);
        queue.shutdown();

        let handle = queue.push(RequestOp::Put, b"k".to_vec(), b"v".to_vec());
        assert!(!handle.wait());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_returns_empty_after_shutdown_and_drain() {
        let queue = WriteQueue::new(10);
        queue.push(RequestOp::Delete, b"k".to_vec(), Vec::new());
        queue.shutdown();

        // Already-queued work is still drained.
        let batch = queue.pop_batch(10);
        assert_eq!(batch.len(), 1);

        let batch = queue.pop_batch(10);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_blocking_pop_wakes_on_push() {
        let queue = Arc::new(WriteQueue::new(10));

        let popper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_batch(10))
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(RequestOp::Put, b"late".to_vec(), Vec::new());

        let batch = popper.join().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key, b"late".to_vec());
    }

    #[test]
    fn test_backpressure_blocks_until_pop() {
        let queue = Arc::new(WriteQueue::new(2));
        queue.push(RequestOp::Put, b"a".to_vec(), Vec::new());
        queue.push(RequestOp::Put, b"b".to_vec(), Vec::new());

        let pusher = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                // Queue is full: this blocks until the popper makes room.
                queue.push(RequestOp::Put, b"c".to_vec(), Vec::new());
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 2, "third push should still be blocked");

        let batch = queue.pop_batch(10);
        assert!(!batch.is_empty());
        pusher.join().unwrap();

        // The unblocked push may or may not have landed in the first
        // batch; shut down so the final pop cannot block forever.
        queue.shutdown();
        let rest = queue.pop_batch(10);
        let mut keys: Vec<_> = batch.iter().chain(rest.iter()).map(|r| r.key.clone()).collect();
        keys.sort();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
