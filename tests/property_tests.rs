use pull_push_stream::pull;
use pull_push_stream::{readable, writeable, StreamOptions, StreamResult};
use quickcheck::{quickcheck, TestResult};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tokio::time::timeout;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Flowing mode delivers exactly the source items, in order, then one end
fn flowing_preserves_sequence(items: Vec<u32>) -> bool {
    runtime().block_on(async move {
        let events = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Notify::new());
        let readable = readable(pull::values(items.clone()), StreamOptions::default());

        let data = events.clone();
        readable.on_data(move |item: &u32| data.lock().unwrap().push(Some(*item)));
        let end = events.clone();
        readable.on_end(move |_| end.lock().unwrap().push(None));
        let signal = closed.clone();
        readable.on_close(move |_| signal.notify_one());

        if timeout(Duration::from_secs(5), closed.notified()).await.is_err() {
            return false;
        }

        let mut expected: Vec<Option<u32>> = items.into_iter().map(Some).collect();
        expected.push(None);
        let matches = *events.lock().unwrap() == expected;
        matches
    })
}

/// Pausing after `pause_at` items and resuming later neither drops nor duplicates
fn pause_resume_is_transparent(items: Vec<u32>, pause_at: usize) -> TestResult {
    if items.is_empty() {
        return TestResult::discard();
    }
    let pause_at = pause_at % items.len();

    let delivered = runtime().block_on(async move {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ended = Arc::new(Notify::new());
        let readable = readable(pull::values(items.clone()), StreamOptions::default());

        let handle = readable.clone();
        let record = seen.clone();
        readable.on_data(move |item: &u32| {
            let count = {
                let mut seen = record.lock().unwrap();
                seen.push(*item);
                seen.len()
            };
            if count == pause_at + 1 {
                handle.pause();
                let resumer = handle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    resumer.resume();
                });
            }
        });
        let signal = ended.clone();
        readable.on_end(move |_| signal.notify_one());

        timeout(Duration::from_secs(5), ended.notified()).await.ok()?;
        let delivered = seen.lock().unwrap().clone();
        Some((delivered, items))
    });

    match delivered {
        Some((delivered, items)) => TestResult::from_bool(delivered == items),
        None => TestResult::failed(),
    }
}

/// The sink receives the concatenation of every write, in order
fn writes_reach_sink_in_order(chunks: Vec<Vec<u8>>, high_water_mark: u8) -> bool {
    runtime().block_on(async move {
        let received = Arc::new(Mutex::new(None));
        let done = Arc::new(Notify::new());

        let slot = received.clone();
        let signal = done.clone();
        let writable = writeable(
            pull::concat(move |result: StreamResult<Vec<u8>>| {
                *slot.lock().unwrap() = Some(result);
                signal.notify_one();
            }),
            StreamOptions::new()
                .object_mode(false)
                .high_water_mark(usize::from(high_water_mark) + 1),
        );

        let expected: Vec<u8> = chunks.concat();
        for chunk in chunks {
            writable.write(chunk, None);
        }
        writable.end(None, None);

        if timeout(Duration::from_secs(5), done.notified()).await.is_err() {
            return false;
        }
        let result = received.lock().unwrap().take();
        result == Some(Ok(expected))
    })
}

#[test]
fn test_flowing_preserves_sequence() {
    quickcheck(flowing_preserves_sequence as fn(Vec<u32>) -> bool);
}

#[test]
fn test_pause_resume_is_transparent() {
    quickcheck(pause_resume_is_transparent as fn(Vec<u32>, usize) -> TestResult);
}

#[test]
fn test_writes_reach_sink_in_order() {
    quickcheck(writes_reach_sink_in_order as fn(Vec<Vec<u8>>, u8) -> bool);
}
