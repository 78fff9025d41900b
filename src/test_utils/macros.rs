use crate::delivery::QueueReceiver;

/// Asserts that the next queued event sits at `(block_number, log_index)`.
#[macro_export]
macro_rules! assert_next_event {
    ($receiver: expr, $position: expr) => {
        $crate::assert_next_event!($receiver, $position, timeout = 5)
    };
    ($receiver: expr, $position: expr, timeout = $secs: expr) => {
        let event = tokio::time::timeout(std::time::Duration::from_secs($secs), $receiver.pull())
            .await
            .expect("timed out");
        match event {
            std::option::Option::Some(event) => {
                assert_eq!(event.position(), $position, "unexpected event {:?}", event);
            }
            std::option::Option::None => {
                panic!("Expected event at {:?}, but queue was closed", $position);
            }
        }
    };
}

/// Asserts that no event is waiting in the queue right now.
#[macro_export]
macro_rules! assert_queue_empty {
    ($receiver: expr) => {
        if let std::option::Option::Some(event) = $receiver.try_pull() {
            panic!("Queue should have no pending events, found {:?}", event);
        }
    };
}

/// Asserts that the queue yields events at exactly `positions`, in that order, and nothing else.
///
/// ```no_run
/// # use event_relay::assert_event_sequence;
/// # async fn example() {
/// # let (_sender, mut receiver) = event_relay::delivery::bounded(8).unwrap();
/// assert_event_sequence!(receiver, [(101, 0), (101, 1), (104, 0)]);
/// # }
/// ```
#[macro_export]
macro_rules! assert_event_sequence {
    ($receiver: expr, [$($position:expr),* $(,)?]) => {
        $crate::assert_event_sequence!($receiver, [$($position),*], timeout = 5)
    };
    ($receiver: expr, [$($position:expr),* $(,)?], timeout = $secs: expr) => {
        $crate::test_utils::macros::assert_event_sequence(
            &mut $receiver,
            &[$($position),*],
            $secs,
        )
        .await
    };
}

#[allow(clippy::missing_panics_doc)]
pub async fn assert_event_sequence(
    receiver: &mut QueueReceiver,
    expected: &[(u64, u64)],
    timeout_secs: u64,
) {
    let timeout = std::time::Duration::from_secs(timeout_secs);
    for (index, position) in expected.iter().enumerate() {
        let remaining = &expected[index..];
        let event = tokio::time::timeout(timeout, receiver.pull()).await.unwrap_or_else(|_| {
            panic!("timed out waiting for event {index}; remaining {remaining:?}")
        });
        let Some(event) = event else {
            panic!("queue closed before event {index}; remaining {remaining:?}");
        };
        assert_eq!(event.position(), *position, "event {index} out of order");
    }
    if let Some(extra) = receiver.try_pull() {
        panic!("unexpected extra event at {:?}", extra.position());
    }
}
