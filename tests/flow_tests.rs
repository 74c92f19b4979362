//! Data flow through linked pads: ownership, flow returns, flushing and
//! pull-mode ranges.

use padflow::buffer::Buffer;
use padflow::clock::ClockTime;
use padflow::element::{
    LeakyMode, Pad, PadDirection, PadMode, QueueConfig, State,
};
use padflow::elements::{AppSink, BytesSrc, Identity, Queue};
use padflow::event::{Event, StreamStartEvent};
use padflow::flow::{FlowError, FlowResult, FlowSuccess};
use padflow::metadata::{BufferFlags, Metadata};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

fn start_stream(src: &Pad) {
    assert!(src.push_event(Event::StreamStart(StreamStartEvent::new("test"))));
    assert!(src.push_event(Event::Caps("test/data".parse().unwrap())));
}

fn upstream_of(sink: &Pad) -> Pad {
    let src = Pad::builder("upstream", PadDirection::Src).build();
    src.link(sink).unwrap();
    src.set_active(true).unwrap();
    src
}

// ============================================================================
// Buffers crossing pads
// ============================================================================

#[test]
fn test_timestamp_survives_whole_copy_only() {
    let sink = AppSink::new("sink");
    sink.element().set_state(State::Playing).unwrap();
    let src = upstream_of(&sink.pad().unwrap());
    start_stream(&src);

    let buffer = Buffer::from_vec(vec![1, 2, 3, 4])
        .with_metadata(Metadata::new().with_pts(ClockTime::SECOND));
    src.push(buffer).unwrap();

    let received = sink.take_buffers().pop().unwrap();
    assert_eq!(received.duration(), None);
    let whole = received.copy_region(0, 4);
    assert_eq!(whole.pts(), Some(ClockTime::SECOND));
    let part = received.copy_region(1, 2);
    assert_eq!(part.pts(), None);
    assert_eq!(part.as_bytes(), &[2, 3]);
}

#[test]
fn test_pushed_buffer_is_not_retained_upstream() {
    let sink = AppSink::new("sink");
    sink.element().set_state(State::Playing).unwrap();
    let src = upstream_of(&sink.pad().unwrap());
    start_stream(&src);

    let buffer = Buffer::from_vec(vec![0; 16]);
    let observer = buffer.clone();
    assert_eq!(observer.ref_count(), 2);
    src.push(buffer).unwrap();
    // One handle held by the sink, one by the observer.
    assert_eq!(observer.ref_count(), 2);
    drop(sink.take_buffers());
    assert_eq!(observer.ref_count(), 1);
}

#[test]
fn test_writing_shared_buffer_leaves_other_handle_intact() {
    let sink = AppSink::new("sink");
    sink.element().set_state(State::Playing).unwrap();
    let src = upstream_of(&sink.pad().unwrap());
    start_stream(&src);

    src.push(Buffer::from_vec(vec![5; 8])).unwrap();
    let kept = sink.buffers().pop().unwrap();
    let mut writable = kept.clone().make_writable();
    writable.make_data_mut()[0] = 9;
    assert_eq!(kept.as_bytes()[0], 5);
    assert_eq!(sink.buffers()[0].as_bytes()[0], 5);
    assert_eq!(writable.as_bytes()[0], 9);
}

// ============================================================================
// Flow returns
// ============================================================================

#[test]
fn test_fatal_error_stops_further_pushes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let sink = Pad::builder("sink", PadDirection::Sink)
        .chain_function(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(FlowError::Error)
        })
        .build();
    sink.set_active(true).unwrap();

    let identity = Identity::new("id");
    identity.element().pad("src").unwrap().link(&sink).unwrap();
    identity.element().set_state(State::Playing).unwrap();
    let src = upstream_of(&identity.element().pad("sink").unwrap());
    start_stream(&src);

    assert_eq!(src.push(Buffer::from_vec(vec![1])), Err(FlowError::Error));
    assert_eq!(src.push(Buffer::from_vec(vec![2])), Err(FlowError::Error));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(src.push_event(Event::FlushStart));
    assert!(src.push_event(Event::FlushStop(Default::default())));
    src.push_event(Event::StreamStart(StreamStartEvent::new("again")));
    assert_eq!(src.push(Buffer::from_vec(vec![3])), Err(FlowError::Error));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_custom_error_returned_unchanged() {
    let sink = AppSink::new("sink");
    sink.set_chain_return(Err(FlowError::CustomError(-100)));
    let identity = Identity::new("id");
    identity.element().pad("src").unwrap().link(&sink.pad().unwrap()).unwrap();
    sink.element().set_state(State::Playing).unwrap();
    identity.element().set_state(State::Playing).unwrap();
    let src = upstream_of(&identity.element().pad("sink").unwrap());
    start_stream(&src);

    assert_eq!(
        src.push(Buffer::from_vec(vec![1])),
        Err(FlowError::CustomError(-100))
    );
}

#[test]
fn test_unlinked_push_is_not_linked() {
    let src = Pad::builder("lonely", PadDirection::Src).build();
    src.set_active(true).unwrap();
    assert_eq!(src.push(Buffer::from_vec(vec![1])), Err(FlowError::NotLinked));
}

#[test]
fn test_chain_in_pull_mode_is_wrong_state() {
    let src = BytesSrc::new("src", vec![0u8; 100]);
    let called = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&called);
    let sink = Pad::builder("sink", PadDirection::Sink)
        .chain_function(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(FlowSuccess::Ok)
        })
        .build();
    src.pad().unwrap().link(&sink).unwrap();
    sink.activate_mode(PadMode::Pull, true).unwrap();

    assert_eq!(sink.chain(Buffer::from_vec(vec![1])), Err(FlowError::Flushing));
    assert_eq!(called.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Pull mode
// ============================================================================

#[test]
fn test_pull_near_end_is_short_then_eos() {
    let src = BytesSrc::new("src", vec![42u8; 1000]);
    let sink = Pad::builder("sink", PadDirection::Sink).build();
    src.pad().unwrap().link(&sink).unwrap();
    sink.activate_mode(PadMode::Pull, true).unwrap();

    let tail = sink.pull_range(999, 10).unwrap();
    assert_eq!(tail.as_bytes(), &[42]);
    assert_eq!(tail.metadata().offset_end, Some(1000));
    assert_eq!(sink.pull_range(1000, 10).unwrap_err(), FlowError::Eos);
}

#[test]
fn test_out_of_order_pull_is_discont() {
    let src = BytesSrc::new("src", (0..=255u8).collect::<Vec<_>>());
    let sink = Pad::builder("sink", PadDirection::Sink).build();
    src.pad().unwrap().link(&sink).unwrap();
    sink.activate_mode(PadMode::Pull, true).unwrap();

    let a = sink.pull_range(0, 16).unwrap();
    let b = sink.pull_range(16, 16).unwrap();
    let c = sink.pull_range(128, 16).unwrap();
    assert!(a.flags().contains(BufferFlags::DISCONT));
    assert!(!b.flags().contains(BufferFlags::DISCONT));
    assert!(c.flags().contains(BufferFlags::DISCONT));
    assert_eq!(c.as_bytes()[0], 128);
}

#[test]
fn test_pull_after_deactivation_is_flushing() {
    let src = BytesSrc::new("src", vec![0u8; 10]);
    let sink = Pad::builder("sink", PadDirection::Sink).build();
    src.pad().unwrap().link(&sink).unwrap();
    sink.activate_mode(PadMode::Pull, true).unwrap();
    sink.set_active(false).unwrap();
    assert_eq!(sink.pull_range(0, 4).unwrap_err(), FlowError::Flushing);
    assert_eq!(src.pad().unwrap().mode(), PadMode::None);
}

// ============================================================================
// Flushing
// ============================================================================

#[test]
fn test_flush_wakes_producer_blocked_on_full_queue() {
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock().unwrap();
    let sink = {
        let gate = Arc::clone(&gate);
        Pad::builder("sink", PadDirection::Sink)
            .chain_function(move |_, _| {
                drop(gate.lock().unwrap());
                Ok(FlowSuccess::Ok)
            })
            .build()
    };
    sink.set_active(true).unwrap();

    let queue = Queue::with_config(
        "q",
        QueueConfig::unlimited()
            .with_max_buffers(1)
            .with_leaky(LeakyMode::None),
    );
    queue.element().pad("src").unwrap().link(&sink).unwrap();
    queue.element().set_state(State::Paused).unwrap();
    let src = upstream_of(&queue.element().pad("sink").unwrap());
    start_stream(&src);

    let (tx, rx) = mpsc::channel::<FlowResult>();
    let producer = {
        let src = src.clone();
        thread::spawn(move || {
            for i in 0..10u8 {
                let result = src.push(Buffer::from_vec(vec![i]));
                if result.is_err() {
                    tx.send(result).unwrap();
                    return;
                }
            }
            tx.send(Ok(FlowSuccess::Ok)).unwrap();
        })
    };

    // Let the producer fill the queue and block.
    thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err());

    let flusher = {
        let src = src.clone();
        thread::spawn(move || src.push_event(Event::FlushStart))
    };
    let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(result, Err(FlowError::Flushing));

    drop(held);
    assert!(flusher.join().unwrap());
    producer.join().unwrap();

    assert!(src.push_event(Event::FlushStop(Default::default())));
    assert_eq!(queue.level().buffers, 0);
    queue.element().set_state(State::Null).unwrap();
}

#[test]
fn test_eos_refuses_data_until_flush() {
    let sink = AppSink::new("sink");
    sink.element().set_state(State::Playing).unwrap();
    let src = upstream_of(&sink.pad().unwrap());
    start_stream(&src);

    assert!(src.push_event(Event::Eos));
    assert_eq!(src.push(Buffer::from_vec(vec![1])), Err(FlowError::Eos));
    assert!(src.push_event(Event::FlushStart));
    assert!(src.push_event(Event::FlushStop(Default::default())));
    assert!(!sink.is_eos());
    assert!(src.push(Buffer::from_vec(vec![2])).is_ok());
    assert_eq!(sink.buffers().len(), 1);
}
