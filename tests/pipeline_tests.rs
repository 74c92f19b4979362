//! End-to-end pipelines built from the bundled elements.

use padflow::element::{QueueConfig, State};
use padflow::elements::{AppSink, BytesSrc, Identity, Queue, TimestampMux};
use padflow::event::{Event, Format, Query, SeekEvent};
use padflow::pipeline::{Message, MessageKind, Pipeline};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_eos_or_error(pipeline: &Pipeline) -> Message {
    pipeline
        .bus()
        .timed_pop_filtered(Some(TIMEOUT), |m| {
            matches!(m.kind(), MessageKind::Eos | MessageKind::Error { .. })
        })
        .expect("no EOS or error within timeout")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_source_queue_identity_sink() {
    init_tracing();
    let pipeline = Pipeline::new("chain");
    let src = BytesSrc::new("src", vec![3u8; 10_000]).with_blocksize(1000);
    let queue = Queue::with_config("queue", QueueConfig::default().with_max_buffers(2));
    let identity = Identity::new("identity");
    let sink = AppSink::new("sink");
    pipeline
        .add_many(&[src.element(), queue.element(), identity.element(), sink.element()])
        .unwrap();
    pipeline
        .link_many(&[src.element(), queue.element(), identity.element(), sink.element()])
        .unwrap();

    pipeline.set_state(State::Playing).unwrap();
    let message = wait_eos_or_error(&pipeline);
    assert!(message.is_eos(), "{message:?}");
    assert_eq!(message.source(), "chain");

    let buffers = sink.buffers();
    assert_eq!(buffers.len(), 10);
    assert_eq!(buffers.iter().map(|b| b.len()).sum::<usize>(), 10_000);
    let offsets: Vec<u64> = buffers
        .iter()
        .map(|b| b.metadata().offset.unwrap())
        .collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));

    let stats = identity.stats();
    assert_eq!((stats.buffers_in, stats.buffers_out), (10, 10));
    assert_eq!(
        sink.event_names(),
        ["stream-start", "caps", "segment", "eos"]
    );

    pipeline.set_state(State::Null).unwrap();
    assert!(pipeline.children().iter().all(|c| c.current_state() == State::Null));
}

#[test]
fn test_error_in_the_middle_reaches_the_bus() {
    let pipeline = Pipeline::new("failing");
    let src = BytesSrc::new("src", vec![0u8; 8192]).with_blocksize(512);
    let identity = Identity::new("identity").with_error_after(3);
    let sink = AppSink::new("sink");
    pipeline
        .add_many(&[src.element(), identity.element(), sink.element()])
        .unwrap();
    pipeline
        .link_many(&[src.element(), identity.element(), sink.element()])
        .unwrap();

    pipeline.set_state(State::Playing).unwrap();
    let message = wait_eos_or_error(&pipeline);
    assert!(message.is_error(), "{message:?}");
    assert_eq!(sink.buffers().len(), 3);
    assert_eq!(identity.stats().refused, 1);
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_flushing_seek_restarts_from_position() {
    let pipeline = Pipeline::new("seek");
    let src = BytesSrc::new("src", (0..4096u32).map(|i| i as u8).collect::<Vec<_>>())
        .with_blocksize(1024);
    let sink = AppSink::new("sink");
    pipeline
        .add_many(&[src.element(), sink.element()])
        .unwrap();
    pipeline.link(src.element(), sink.element()).unwrap();

    pipeline.set_state(State::Playing).unwrap();
    assert!(wait_eos_or_error(&pipeline).is_eos());
    assert_eq!(sink.take_buffers().len(), 4);

    assert!(pipeline.send_event(Event::Seek(SeekEvent::new_bytes(2048))));
    assert!(wait_eos_or_error(&pipeline).is_eos());

    let after = sink.take_buffers();
    assert_eq!(after.len(), 2);
    assert_eq!(after[0].metadata().offset, Some(2048));
    assert!(
        sink.event_names()
            .windows(2)
            .any(|w| w == ["flush-start", "flush-stop"])
    );
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_queries_travel_upstream_through_elements() {
    let pipeline = Pipeline::new("query");
    let src = BytesSrc::new("src", vec![0u8; 4096]);
    let queue = Queue::new("queue");
    let identity = Identity::new("identity");
    let sink = AppSink::new("sink");
    pipeline
        .add_many(&[src.element(), queue.element(), identity.element(), sink.element()])
        .unwrap();
    pipeline
        .link_many(&[src.element(), queue.element(), identity.element(), sink.element()])
        .unwrap();

    let pad = sink.pad().unwrap();
    let mut duration = Query::new_duration(Format::Bytes);
    assert!(pad.peer_query(&mut duration));
    assert_eq!(duration.value_result(), Some(4096));

    let mut scheduling = Query::new_scheduling();
    assert!(pad.peer_query(&mut scheduling));
}

#[test]
fn test_mux_pipeline_ends_when_all_inputs_end() {
    let pipeline = Pipeline::new("mux");
    let a = BytesSrc::new("a", vec![1u8; 4096]).with_blocksize(1024);
    let b = BytesSrc::new("b", vec![2u8; 2048]).with_blocksize(1024);
    let mux = TimestampMux::new("mux");
    let sink = AppSink::new("sink");
    pipeline
        .add_many(&[a.element(), b.element(), mux.element(), sink.element()])
        .unwrap();

    let sink_a = mux.request_pad().unwrap();
    let sink_b = mux.request_pad().unwrap();
    pipeline
        .link_pads(a.element(), "src", mux.element(), sink_a.name())
        .unwrap();
    pipeline
        .link_pads(b.element(), "src", mux.element(), sink_b.name())
        .unwrap();
    pipeline.link(mux.element(), sink.element()).unwrap();

    pipeline.set_state(State::Playing).unwrap();
    let message = wait_eos_or_error(&pipeline);
    assert!(message.is_eos(), "{message:?}");
    let buffers = sink.buffers();
    assert_eq!(buffers.len(), 6);
    assert_eq!(buffers.iter().filter(|b| b.as_bytes()[0] == 2).count(), 2);
    pipeline.set_state(State::Null).unwrap();
}
