//! Caps negotiation across linked pads.
//!
//! These tests exercise the full path: templates, caps queries, link
//! filters and the caps event that carries the agreed format downstream.

use padflow::caps::Caps;
use padflow::element::{Pad, PadDirection, PadLinkError, PadPresence, PadTemplate};
use padflow::elements::Identity;
use padflow::event::{Event, Query, StreamStartEvent};
use padflow::negotiation::{NegotiationError, negotiate};

fn caps(s: &str) -> Caps {
    s.parse().unwrap()
}

fn src_pad(template: &str) -> Pad {
    Pad::builder_from_template(&PadTemplate::src(caps(template)), "src").build()
}

fn sink_pad(template: &str) -> Pad {
    Pad::builder_from_template(&PadTemplate::sink(caps(template)), "sink").build()
}

fn activate(pads: &[&Pad]) {
    for pad in pads {
        pad.set_active(true).unwrap();
    }
}

// ============================================================================
// Pure negotiation
// ============================================================================

#[test]
fn test_range_template_against_fixed_proposal() {
    let result = negotiate(
        &caps("video/x-raw, format=A, width=[1, 100]"),
        &caps("video/x-raw, format=A, width=50"),
    )
    .unwrap();
    assert!(result.is_fixed());
    assert_eq!(result, caps("video/x-raw, format=A, width=50"));
}

#[test]
fn test_intersection_is_commutative() {
    let pairs = [
        (
            "video/x-raw, format={A, B}, width=[1, 100]",
            "video/x-raw, format=B, width=[50, 200]",
        ),
        ("audio/x-raw, rate=48000; video/x-raw", "video/x-raw, width=10"),
        ("ANY", "video/x-raw, format=A"),
    ];
    for (a, b) in pairs {
        let (a, b) = (caps(a), caps(b));
        let ab = a.intersect(&b);
        let ba = b.intersect(&a);
        assert!(ab.is_subset(&ba) && ba.is_subset(&ab), "{a} / {b}");
    }
}

#[test]
fn test_negotiation_is_deterministic() {
    let template = caps("video/x-raw, format={A, B}, width=[1, 100], height=[1, 100]");
    let proposed = caps("video/x-raw, width=[10, 20], height=[30, 40]");
    let first = negotiate(&template, &proposed).unwrap();
    let second = negotiate(&template, &proposed).unwrap();
    assert!(first.is_fixed());
    assert_eq!(first, second);
}

#[test]
fn test_disjoint_formats_fail() {
    let err = negotiate(&caps("audio/x-raw"), &caps("video/x-raw")).unwrap_err();
    assert!(matches!(err, NegotiationError::NoCommonFormat { .. }));
}

// ============================================================================
// Pads
// ============================================================================

#[test]
fn test_pad_negotiate_pushes_fixed_caps() {
    let src = src_pad("video/x-raw, format=A, width=[1, 100]");
    let sink = sink_pad("video/x-raw, format=A, width=50");
    src.link(&sink).unwrap();
    activate(&[&src, &sink]);

    let negotiated = src.negotiate().unwrap();
    assert_eq!(negotiated, caps("video/x-raw, format=A, width=50"));
    assert_eq!(src.caps(), Some(negotiated.clone()));
    assert_eq!(sink.caps(), Some(negotiated));
}

#[test]
fn test_link_refused_without_common_format() {
    let src = src_pad("audio/x-raw");
    let sink = sink_pad("video/x-raw");
    let err = src.link(&sink).unwrap_err();
    assert!(matches!(err, PadLinkError::NoFormat { .. }));
    assert!(!src.is_linked());
}

#[test]
fn test_link_filter_narrows_caps_query() {
    let src = src_pad("video/x-raw, width=[1, 100]");
    let sink = sink_pad("video/x-raw, width=[1, 100]");
    src.link_filtered(&sink, Some(&caps("video/x-raw, width=[10, 20]")))
        .unwrap();
    activate(&[&src, &sink]);

    let negotiated = src.negotiate().unwrap();
    let width = negotiated.structure(0).unwrap().get_int("width").unwrap();
    assert!((10..=20).contains(&width));
    assert!(!sink.send_event(Event::Caps(caps("video/x-raw, width=50"))));
}

#[test]
fn test_accept_caps_query() {
    let sink = sink_pad("video/x-raw, format={A, B}");
    let mut query = Query::new_accept_caps(caps("video/x-raw, format=B"));
    assert!(sink.query(&mut query));
    assert_eq!(query, Query::AcceptCaps {
        caps: caps("video/x-raw, format=B"),
        result: true
    });

    // Not fixed, so not acceptable as a format.
    assert!(!sink.query_accept_caps(&caps("video/x-raw, format={A, B}")));
    assert!(!sink.query_accept_caps(&caps("video/x-raw, format=C")));
}

#[test]
fn test_caps_query_through_proxying_element() {
    let identity = Identity::new("id");
    let src = src_pad("video/x-raw, width=[1, 1000]");
    let sink = sink_pad("video/x-raw, width=[100, 200]");
    src.link(&identity.element().pad("sink").unwrap()).unwrap();
    identity.element().pad("src").unwrap().link(&sink).unwrap();

    let downstream = src.peer_query_caps(None);
    assert!(downstream.is_subset(&caps("video/x-raw, width=[100, 200]")));
    assert!(!downstream.is_empty());
}

#[test]
fn test_request_template_metadata() {
    let template = PadTemplate::new(
        "sink_%u",
        PadDirection::Sink,
        PadPresence::Request,
        caps("audio/x-raw"),
    );
    let pad = Pad::builder_from_template(&template, "sink_3").build();
    assert_eq!(pad.template().name_template(), "sink_%u");
    assert_eq!(pad.template().presence(), PadPresence::Request);
    assert!(pad.is_sink());
    assert_eq!(pad.template_caps(), caps("audio/x-raw"));
}

#[test]
fn test_active_pads_cannot_be_unlinked() {
    let src = src_pad("test/data");
    let sink = sink_pad("test/data");
    src.link(&sink).unwrap();
    activate(&[&src, &sink]);

    assert!(src.push_event(Event::StreamStart(StreamStartEvent::new("s"))));
    assert!(src.push_event(Event::Caps(caps("test/data"))));
    assert!(matches!(src.unlink(&sink), Err(PadLinkError::Active { .. })));

    src.set_active(false).unwrap();
    sink.set_active(false).unwrap();
    src.unlink(&sink).unwrap();
    assert!(src.caps().is_none());
    assert!(!sink.is_linked());
}
