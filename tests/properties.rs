//! Property-based tests for framing, reply serialisation and fault phrases.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use binrpc::{
    Arg,
    Disposition,
    RegistryBuilder,
    Value,
    builder::{ChunkWriter, NodeHandle, NodeKind, ReplyBody},
    client::Reply,
    fault::format_phrase,
    gc::GcList,
    packet::PacketBuf,
    value::decode_body,
};
use binrpc_testing::{RecordingTransport, RequestBuilder, decode_replies, engine};
use proptest::prelude::*;

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(|n| Value::Int(i64::from(n))),
        "[a-z0-9 ]{0,12}".prop_map(|s| Value::str(&s)),
        (-4000i32..4000).prop_map(|n| Value::Double(f64::from(n) / 4.0)),
    ]
}

fn tree() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(4, 64, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            proptest::collection::vec(("[a-z]{1,8}", inner), 0..6).prop_map(Value::Struct),
        ]
    })
}

/// Append `value` to the reply below `parent` through the builder tree.
fn build(body: &mut ReplyBody, parent: Option<NodeHandle>, name: Option<&str>, value: &Value) {
    let kind = match value {
        Value::Struct(_) => Some(NodeKind::Struct),
        Value::Array(_) => Some(NodeKind::Array),
        _ => None,
    };
    if let Some(kind) = kind {
        let node = body
            .open(parent, name.map(str::as_bytes), kind)
            .expect("open container");
        match value {
            Value::Struct(members) => {
                for (member, v) in members {
                    build(body, Some(node), Some(member), v);
                }
            }
            Value::Array(items) => {
                for v in items {
                    build(body, Some(node), None, v);
                }
            }
            _ => unreachable!("containers only"),
        }
        return;
    }
    let buf = match parent {
        Some(node) => body.node_mut(node).expect("known node"),
        None => body.root_mut(),
    };
    if let Some(name) = name {
        buf.add_avp_name(name.as_bytes()).expect("member name");
    }
    match value {
        Value::Int(v) => buf.add_int(*v),
        Value::Str(v) => buf.add_str(v),
        Value::Double(v) => buf.add_double(*v),
        Value::Bytes(v) => buf.add_bytes(v),
        Value::Struct(_) | Value::Array(_) => unreachable!("scalars only"),
    }
    .expect("scalar fits");
}

fn reply_body(values: &[Value]) -> ReplyBody {
    let mut body = ReplyBody::new(1 << 20, 1 << 16).expect("reply body");
    for value in values {
        build(&mut body, None, None, value);
    }
    body
}

/// Naive reference: encode the whole tree into one buffer.
fn reference(values: &[Value]) -> Vec<u8> {
    let mut pkt = PacketBuf::with_capacity(1 << 20).expect("buffer");
    for value in values {
        value.encode(&mut pkt).expect("encode");
    }
    pkt.as_slice().to_vec()
}

/// Budget large enough to send any generated tree in one write.
const WHOLE: usize = 1 << 16;

/// Stream `body` through a writer holding `budget` chunks.
fn stream(body: &ReplyBody, budget: usize) -> RecordingTransport {
    let mut out = RecordingTransport::new();
    let mut writer = ChunkWriter::new(&mut out, budget);
    body.write_chunks(&mut writer).expect("write chunks");
    writer.finish().expect("finish");
    out
}

#[derive(Clone, Debug)]
enum Action {
    Add(i64),
    Send,
    Fault(i32),
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        any::<i32>().prop_map(|n| Action::Add(i64::from(n))),
        Just(Action::Send),
        (100i32..600).prop_map(Action::Fault),
    ]
}

fn expected_reply(actions: &[Action]) -> Reply {
    let mut added = Vec::new();
    for act in actions {
        match act {
            Action::Add(n) => added.push(Value::Int(*n)),
            Action::Send => break,
            Action::Fault(code) => {
                return Reply::Fault {
                    code: *code,
                    phrase: format!("fault {code}"),
                };
            }
        }
    }
    Reply::Values(added)
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) { self.0.fetch_add(1, Ordering::SeqCst); }
}

proptest! {
    #[test]
    fn growing_prefixes_are_never_consumed(
        method in "[a-z]{1,8}(\\.[a-z]{1,8})?",
        ints in proptest::collection::vec(any::<i64>(), 0..4),
        strs in proptest::collection::vec("[ -~]{0,40}", 0..4),
        cookie in any::<u32>(),
    ) {
        let mut request = RequestBuilder::new(&method).cookie(cookie);
        for n in ints {
            request = request.int(n);
        }
        for s in &strs {
            request = request.str(s);
        }
        let full = request.build();
        let engine = engine(RegistryBuilder::with_builtins());
        let mut out = RecordingTransport::new();
        for len in 0..full.len() {
            let processed = engine.process_request(&full[..len], &mut out);
            prop_assert_eq!(processed.disposition, Disposition::Incomplete);
            prop_assert_eq!(processed.consumed, 0);
            prop_assert!(processed.needed > 0);
            prop_assert!(processed.needed <= full.len() - len);
        }
        prop_assert_eq!(out.attempts(), 0);
        let processed = engine.process_request(&full, &mut out);
        prop_assert_eq!(processed.disposition, Disposition::Complete);
        prop_assert_eq!(processed.consumed, full.len());
        prop_assert_eq!(decode_replies(&out.bytes()).len(), 1);
    }

    #[test]
    fn spliced_tree_matches_naive_flattening(values in proptest::collection::vec(tree(), 0..5)) {
        let body = reply_body(&values);
        let expected = reference(&values);
        prop_assert_eq!(body.len(), expected.len());
        prop_assert_eq!(&body.flatten(), &expected);
        prop_assert_eq!(&stream(&body, WHOLE).bytes(), &expected);
        prop_assert_eq!(decode_body(&expected).expect("decodable"), values);
    }

    #[test]
    fn chunk_budget_only_splits_writes(
        values in proptest::collection::vec(tree(), 1..5),
        budget in 1usize..8,
    ) {
        let body = reply_body(&values);
        let whole = stream(&body, WHOLE);
        let chunks = whole.writes().first().map_or(0, Vec::len);
        let split = stream(&body, budget);
        prop_assert_eq!(split.bytes(), body.flatten());
        prop_assert_eq!(split.writes().len(), chunks.div_ceil(budget));
        prop_assert!(split.writes().iter().all(|w| !w.is_empty() && w.len() <= budget));
    }

    #[test]
    fn fault_phrases_fit_and_stay_terminated(
        text in "[^\\x00]{0,400}",
        max_len in 1usize..300,
    ) {
        let phrase = format_phrase(max_len, format_args!("{text}"));
        prop_assert!(phrase.len() <= max_len);
        prop_assert_eq!(phrase.last(), Some(&0));
        prop_assert_eq!(phrase.iter().filter(|b| **b == 0).count(), 1);
        let kept = std::str::from_utf8(&phrase[..phrase.len() - 1]).expect("utf-8 prefix");
        prop_assert!(text.starts_with(kept));
    }

    #[test]
    fn temporaries_are_released_once_at_teardown(count in 0usize..200) {
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut gc = GcList::new();
        for _ in 0..count {
            gc.track(DropCounter(Arc::clone(&dropped)));
        }
        prop_assert_eq!(gc.len(), count);
        prop_assert_eq!(dropped.load(Ordering::SeqCst), 0);
        drop(gc);
        prop_assert_eq!(dropped.load(Ordering::SeqCst), count);
    }

    #[test]
    fn at_most_one_reply_reaches_the_wire(
        actions in proptest::collection::vec(action(), 0..8),
    ) {
        let script = actions.clone();
        let builder = RegistryBuilder::new()
            .register("script", &[], move |rpc| {
                for act in &script {
                    match act {
                        Action::Add(n) => {
                            let _ = rpc.add(&[Arg::Int(*n)]);
                        }
                        Action::Send => {
                            let _ = rpc.send();
                        }
                        Action::Fault(code) => rpc.fault(*code, format_args!("fault {code}")),
                    }
                }
            })
            .expect("register");
        let engine = engine(builder);
        let mut out = RecordingTransport::new();
        engine.process_request(&RequestBuilder::new("script").build(), &mut out);
        prop_assert_eq!(out.attempts(), 1);
        let replies = decode_replies(&out.bytes());
        prop_assert_eq!(replies.len(), 1);
        prop_assert_eq!(&replies[0].1, &expected_reply(&actions));
    }
}
