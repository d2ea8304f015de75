//! Request dispatch through [`Engine::process_request`].
//!
//! Each test drives the engine with a complete (or deliberately broken)
//! packet and decodes whatever it wrote to a [`RecordingTransport`].

use std::sync::{Arc, Mutex};

use binrpc::{
    Arg,
    Disposition,
    EngineConfig,
    RegistryBuilder,
    Rpc,
    RpcError,
    Scan,
    Value,
    client::Reply,
    packet::PacketType,
};
use binrpc_testing::{
    LoggerHandle,
    RecordingTransport,
    RequestBuilder,
    SendMode,
    decode_replies,
    decode_reply,
    engine,
    engine_with,
    logger,
    packet,
};
use rstest::rstest;

fn single<F>(name: &str, handler: F) -> RegistryBuilder
where
    F: Fn(&mut dyn Rpc) + Send + Sync + 'static,
{
    RegistryBuilder::new()
        .register(name, &[], handler)
        .expect("register test method")
}

fn fault(code: i32, phrase: &str) -> Reply {
    Reply::Fault {
        code,
        phrase: phrase.to_owned(),
    }
}

/// Run one request and return the decoded reply.
fn call(builder: RegistryBuilder, request: &RequestBuilder) -> (u32, Reply) {
    let engine = engine(builder);
    let mut out = RecordingTransport::new();
    let processed = engine.process_request(&request.build(), &mut out);
    assert_eq!(processed.disposition, Disposition::Complete);
    decode_reply(&out.bytes())
}

#[test]
fn echo_handler_replies_with_its_parameter() {
    let builder = single("echo", |rpc| {
        let scan = rpc.scan("S");
        if let Some(param) = scan.str(0).cloned() {
            rpc.add(&[Arg::from(&param)]).expect("add");
        }
    });
    let request = RequestBuilder::new("echo").cookie(0x1234).str("hi");
    let (cookie, reply) = call(builder, &request);
    assert_eq!(cookie, 0x1234);
    assert_eq!(reply, Reply::Values(vec![Value::str("hi")]));
}

#[test]
fn unknown_method_is_a_500_naming_it() {
    let (_, reply) = call(RegistryBuilder::with_builtins(), &RequestBuilder::new("nosuch"));
    assert_eq!(reply, fault(500, "command nosuch not found"));
}

#[test]
fn truncated_packet_consumes_nothing() {
    let engine = engine(RegistryBuilder::with_builtins());
    let full = RequestBuilder::new("core.echo").str("abc").build();
    let mut out = RecordingTransport::new();
    let processed = engine.process_request(&full[..full.len() - 3], &mut out);
    assert_eq!(processed.disposition, Disposition::Incomplete);
    assert_eq!(processed.consumed, 0);
    assert_eq!(processed.needed, 3);
    assert_eq!(out.attempts(), 0);
}

#[rstest]
#[case(0, 4)]
#[case(1, 3)]
#[case(3, 1)]
fn buffers_shorter_than_a_header_need_the_rest(#[case] len: usize, #[case] needed: usize) {
    let engine = engine(RegistryBuilder::with_builtins());
    let full = RequestBuilder::new("core.echo").build();
    let processed = engine.process_request(&full[..len], &mut RecordingTransport::new());
    assert_eq!(processed.disposition, Disposition::Incomplete);
    assert_eq!(processed.needed, needed);
}

#[test]
fn nested_struct_and_array_reach_the_client_intact() {
    let builder = single("stats", |rpc| {
        let root = rpc.add_struct().expect("struct");
        let handles = rpc
            .struct_add(root, &[("count", Arg::Int(3)), ("items", Arg::Array)])
            .expect("members");
        rpc.array_add(handles[0], &[Arg::Int(10), Arg::Int(20), Arg::Int(30)])
            .expect("items");
    });
    let (_, reply) = call(builder, &RequestBuilder::new("stats"));
    assert_eq!(
        reply,
        Reply::Values(vec![Value::Struct(vec![
            ("count".into(), Value::Int(3)),
            (
                "items".into(),
                Value::Array(vec![Value::Int(10), Value::Int(20), Value::Int(30)])
            ),
        ])])
    );
}

#[test]
fn unhandled_scan_failure_is_sent_as_is() {
    let seen: Arc<Mutex<Option<Scan>>> = Arc::default();
    let slot = Arc::clone(&seen);
    let builder = single("sum", move |rpc| {
        *slot.lock().expect("scan slot") = Some(rpc.scan("dd"));
    });
    let (_, reply) = call(builder, &RequestBuilder::new("sum").int(1));
    let scan = seen.lock().expect("scan slot").take().expect("handler ran");
    assert_eq!(scan.count(), -1);
    assert_eq!(scan.int(0), Some(1));
    assert_eq!(
        reply,
        fault(400, "error at parameter 1: expected integer type but end of packet reached")
    );
}

#[rstest]
#[case("dd*d", 2, true)]
#[case("ddd", -2, false)]
fn optional_tail_tolerates_missing_parameters(
    #[case] format: &'static str,
    #[case] count: i64,
    #[case] complete: bool,
) {
    let builder = single("opt", move |rpc| {
        let scan = rpc.scan(format);
        assert_eq!(scan.count(), count);
        assert_eq!(scan.is_complete(), complete);
        if complete {
            rpc.add(&[Arg::Int(scan.count())]).expect("add");
        }
    });
    let (_, reply) = call(builder, &RequestBuilder::new("opt").int(1).int(2));
    if complete {
        assert_eq!(reply, Reply::Values(vec![Value::Int(2)]));
    } else {
        assert!(matches!(reply, Reply::Fault { code: 400, .. }));
    }
}

#[test]
fn handler_may_retry_a_failed_scan() {
    let builder = single("either", |rpc| {
        if let Some(n) = rpc.scan("d").int(0) {
            rpc.add(&[Arg::Int(n)]).expect("add");
            return;
        }
        let scan = rpc.scan("s");
        let text = scan.str(0).cloned().expect("string parameter");
        rpc.add(&[Arg::from(&text)]).expect("add");
    });
    let (_, reply) = call(builder, &RequestBuilder::new("either").str("word"));
    assert_eq!(reply, Reply::Values(vec![Value::str("word")]));
}

#[test]
fn values_added_before_a_failed_scan_are_still_sent() {
    let builder = single("partial", |rpc| {
        rpc.add(&[Arg::from("header")]).expect("add");
        let _ = rpc.scan("d");
    });
    let (_, reply) = call(builder, &RequestBuilder::new("partial"));
    assert_eq!(reply, Reply::Values(vec![Value::str("header")]));
}

#[rstest]
#[case(RequestBuilder::new("conv").str("42"), ".d", Value::Int(42))]
#[case(RequestBuilder::new("conv").int(7), ".s", Value::str("7"))]
#[case(RequestBuilder::new("conv").double(2.5), ".d", Value::Int(2))]
#[case(RequestBuilder::new("conv").int(3), ".f", Value::Double(3.0))]
fn marked_parameters_are_coerced(
    #[case] request: RequestBuilder,
    #[case] format: &'static str,
    #[case] expected: Value,
) {
    let builder = single("conv", move |rpc| {
        let scan = rpc.scan(format);
        assert!(scan.is_complete(), "scan {format} failed");
        let arg = match &scan.values()[0] {
            binrpc::ScanValue::Int(v) => Arg::Int(*v),
            binrpc::ScanValue::Double(v) => Arg::Double(*v),
            binrpc::ScanValue::Str(v) => Arg::from(v),
        };
        rpc.add(&[arg]).expect("add");
    });
    let (_, reply) = call(builder, &request);
    assert_eq!(reply, Reply::Values(vec![expected]));
}

#[test]
fn non_numeric_strings_never_become_integers() {
    let builder = single("conv", |rpc| {
        assert!(!rpc.scan(".d").is_complete());
    });
    let (_, reply) = call(builder, &RequestBuilder::new("conv").str("abc"));
    assert_eq!(
        reply,
        fault(400, "error at parameter 0: expected integer type but type mismatch")
    );
}

#[test]
fn doubles_have_no_string_form() {
    let builder = single("conv", |rpc| {
        let scan = rpc.scan(".s");
        assert_eq!(scan.count(), 0);
        assert!(!scan.is_complete());
    });
    let (_, reply) = call(builder, &RequestBuilder::new("conv").double(1.5));
    assert_eq!(
        reply,
        fault(400, "error at parameter 0: expected string type but internal error")
    );
}

#[test]
fn unmarked_parameters_keep_their_type() {
    let builder = single("strict", |rpc| {
        let _ = rpc.scan("d");
    });
    let (_, reply) = call(builder, &RequestBuilder::new("strict").str("42"));
    assert_eq!(
        reply,
        fault(400, "error at parameter 0: expected integer type but type mismatch")
    );
}

#[test]
fn global_autoconvert_coerces_unmarked_parameters() {
    let builder = single("conv", |rpc| {
        let n = rpc.scan("d").int(0).expect("coerced integer");
        rpc.add(&[Arg::Int(n + 1)]).expect("add");
    });
    let engine = engine_with(builder, EngineConfig::default().with_autoconvert(true));
    let mut out = RecordingTransport::new();
    engine.process_request(&RequestBuilder::new("conv").str("41").build(), &mut out);
    assert_eq!(decode_reply(&out.bytes()).1, Reply::Values(vec![Value::Int(42)]));
}

#[rstest]
fn second_reply_is_suppressed_and_logged(mut logger: LoggerHandle) {
    let second: Arc<Mutex<Option<bool>>> = Arc::default();
    let slot = Arc::clone(&second);
    let builder = single("twice", move |rpc| {
        rpc.add(&[Arg::Int(1)]).expect("add");
        rpc.send().expect("first send");
        let again = rpc.send();
        rpc.fault(500, format_args!("too late"));
        *slot.lock().expect("slot") = Some(matches!(again, Err(RpcError::AlreadyReplied)));
    });
    let engine = engine(builder);
    let mut out = RecordingTransport::new();
    engine.process_request(&RequestBuilder::new("twice").build(), &mut out);

    assert_eq!(*second.lock().expect("slot"), Some(true));
    assert_eq!(out.attempts(), 1);
    assert_eq!(decode_reply(&out.bytes()).1, Reply::Values(vec![Value::Int(1)]));
    let messages = logger.messages();
    let doubles = messages
        .iter()
        .filter(|m| m.contains("rpc method twice tried to reply more than once"))
        .count();
    assert_eq!(doubles, 2, "{messages:?}");
}

#[test]
fn explicit_fault_replaces_the_reply() {
    let builder = single("refuse", |rpc| {
        rpc.add(&[Arg::Int(1)]).expect("add");
        rpc.fault(403, format_args!("denied for {}", "guest"));
    });
    let (_, reply) = call(builder, &RequestBuilder::new("refuse"));
    assert_eq!(reply, fault(403, "denied for guest"));
}

#[test]
fn fault_phrases_are_truncated_to_the_configured_length() {
    let builder = single("long", |rpc| {
        rpc.fault(500, format_args!("{}", "x".repeat(100)));
    });
    let engine = engine_with(builder, EngineConfig::default().with_max_fault_len(16));
    let mut out = RecordingTransport::new();
    engine.process_request(&RequestBuilder::new("long").build(), &mut out);
    assert_eq!(decode_reply(&out.bytes()).1, fault(500, &"x".repeat(15)));
    // header, code plus string mark, phrase
    assert_eq!(out.writes()[0].len(), 3);
}

#[test]
fn panicking_handler_is_answered_with_500() {
    let builder = single("crash", |_| panic!("handler bug"));
    let (_, reply) = call(builder, &RequestBuilder::new("crash"));
    assert_eq!(reply, fault(500, "internal server error"));
}

#[test]
fn panic_after_reply_sends_nothing_more() {
    let builder = single("crash", |rpc| {
        rpc.add(&[Arg::Int(5)]).expect("add");
        rpc.send().expect("send");
        panic!("after reply");
    });
    let (_, reply) = call(builder, &RequestBuilder::new("crash"));
    assert_eq!(reply, Reply::Values(vec![Value::Int(5)]));
}

#[test]
fn failed_send_is_not_retried() {
    let engine = engine(RegistryBuilder::with_builtins());
    let mut out = RecordingTransport::with_mode(SendMode::Fail);
    let processed =
        engine.process_request(&RequestBuilder::new("core.echo").str("x").build(), &mut out);
    assert_eq!(processed.disposition, Disposition::Complete);
    assert_eq!(out.attempts(), 1);
}

#[rstest]
fn oversized_datagram_reply_is_dropped(mut logger: LoggerHandle) {
    let engine = engine(RegistryBuilder::with_builtins());
    let mut out = RecordingTransport::with_mode(SendMode::TooLarge);
    engine.process_request(&RequestBuilder::new("core.echo").str("x").build(), &mut out);
    assert_eq!(out.attempts(), 1);
    assert!(logger.contains("reply send failed: datagram too big"));
}

#[test]
fn bad_header_rejects_the_whole_buffer() {
    let engine = engine(RegistryBuilder::with_builtins());
    let mut out = RecordingTransport::new();
    let garbage = b"GET / HTTP/1.1\r\n";
    let processed = engine.process_request(garbage, &mut out);
    assert_eq!(processed.disposition, Disposition::Rejected);
    assert_eq!(processed.consumed, garbage.len());
    let (cookie, reply) = decode_reply(&out.bytes());
    assert_eq!(cookie, 0);
    assert_eq!(reply, fault(400, "bad request: corrupted packet"));
}

#[test]
fn non_request_packets_are_refused() {
    let engine = engine(RegistryBuilder::with_builtins());
    let request = RequestBuilder::new("core.echo").cookie(9).kind(PacketType::Reply).build();
    let mut out = RecordingTransport::new();
    let processed = engine.process_request(&request, &mut out);
    assert_eq!(processed.disposition, Disposition::Complete);
    assert_eq!(processed.consumed, request.len());
    assert_eq!(
        decode_reply(&out.bytes()),
        (9, fault(400, "bad request: corrupted packet"))
    );
}

#[test]
fn method_must_be_a_string() {
    let engine = engine(RegistryBuilder::with_builtins());
    let mut out = RecordingTransport::new();
    engine.process_request(&packet(PacketType::Request, 5, &[0x10, 0x01]), &mut out);
    assert_eq!(
        decode_reply(&out.bytes()),
        (5, fault(400, "bad request method: type mismatch"))
    );
}

#[test]
fn back_to_back_packets_are_consumed_one_at_a_time() {
    let engine = engine(RegistryBuilder::with_builtins());
    let first = RequestBuilder::new("core.echo").cookie(1).str("a").build();
    let second = RequestBuilder::new("core.echo").cookie(2).str("b").build();
    let mut buf = first.clone();
    buf.extend_from_slice(&second);

    let mut out = RecordingTransport::new();
    let processed = engine.process_request(&buf, &mut out);
    assert_eq!(processed.consumed, first.len());
    let processed = engine.process_request(&buf[first.len()..], &mut out);
    assert_eq!(processed.consumed, second.len());

    let replies = decode_replies(&out.bytes());
    assert_eq!(
        replies,
        vec![
            (1, Reply::Values(vec![Value::str("a")])),
            (2, Reply::Values(vec![Value::str("b")])),
        ]
    );
}

#[test]
fn oversized_reply_becomes_a_500() {
    let builder = single("big", |rpc| {
        let err = rpc.add(&[Arg::from("far too long for the buffer")]);
        assert!(matches!(err, Err(RpcError::Packet(_))));
    });
    let engine = engine_with(builder, EngineConfig::default().with_max_body_size(8));
    let mut out = RecordingTransport::new();
    engine.process_request(&RequestBuilder::new("big").build(), &mut out);
    assert_eq!(
        decode_reply(&out.bytes()).1,
        fault(500, "Internal server error processing string: buffer overflow (-2)")
    );
}

#[test]
fn printf_output_beyond_the_buffer_is_an_error() {
    let builder = single("fmt", |rpc| {
        rpc.rpl_printf(format_args!("{}-{}", "ok", 1)).expect("short printf");
        let err = rpc.rpl_printf(format_args!("{}", "y".repeat(64)));
        assert!(matches!(err, Err(RpcError::BufferExceeded { limit: 16 })));
        let root = rpc.add_struct().expect("struct");
        rpc.struct_printf(root, "pid", format_args!("{}", 42))
            .expect("struct printf");
    });
    let engine = engine_with(builder, EngineConfig::default().with_printf_buffer_size(16));
    let mut out = RecordingTransport::new();
    engine.process_request(&RequestBuilder::new("fmt").build(), &mut out);
    assert_eq!(
        decode_reply(&out.bytes()).1,
        Reply::Values(vec![
            Value::str("ok-1"),
            Value::Struct(vec![("pid".into(), Value::str("42"))]),
        ])
    );
}

#[test]
fn handles_are_checked_against_their_kind() {
    let builder = single("nodes", |rpc| {
        let st = rpc.add_struct().expect("struct");
        let arr = rpc.add_array().expect("array");
        assert!(matches!(
            rpc.array_add(st, &[Arg::Int(1)]),
            Err(RpcError::WrongNode { expected: "array" })
        ));
        assert!(matches!(
            rpc.struct_add(arr, &[("a", Arg::Int(1))]),
            Err(RpcError::WrongNode { expected: "structure" })
        ));
        assert!(matches!(
            rpc.struct_scan(st, "d"),
            Err(RpcError::Unsupported(_))
        ));
        rpc.array_add(arr, &[Arg::NullStr, Arg::Double(1.5)])
            .expect("elements");
    });
    let (_, reply) = call(builder, &RequestBuilder::new("nodes"));
    assert_eq!(
        reply,
        Reply::Values(vec![
            Value::Struct(Vec::new()),
            Value::Array(vec![Value::str("<null string>"), Value::Double(1.5)]),
        ])
    );
}

#[rstest]
#[case("x", "internal server error, invalid format char 'x'")]
#[case("{", "internal server error, type 3 not supported")]
fn unusable_format_characters_fault_immediately(
    #[case] format: &'static str,
    #[case] phrase: &str,
) {
    let builder = single("scan", move |rpc| {
        assert!(!rpc.scan(format).is_complete());
    });
    let (_, reply) = call(builder, &RequestBuilder::new("scan").int(1));
    assert_eq!(reply, fault(500, phrase));
}

#[test]
fn builtins_introspect_the_registry() {
    let builder = RegistryBuilder::with_builtins()
        .register("demo.noop", &[], |_| {})
        .expect("register");
    let engine = engine(builder);
    let mut out = RecordingTransport::new();
    engine.process_request(&RequestBuilder::new("system.listMethods").build(), &mut out);
    engine.process_request(
        &RequestBuilder::new("system.methodHelp").str("core.echo").build(),
        &mut out,
    );
    engine.process_request(
        &RequestBuilder::new("system.methodHelp").str("demo.noop").build(),
        &mut out,
    );
    engine.process_request(
        &RequestBuilder::new("core.echo").str("a").int(7).build(),
        &mut out,
    );

    let replies: Vec<Reply> = decode_replies(&out.bytes()).into_iter().map(|(_, r)| r).collect();
    assert_eq!(
        replies,
        vec![
            Reply::Values(vec![
                Value::str("core.echo"),
                Value::str("demo.noop"),
                Value::str("system.listMethods"),
                Value::str("system.methodHelp"),
            ]),
            Reply::Values(vec![Value::str("Returns back its parameters.")]),
            fault(500, "Method demo.noop has no documentation"),
            Reply::Values(vec![Value::str("a"), Value::str("7")]),
        ]
    );
}
