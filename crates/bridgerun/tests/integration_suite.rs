//! End-to-end tests of the link against an in-process mock host.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use bridgerpc::HostError;
use bridgerpc::Reply;
use bridgerpc::TaskArg;
use bridgerpc::TaskFrame;
use bridgerpc::Value;
use bridgerpc::decode_batch;
use bridgerun::Arg;
use bridgerun::Error;
use bridgerun::Executor;
use bridgerun::LineTransport;
use bridgerun::Link;
use bridgerun::LinkConfig;
use bridgerun::LinkState;
use bridgerun::ScheduleId;
use bridgerun::Transport;
use bridgerun::mock_transport;
use bridgerun::mock_transport::MockHost;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;

const WAIT: Duration = Duration::from_secs(5);

fn start() -> (Link, MockHost) {
    let (transport, host) = mock_transport::pair();
    let config = LinkConfig {
        watchdog_poll_ms: 10,
        exit_ack_timeout_ms: 300,
        ..LinkConfig::default()
    };
    (Link::start(Box::new(transport), config).unwrap(), host)
}

fn host_error(message: &str) -> HostError {
    HostError {
        kind: "NameError".into(),
        message: message.into(),
        description: message.into(),
        stack: vec![],
    }
}

// ============================================================================
//  CALLS
// ============================================================================

#[test]
fn test_call_gets_reply_value() {
    let (link, host) = start();
    let mut health = link.call_async("player_health", vec![]).unwrap();

    let call = host.recv_call(WAIT).unwrap();
    assert_eq!(call.function, "player_health");
    assert_eq!(call.executor, "script");
    assert!(call.id >= 1);

    host.send_raw(&format!("{{\"fcid\":{},\"retval\":20.0}}", call.id));
    assert_eq!(health.wait(Some(WAIT)).unwrap(), Value::Float(20.0));
    assert!(matches!(health.wait(Some(WAIT)), Err(Error::AlreadyResolved)));
}

#[test]
fn test_blocking_calls_and_host_errors() {
    let (link, host) = start();
    let server = host.serve(|call| match call.function.as_str() {
        "add" => {
            let sum: i64 = call.args.iter().filter_map(Value::as_i64).sum();
            vec![Reply::value(call.id, sum).closing()]
        }
        _ => vec![Reply::error(call.id, host_error(&call.function)).closing()],
    });

    assert_eq!(link.call("add", vec![1.into(), 2.into()]).unwrap(), Value::Int(3));
    match link.call("missing", vec![]) {
        Err(Error::Host(e)) => assert_eq!(e.message, "missing"),
        other => panic!("expected host error, got {:?}", other),
    }
    assert_eq!(link.pending_calls(), 0);

    link.shutdown();
    server.join().unwrap();
    assert_eq!(link.state(), LinkState::Closed);
}

#[test]
fn test_reported_errors_do_not_reach_caller() {
    let (link, host) = start();
    let mut fut = link.function("boom").report_errors().spawn().unwrap();
    let call = host.recv_call(WAIT).unwrap();

    host.reply(Reply::error(call.id, host_error("boom")).closing());
    assert!(matches!(fut.wait(Some(WAIT)), Err(Error::NoResult { .. })));
}

#[test]
fn test_close_without_value() {
    let (link, host) = start();
    let mut fut = link.call_async("noop", vec![]).unwrap();
    let call = host.recv_call(WAIT).unwrap();

    host.reply(Reply::close(call.id));
    assert!(matches!(fut.wait(Some(WAIT)), Err(Error::NoResult { .. })));
}

#[test]
fn test_tick_scope_sets_executor() {
    let (link, host) = start();
    {
        let _tick = Executor::Tick.enter();
        link.send("echo", vec!["hi".into()]).unwrap();
    }
    link.send("echo", vec!["bye".into()]).unwrap();

    let tick = host.recv_call(WAIT).unwrap();
    assert_eq!(tick.executor, "tick");
    assert_eq!(host.recv_call(WAIT).unwrap().executor, "script");
}

#[test]
fn test_explicit_executor_beats_scope() {
    let (link, host) = start();
    let _tick = Executor::Tick.enter();
    link.function("draw").on(Executor::Render).fire().unwrap();
    link.function("step").default_on(Executor::Render).fire().unwrap();

    assert_eq!(host.recv_call(WAIT).unwrap().executor, "render");
    assert_eq!(host.recv_call(WAIT).unwrap().executor, "tick");
}

#[test]
fn test_default_executor_applies() {
    let (link, host) = start();
    link.set_default_executor(Executor::Render);
    link.send("echo", vec![]).unwrap();
    assert_eq!(host.recv_call(WAIT).unwrap().executor, "render");
}

#[test]
fn test_fire_and_forget_uses_system_id() {
    let (link, host) = start();
    link.send("echo", vec!["hello".into()]).unwrap();

    let call = host.recv_call(WAIT).unwrap();
    assert_eq!(call.id, 0);
    assert_eq!(call.function, "echo");
    assert_eq!(call.args, vec![Value::from("hello")]);
    assert_eq!(link.pending_calls(), 0);
}

#[test]
fn test_out_of_order_replies_are_not_cross_wired() {
    let (link, host) = start();
    let mut futures: Vec<_> = (0..3)
        .map(|i| link.call_async("echo", vec![Value::from(i)]).unwrap())
        .collect();

    let calls: Vec<_> = (0..3).map(|_| host.recv_call(WAIT).unwrap()).collect();
    for call in calls.iter().rev() {
        host.reply(Reply::value(call.id, call.args[0].clone()).closing());
    }

    for (i, fut) in futures.iter_mut().enumerate() {
        assert_eq!(fut.wait(Some(WAIT)).unwrap(), Value::from(i as i64));
    }
}

#[test]
fn test_concurrent_callers() {
    let (link, host) = start();
    let server = host.serve(|call| vec![Reply::value(call.id, call.args[0].clone()).closing()]);
    let link = Arc::new(link);

    let workers: Vec<_> = (0..8)
        .map(|t| {
            let link = Arc::clone(&link);
            thread::spawn(move || {
                for i in 0..25 {
                    let n = t * 100 + i;
                    assert_eq!(link.call("echo", vec![n.into()]).unwrap(), Value::from(n));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    link.shutdown();
    server.join().unwrap();
}

#[test]
fn test_malformed_lines_are_skipped() {
    let (link, host) = start();
    let mut fut = link.call_async("player_name", vec![]).unwrap();
    let call = host.recv_call(WAIT).unwrap();

    host.send_raw("this is not json");
    host.send_raw("{\"retval\":1}");
    host.send_raw("");
    host.send_raw("{\"fcid\":123456,\"retval\":1}");
    host.reply(Reply::value(call.id, "Steve").closing());

    assert_eq!(fut.wait(Some(WAIT)).unwrap(), Value::from("Steve"));
    assert_eq!(link.state(), LinkState::Running);
}

#[test]
fn test_wait_timeout_is_bounded() {
    let (link, host) = start();
    let mut fut = link.call_async("slow", vec![]).unwrap();
    let call = host.recv_call(WAIT).unwrap();

    let started = Instant::now();
    assert!(matches!(fut.wait(Some(Duration::from_millis(100))), Err(Error::Timeout { .. })));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2));

    // still pending, so a later wait sees the reply
    host.reply(Reply::value(call.id, true).closing());
    assert_eq!(fut.wait(Some(WAIT)).unwrap(), Value::Bool(true));
}

#[test]
fn test_timeout_handler_supplies_outcome() {
    let (link, _host) = start();
    let mut fut = link
        .call_async("slow", vec![])
        .unwrap()
        .on_timeout(|| Ok(Value::from("fallback")));

    assert_eq!(fut.wait(Some(Duration::from_millis(50))).unwrap(), Value::from("fallback"));
}

#[test]
fn test_typed_and_mapped_futures() {
    let (link, host) = start();
    let mut health = link.call_async("player_health", vec![]).unwrap().typed::<f64>();
    let mut doubled = link
        .call_async("player_level", vec![])
        .unwrap()
        .typed::<i64>()
        .map(|level| Ok(level * 2));

    let a = host.recv_call(WAIT).unwrap();
    let b = host.recv_call(WAIT).unwrap();
    host.reply(Reply::value(a.id, 20).closing());
    host.reply(Reply::value(b.id, 7).closing());

    assert_eq!(health.wait(Some(WAIT)).unwrap(), 20.0);
    assert_eq!(doubled.wait(Some(WAIT)).unwrap(), 14);
}

#[test]
fn test_cancel_sends_cancelfn() {
    let (link, host) = start();
    let mut fut = link.call_async("long_task", vec![]).unwrap();
    let call = host.recv_call(WAIT).unwrap();

    fut.cancel().unwrap();
    let cancel = host.recv_call(WAIT).unwrap();
    assert_eq!(cancel.id, 0);
    assert_eq!(cancel.function, "cancelfn!");
    assert_eq!(cancel.args, vec![Value::from(call.id), Value::from("long_task")]);
    assert_eq!(link.pending_calls(), 0);

    // a late result is dropped
    host.reply(Reply::value(call.id, 1).closing());
    assert!(matches!(fut.wait(Some(WAIT)), Err(Error::Cancelled)));
}

#[test]
fn test_stream_yields_until_closed() {
    let (link, host) = start();
    let mut stream = link.call_stream("count_to", vec![3.into()]).unwrap();
    let call = host.recv_call(WAIT).unwrap();

    for i in 1..=3 {
        host.reply(Reply::value(call.id, i));
    }
    host.reply(Reply::close(call.id));

    let mut seen = vec![];
    while let Some(v) = stream.next(Some(WAIT)).unwrap() {
        seen.push(v);
    }
    assert_eq!(seen, vec![Value::from(1), Value::from(2), Value::from(3)]);
    assert_eq!(link.pending_calls(), 0);
}

#[test]
fn test_dropping_open_stream_cancels_it() {
    let (link, host) = start();
    let stream = link.call_stream("watch_blocks", vec![]).unwrap();
    let call = host.recv_call(WAIT).unwrap();

    drop(stream);
    let cancel = host.recv_call(WAIT).unwrap();
    assert_eq!(cancel.function, "cancelfn!");
    assert_eq!(cancel.args[0], Value::from(call.id));
}

// ============================================================================
//  TASKS
// ============================================================================

fn serve_batches(host: MockHost, result: Value) -> (thread::JoinHandle<()>, mpsc::Receiver<(String, Vec<TaskFrame>)>) {
    let (seen_tx, seen_rx) = mpsc::channel();
    let server = host.serve(move |call| {
        let batch = call.args.first().cloned().map(decode_batch).and_then(|b| b.ok());
        let _ = seen_tx.send((call.function.clone(), batch.unwrap_or_default()));
        match call.function.as_str() {
            "cancel_scheduled_tasks" => vec![Reply::value(call.id, true).closing()],
            _ => vec![Reply::value(call.id, result.clone()).closing()],
        }
    });
    (server, seen_rx)
}

#[test]
fn test_batch_with_forward_reference() {
    let (link, host) = start();
    let (server, seen) = serve_batches(host, Value::from("hello Steve"));

    let name = link.task("player_name", vec![]).unwrap();
    let health = link.task("player_health", vec![]).unwrap();
    let echo = link
        .task("echo", vec![Arg::from("hello"), Arg::from(&name)])
        .unwrap()
        .map(|v| Ok(Value::from(format!("<{}>", v.as_str().unwrap_or("")))));

    let out = link.run_tasks(&[name.clone(), health, echo]).unwrap();
    assert_eq!(out, Value::from("<hello Steve>"));

    let (function, batch) = seen.recv_timeout(WAIT).unwrap();
    assert_eq!(function, "run_tasks");
    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0].id, name.id());
    assert_eq!(batch[2].function, "echo");
    assert_eq!(
        batch[2].args,
        vec![TaskArg::Immediate(Value::from("hello")), TaskArg::Deferred(name.id())]
    );

    link.shutdown();
    server.join().unwrap();
}

#[test]
fn test_invalid_batches_are_not_sent() {
    let (link, host) = start();
    let first = link.task("player_name", vec![]).unwrap();
    let second = link.task("echo", vec![first.arg()]).unwrap();

    assert!(matches!(link.run_tasks(&[]), Err(Error::InvalidBatch(_))));
    assert!(matches!(link.run_tasks(&[second.clone()]), Err(Error::InvalidBatch(_))));
    assert!(matches!(link.run_tasks(&[second, first.clone()]), Err(Error::InvalidBatch(_))));
    assert!(matches!(link.run_tasks(&[first.clone(), first]), Err(Error::InvalidBatch(_))));
    assert!(matches!(link.task("two words", vec![]), Err(Error::Rpc(_))));

    assert!(host.recv_raw(Duration::from_millis(100)).is_none());
}

#[test]
fn test_schedule_and_cancel() {
    let (link, host) = start();
    let (server, seen) = serve_batches(host, Value::from(4));

    let place = link.task("place_block", vec![Arg::from(1), Arg::from(64), Arg::from(1)]).unwrap();
    assert!(matches!(
        link.schedule_tasks(Executor::Script, &[place.clone()]),
        Err(Error::InvalidBatch(_))
    ));

    let id = link.schedule_tasks(Executor::Render, &[place]).unwrap();
    assert_eq!(id, ScheduleId(4));
    assert_eq!(seen.recv_timeout(WAIT).unwrap().0, "schedule_render_tasks");

    assert!(link.cancel_schedule(id).unwrap());
    let (function, _) = seen.recv_timeout(WAIT).unwrap();
    assert_eq!(function, "cancel_scheduled_tasks");

    link.shutdown();
    server.join().unwrap();
}

// ============================================================================
//  LIFECYCLE
// ============================================================================

#[test]
fn test_watchdog_sends_exactly_one_exit() {
    let (link, host) = start();
    let main = link.spawn_main(|| thread::sleep(Duration::from_millis(30))).unwrap();
    main.join().unwrap();

    let exit = host.recv_call(WAIT).unwrap();
    assert_eq!(exit.id, 0);
    assert_eq!(exit.function, "exit!");
    assert_ne!(link.state(), LinkState::Running);
    assert!(!link.request_exit());

    host.ack_exit();
    assert!(link.join_timeout(WAIT));
    assert!(host.recv_raw(Duration::from_millis(100)).is_none());
}

#[test]
fn test_watchdog_fires_after_panic() {
    let (link, host) = start();
    let main = link.spawn_main(|| panic!("script failed")).unwrap();
    assert!(main.join().is_err());

    assert_eq!(host.recv_call(WAIT).unwrap().function, "exit!");
}

#[test]
fn test_unacknowledged_exit_closes_link() {
    let (link, host) = start();
    assert!(link.request_exit());
    assert_eq!(host.recv_call(WAIT).unwrap().function, "exit!");

    assert!(link.join_timeout(WAIT));
    assert_eq!(link.state(), LinkState::Closed);
}

#[test]
fn test_waits_return_after_close() {
    let (link, host) = start();
    let mut pending = link.call_async("never_answered", vec![]).unwrap();
    host.recv_call(WAIT).unwrap();

    let waiter = thread::spawn(move || pending.wait(None));
    thread::sleep(Duration::from_millis(50));
    drop(host);

    assert!(matches!(waiter.join().unwrap(), Err(Error::LinkClosed)));
    assert!(link.join_timeout(WAIT));

    let started = Instant::now();
    assert!(matches!(link.call("player_health", vec![]), Err(Error::LinkClosed)));
    assert!(matches!(link.call_async("player_health", vec![]), Err(Error::LinkClosed)));
    assert!(link.send("echo", vec![]).is_ok());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_wait_inside_runtime_is_refused() {
    let (link, host) = start();
    let mut fut = link.call_async("player_health", vec![]).unwrap();
    let call = host.recv_call(WAIT).unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let outcome = runtime.block_on(async { fut.wait(Some(WAIT)) });
    assert!(matches!(outcome, Err(Error::InsideRuntime)));

    // the call is still pending and can be waited on from a plain thread
    host.reply(Reply::value(call.id, 20.0).closing());
    assert_eq!(fut.wait(Some(WAIT)).unwrap(), Value::Float(20.0));
}

#[test]
fn test_non_finite_argument_is_refused() {
    let (link, host) = start();
    assert!(matches!(link.call_async("echo", vec![Value::Float(f64::NAN)]), Err(Error::Rpc(_))));
    assert_eq!(link.pending_calls(), 0);
    assert!(host.recv_raw(Duration::from_millis(100)).is_none());
}

#[test]
fn test_unsolicited_exit_ack_closes_link() {
    let (link, host) = start();
    host.ack_exit();
    assert!(link.join_timeout(WAIT));
}

// ============================================================================
//  TRANSPORT
// ============================================================================

#[tokio::test]
async fn test_line_transport_over_duplex() {
    let (script_side, host_side) = tokio::io::duplex(1024);
    let (read, write) = tokio::io::split(script_side);
    let transport = LineTransport::new(BufReader::new(read), write);

    let (host_read, mut host_write) = tokio::io::split(host_side);
    let mut host_lines = BufReader::new(host_read).lines();

    transport.send_line("?mc1 script player_health []\n").await.unwrap();
    assert_eq!(host_lines.next_line().await.unwrap().unwrap(), "?mc1 script player_health []");

    host_write.write_all(b"{\"fcid\":1,\"retval\":20.0}\r\n").await.unwrap();
    assert_eq!(transport.recv_line().await.unwrap().unwrap(), "{\"fcid\":1,\"retval\":20.0}");

    drop(host_write);
    drop(host_lines);
    assert!(transport.recv_line().await.unwrap().is_none());
}
