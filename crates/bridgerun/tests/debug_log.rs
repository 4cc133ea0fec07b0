//! Debug mode: diagnostics go to the side-channel log file, and every protocol
//! line is echoed there. Kept in its own test binary because it installs the
//! global subscriber.

use std::fs;
use std::time::Duration;

use bridgerpc::Reply;
use bridgerpc::Value;
use bridgerun::Link;
use bridgerun::LinkConfig;
use bridgerun::logging;
use bridgerun::mock_transport;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_debug_mode_echoes_wire_lines_to_log_file() {
    let path = std::env::temp_dir().join(format!("bridge-debug-{}.log", std::process::id()));
    let _ = fs::remove_file(&path);

    let config = LinkConfig {
        debug: true,
        log_file: path.clone(),
        ..LinkConfig::default()
    };
    let guard = logging::init(&config).unwrap();
    assert!(guard.is_some());

    let (transport, host) = mock_transport::pair();
    let link = Link::start(Box::new(transport), config).unwrap();
    let mut health = link.call_async("player_health", vec![]).unwrap();
    let call = host.recv_call(WAIT).unwrap();
    host.reply(Reply::value(call.id, 20.0).closing());
    assert_eq!(health.wait(Some(WAIT)).unwrap(), Value::Float(20.0));

    drop(link);
    drop(guard);

    let log = fs::read_to_string(&path).unwrap();
    let fcid = format!("\"fcid\":{}", call.id);
    assert!(
        log.lines().any(|l| l.contains("bridge::wire") && l.contains("<- {") && l.contains(&fcid)),
        "inbound line not echoed:\n{}",
        log
    );
    assert!(
        log.lines().any(|l| l.contains("bridge::wire") && l.contains("-> ?mc") && l.contains("player_health")),
        "outbound line not echoed:\n{}",
        log
    );

    let _ = fs::remove_file(&path);
}
