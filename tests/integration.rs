//! Integration tests for the zephyrgram client core.

use parking_lot::Mutex;
use pipit::{
    Filter, RegistryOptions, Session, SessionConfig, Transport, ZephyrgramId, ZephyrgramInput,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

/// Records transport calls for assertions.
#[derive(Clone, Default)]
struct MockTransport {
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl Transport for MockTransport {
    fn subscribe(&self, class: &str, instance: &str, recipient: &str) -> pipit::Result<()> {
        self.calls
            .lock()
            .push(format!("sub {},{},{}", class, instance, recipient));
        Ok(())
    }

    fn unsubscribe(&self, class: &str, instance: &str, recipient: &str) -> pipit::Result<()> {
        self.calls
            .lock()
            .push(format!("unsub {},{},{}", class, instance, recipient));
        Ok(())
    }

    fn send(&self, gram: &ZephyrgramInput) -> pipit::Result<()> {
        self.calls
            .lock()
            .push(format!("send {}/{}", gram.class, gram.instance));
        Ok(())
    }
}

fn session(dir: &TempDir) -> (Session<MockTransport>, MockTransport) {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();

    let transport = MockTransport::default();
    let session = Session::open(
        SessionConfig {
            path: dir.path().join("pipit"),
            principal: Some("ada@ATHENA.MIT.EDU".to_string()),
            registry: RegistryOptions::default(),
            sync_interval: 1,
        },
        transport.clone(),
    )
    .unwrap();
    (session, transport)
}

fn inbound(class: &str, instance: &str) -> ZephyrgramInput {
    ZephyrgramInput::new(class, instance)
        .with_sender("bob@ATHENA.MIT.EDU")
        .with_auth(true)
        .with_fields(vec!["zsig".into(), "hello".into()])
}

#[test]
fn test_open_primes_personal_subscription() {
    let dir = TempDir::new().unwrap();
    let (_session, transport) = session(&dir);
    assert_eq!(transport.calls(), vec!["sub message,*,ada@ATHENA.MIT.EDU"]);
}

#[test]
fn test_subscribe_fans_out_un_chain() {
    let dir = TempDir::new().unwrap();
    let (session, transport) = session(&dir);
    transport.clear();

    let covered = session.subscribe("ununhelp", "*", "").unwrap();
    assert_eq!(covered.len(), 3);
    assert_eq!(
        transport.calls(),
        vec!["sub help,*,", "sub unhelp,*,", "sub ununhelp,*,"]
    );

    // Already covered: no registry change, no transport traffic.
    transport.clear();
    assert!(session.subscribe("help", "*", "").unwrap().is_empty());
    assert!(transport.calls().is_empty());
}

#[test]
fn test_reopen_replays_expanded_subscriptions() {
    let dir = TempDir::new().unwrap();
    {
        let (session, _) = session(&dir);
        session.subscribe("ununhelp", "*", "").unwrap();
    }

    let (_session, transport) = session(&dir);
    let calls = transport.calls();
    assert_eq!(calls[0], "sub message,*,ada@ATHENA.MIT.EDU");
    assert!(calls.contains(&"sub help,*,".to_string()));
    assert!(calls.contains(&"sub unhelp,*,".to_string()));
    assert!(calls.contains(&"sub ununhelp,*,".to_string()));
}

#[test]
fn test_drain_appends_and_escalates() {
    let dir = TempDir::new().unwrap();
    let (session, transport) = session(&dir);
    session.subscribe("help", "*", "").unwrap();
    transport.clear();

    let tx = session.inbound_sender();
    tx.send(inbound("help", "pipit")).unwrap();
    tx.send(inbound("help", "pipit")).unwrap();

    assert_eq!(session.drain_inbound().unwrap(), 2);
    assert_eq!(session.store().len(), 2);

    // The first depth-0 message raises the watermark to 1 and subscribes
    // to "unhelp"; the second finds the watermark already raised.
    assert_eq!(transport.calls(), vec!["sub unhelp,*,"]);

    // A message on "unhelp" escalates to "ununhelp".
    transport.clear();
    tx.send(inbound("unhelp", "pipit")).unwrap();
    assert_eq!(session.drain_inbound().unwrap(), 1);
    assert_eq!(transport.calls(), vec!["sub ununhelp,*,"]);
}

#[test]
fn test_escalation_ignores_unsubscribed_classes() {
    let dir = TempDir::new().unwrap();
    let (session, transport) = session(&dir);
    transport.clear();

    let tx = session.inbound_sender();
    tx.send(inbound("stranger", "x")).unwrap();
    assert_eq!(session.drain_inbound().unwrap(), 1);

    // Stored, but no registry row for "stranger" means no escalation.
    assert_eq!(session.store().len(), 1);
    assert!(transport.calls().is_empty());
}

#[test]
fn test_drain_blocking_times_out_empty() {
    let dir = TempDir::new().unwrap();
    let (session, _) = session(&dir);
    let appended = session
        .drain_inbound_blocking(std::time::Duration::from_millis(10))
        .unwrap();
    assert_eq!(appended, 0);
}

#[test]
fn test_unsubscribe_fans_out_drop_list() {
    let dir = TempDir::new().unwrap();
    let (session, transport) = session(&dir);
    session.subscribe("ununhelp", "*", "").unwrap();
    transport.clear();

    let dropped = session.unsubscribe("help", "*", "").unwrap();
    assert_eq!(dropped.len(), 3);
    assert_eq!(
        transport.calls(),
        vec!["unsub help,*,", "unsub unhelp,*,", "unsub ununhelp,*,"]
    );

    // Un-prefixed names are a guarded no-op.
    transport.clear();
    session.subscribe("unhelp", "*", "").unwrap();
    transport.clear();
    assert!(session.unsubscribe("unhelp", "*", "").unwrap().is_empty());
    assert!(transport.calls().is_empty());
}

#[test]
fn test_navigation_over_drained_messages() {
    let dir = TempDir::new().unwrap();
    let (session, _) = session(&dir);

    let tx = session.inbound_sender();
    for class in ["msg", "MSG", "Msg", "other", "msg", "noise", "noise", "msg"] {
        tx.send(inbound(class, "a")).unwrap();
    }
    session.drain_inbound().unwrap();

    let store = session.store();
    let filter = Filter::compile("cla is \"msg\"").unwrap();

    // Matching ids are [1, 2, 3, 5, 8], case-insensitively.
    assert_eq!(store.first_index(&filter).unwrap(), Some(ZephyrgramId(1)));
    assert_eq!(store.last_index(&filter).unwrap(), Some(ZephyrgramId(8)));
    assert_eq!(
        store.advance(ZephyrgramId(3), 2, &filter).unwrap(),
        Some(ZephyrgramId(8))
    );
    assert_eq!(
        store.advance(ZephyrgramId(3), -2, &filter).unwrap(),
        Some(ZephyrgramId(1))
    );
    assert_eq!(
        store.advance(ZephyrgramId(9), 0, &filter).unwrap(),
        Some(ZephyrgramId(8))
    );
    assert_eq!(store.count_after(ZephyrgramId(3), &filter).unwrap(), 2);

    // Negation flips the match set.
    let negated = filter.negate();
    assert_eq!(store.first_index(&negated).unwrap(), Some(ZephyrgramId(4)));
    assert_eq!(store.count_after(ZephyrgramId(0), &negated).unwrap(), 3);
}

#[test]
fn test_related_filter_follows_conversation() {
    let dir = TempDir::new().unwrap();
    let (session, _) = session(&dir);

    let tx = session.inbound_sender();
    tx.send(
        ZephyrgramInput::new("message", "personal")
            .with_sender("bob@ATHENA.MIT.EDU")
            .with_recipient("ada@ATHENA.MIT.EDU"),
    )
    .unwrap();
    tx.send(
        ZephyrgramInput::new("message", "personal")
            .with_sender("carol@ATHENA.MIT.EDU")
            .with_recipient("ada@ATHENA.MIT.EDU"),
    )
    .unwrap();
    tx.send(inbound("help", "pipit")).unwrap();
    session.drain_inbound().unwrap();

    let store = session.store();
    let reference = store.get(ZephyrgramId(1)).unwrap().unwrap();
    let filter = Filter::related(&reference, false, session.principal());

    let matching: Vec<u64> = store
        .scan_from(ZephyrgramId(1), &filter)
        .map(|r| r.unwrap().id.0)
        .collect();
    assert_eq!(matching, vec![1]);
}

#[test]
fn test_send_forwards_to_transport() {
    let dir = TempDir::new().unwrap();
    let (session, transport) = session(&dir);
    transport.clear();

    session
        .send(&ZephyrgramInput::new("help", "pipit").with_fields(vec![
            "sent from pipit".into(),
            "anyone around?".into(),
        ]))
        .unwrap();
    assert_eq!(transport.calls(), vec!["send help/pipit"]);
}

#[test]
fn test_import_zsubs() {
    let dir = TempDir::new().unwrap();
    let (session, transport) = session(&dir);
    transport.clear();

    let path = dir.path().join("zephyr.subs");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "help,*,").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "malformed line").unwrap();
    writeln!(file, "unpipit,*,").unwrap();
    drop(file);

    let summary = session.import_zsubs(&path).unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 1);

    let calls = transport.calls();
    assert!(calls.contains(&"sub help,*,".to_string()));
    assert!(calls.contains(&"sub pipit,*,".to_string()));
    assert!(calls.contains(&"sub unpipit,*,".to_string()));

    assert!(session.import_zsubs(dir.path().join("missing")).is_err());
}

#[test]
fn test_store_persists_across_sessions() {
    let dir = TempDir::new().unwrap();
    {
        let (session, _) = session(&dir);
        let tx = session.inbound_sender();
        tx.send(inbound("help", "one")).unwrap();
        tx.send(inbound("help", "two")).unwrap();
        session.drain_inbound().unwrap();
    }

    let (session, _) = session(&dir);
    let store = session.store();
    assert_eq!(store.len(), 2);
    let gram = store.get(ZephyrgramId(2)).unwrap().unwrap();
    assert_eq!(gram.instance, "two");
    assert_eq!(gram.body(), "hello");
}
