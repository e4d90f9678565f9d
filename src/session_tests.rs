use super::*;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use embassy_futures::block_on;
use serde_json::json;
use std::sync::Mutex as StdMutex;

use crate::link::Message;

#[derive(Debug, PartialEq)]
struct LinkDown;

/// Records outbound traffic and replays queued inbound messages.
#[derive(Default)]
struct MockLink {
    connects: usize,
    subscribed: Vec<(String, QoS)>,
    published: Vec<(String, Vec<u8>, QoS)>,
    inbound: VecDeque<(String, Vec<u8>)>,
    current: Option<(String, Vec<u8>)>,
    refuse_connect: bool,
    fail_publish: bool,
}

impl MockLink {
    fn push(&mut self, topic: &str, payload: &[u8]) {
        self.inbound.push_back((String::from(topic), payload.to_vec()));
    }

    fn topics(&self) -> Vec<&str> {
        self.published.iter().map(|(topic, _, _)| topic.as_str()).collect()
    }

    fn payload(&self, index: usize) -> Value {
        codec::decode(&self.published[index].1).unwrap()
    }

    fn next(&mut self) -> Option<Message<'_>> {
        self.current = Some(self.inbound.pop_front()?);
        self.current.as_ref().map(|(topic, payload)| Message {
            topic: topic.as_str(),
            payload: payload.as_slice(),
        })
    }
}

impl DeviceLink for MockLink {
    type Error = LinkDown;

    async fn connect(&mut self) -> Result<(), LinkDown> {
        if self.refuse_connect {
            return Err(LinkDown);
        }
        self.connects += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkDown> {
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), LinkDown> {
        if self.fail_publish {
            return Err(LinkDown);
        }
        self.published.push((String::from(topic), payload.to_vec(), qos));
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), LinkDown> {
        self.subscribed.push((String::from(filter), qos));
        Ok(())
    }

    async fn wait_message(&mut self) -> Result<Message<'_>, LinkDown> {
        self.next().ok_or(LinkDown)
    }

    async fn check_message(&mut self) -> Result<Option<Message<'_>>, LinkDown> {
        Ok(self.next())
    }
}

fn connected(router: &Router) -> DeviceSession<'_, MockLink> {
    let mut session = DeviceSession::new(MockLink::default(), router, SessionOptions::new());
    block_on(session.connect()).unwrap();
    session
}

fn recorder<T>() -> (Arc<StdMutex<Vec<T>>>, Arc<StdMutex<Vec<T>>>) {
    let log = Arc::new(StdMutex::new(Vec::new()));
    (log.clone(), log)
}

#[test]
fn connect_subscribes_device_topics_once() {
    let router = Router::new();
    let options = SessionOptions::new().with_qos(QoS::AtLeastOnce).unwrap();
    let mut session = DeviceSession::new(MockLink::default(), &router, options);
    assert_eq!(session.state(), ConnectionState::Disconnected);

    block_on(session.connect()).unwrap();
    block_on(session.connect()).unwrap();

    assert!(session.is_connected());
    assert_eq!(session.link().connects, 1);
    let filters: Vec<_> = session.link().subscribed.iter().map(|(f, q)| (f.as_str(), *q)).collect();
    assert_eq!(
        filters,
        [
            ("v1/devices/me/attributes", QoS::AtLeastOnce),
            ("v1/devices/me/attributes/response/+", QoS::AtLeastOnce),
            ("v1/devices/me/rpc/request/+", QoS::AtLeastOnce),
            ("v1/devices/me/rpc/response/+", QoS::AtLeastOnce),
        ]
    );
}

#[test]
fn refused_connect_stays_disconnected() {
    let router = Router::new();
    let link = MockLink {
        refuse_connect: true,
        ..Default::default()
    };
    let mut session = DeviceSession::new(link, &router, SessionOptions::new());

    assert!(matches!(block_on(session.connect()), Err(Error::Transport(LinkDown))));
    assert!(!session.is_connected());
    assert!(session.link().subscribed.is_empty());
}

#[test]
fn reconnect_subscribes_again() {
    let router = Router::new();
    let mut session = connected(&router);
    block_on(session.reconnect()).unwrap();
    assert_eq!(session.link().connects, 2);
    assert_eq!(session.link().subscribed.len(), 8);
}

#[test]
fn disconnect_is_idempotent_and_keeps_registrations() {
    let router = Router::new();
    let mut session = connected(&router);
    session.subscribe_to_attribute("a", |_| {});
    block_on(session.send_rpc_call("ping", &json!({}), |_, _| {})).unwrap();

    block_on(session.disconnect()).unwrap();
    block_on(session.disconnect()).unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(router.subscription_count(), 1);
    assert_eq!(router.pending_rpc_calls(), 1);
}

#[test]
fn publishing_requires_a_connection() {
    let router = Router::new();
    let mut session = DeviceSession::new(MockLink::default(), &router, SessionOptions::new());

    assert!(matches!(
        block_on(session.send_attributes(&json!({"fw": "1.0"}), QoS::AtMostOnce)),
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        block_on(session.send_rpc_call("getTime", &json!({}), |_, _| {})),
        Err(Error::NotConnected)
    ));
    assert_eq!(router.pending_rpc_calls(), 0);
    assert!(session.link().published.is_empty());
}

#[test]
fn qos_is_validated_before_anything_else() {
    let router = Router::new();
    let mut session = DeviceSession::new(MockLink::default(), &router, SessionOptions::new());

    assert!(matches!(
        block_on(session.send_telemetry(&json!({"t": 1}), QoS::ExactlyOnce)),
        Err(Error::Config(ConfigError::UnsupportedQos(QoS::ExactlyOnce)))
    ));
    assert_eq!(
        SessionOptions::new().with_qos(QoS::ExactlyOnce),
        Err(ConfigError::UnsupportedQos(QoS::ExactlyOnce))
    );
    assert_eq!(qos_from_u8(1), Ok(QoS::AtLeastOnce));
    assert_eq!(qos_from_u8(2), Err(ConfigError::UnsupportedQos(QoS::ExactlyOnce)));
    assert_eq!(qos_from_u8(7), Err(ConfigError::InvalidQos(7)));
}

#[test]
fn telemetry_reading_is_wrapped_and_batch_kept() {
    let router = Router::new();
    let mut session = connected(&router);

    block_on(session.send_telemetry(&json!({"temperature": 21.5}), QoS::AtLeastOnce)).unwrap();
    block_on(session.send_telemetry_batch(&[json!({"a": 1}), json!({"a": 2})], QoS::AtMostOnce)).unwrap();

    let link = session.link();
    assert_eq!(link.topics(), ["v1/devices/me/telemetry", "v1/devices/me/telemetry"]);
    assert_eq!(link.published[0].2, QoS::AtLeastOnce);
    assert_eq!(link.payload(0), json!([{"temperature": 21.5}]));
    assert_eq!(link.payload(1), json!([{"a": 1}, {"a": 2}]));
}

#[test]
fn attributes_and_claim_use_their_topics() {
    let router = Router::new();
    let mut session = connected(&router);

    block_on(session.send_attributes(&json!({"fw": "1.0"}), QoS::AtMostOnce)).unwrap();
    block_on(session.claim("s3cret", DEFAULT_CLAIM_DURATION_MS)).unwrap();

    let link = session.link();
    assert_eq!(link.topics(), ["v1/devices/me/attributes", "v1/devices/me/claim"]);
    assert_eq!(link.payload(0), json!({"fw": "1.0"}));
    assert_eq!(link.payload(1), json!({"secretKey": "s3cret", "durationMs": 30000}));
}

#[test]
fn subscribed_callback_receives_whole_push() {
    let router = Router::new();
    let mut session = connected(&router);
    let (log, seen) = recorder();
    session.subscribe_to_attribute("uploadFrequency", move |attrs| {
        seen.lock().unwrap().push(Value::Object(attrs.clone()));
    });

    session
        .link_mut()
        .push("v1/devices/me/attributes", br#"{"uploadFrequency": 30, "other": 1}"#);
    assert_eq!(block_on(session.wait_msg()).unwrap(), Routed::Attributes(1));

    assert_eq!(*log.lock().unwrap(), [json!({"uploadFrequency": 30, "other": 1})]);
}

#[test]
fn wildcard_and_key_subscriptions_both_fire() {
    let router = Router::new();
    let mut session = connected(&router);
    let (log, seen) = recorder();
    let also = seen.clone();
    session.subscribe_to_all_attributes(move |_| seen.lock().unwrap().push("all"));
    session.subscribe_to_attribute("mode", move |_| also.lock().unwrap().push("mode"));

    session.link_mut().push("v1/devices/me/attributes", br#"{"mode": "eco"}"#);
    block_on(session.wait_msg()).unwrap();
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn unsubscribed_callbacks_stay_silent() {
    let router = Router::new();
    let mut session = connected(&router);
    let (log, seen) = recorder();
    let again = seen.clone();
    let handle = session.subscribe_to_attribute("mode", move |_| seen.lock().unwrap().push(()));
    session.subscribe_to_all_attributes(move |_| again.lock().unwrap().push(()));

    assert!(session.unsubscribe_from_attribute(handle));
    assert!(!session.unsubscribe_from_attribute(handle));
    session.link_mut().push("v1/devices/me/attributes", br#"{"mode": "eco"}"#);
    block_on(session.wait_msg()).unwrap();
    assert_eq!(log.lock().unwrap().len(), 1);

    session.unsubscribe_from_all_attributes();
    session.link_mut().push("v1/devices/me/attributes", br#"{"mode": "eco"}"#);
    assert_eq!(block_on(session.wait_msg()).unwrap(), Routed::Attributes(0));
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn attribute_request_without_keys_sends_nothing() {
    let router = Router::new();
    let mut session = connected(&router);

    let id = block_on(session.request_attributes(&[], &[], |_| {})).unwrap();
    assert_eq!(id, None);
    assert!(session.link().published.is_empty());
    assert_eq!(router.pending_attribute_requests(), 0);
}

#[test]
fn attribute_request_round_trip() {
    let router = Router::new();
    let mut session = connected(&router);
    let (log, seen) = recorder();

    let id = block_on(session.request_attributes(&["a", "b"], &["c"], move |attrs| {
        seen.lock().unwrap().push(Value::Object(attrs));
    }))
    .unwrap();
    assert_eq!(id, Some(1));
    assert_eq!(session.link().topics(), ["v1/devices/me/attributes/request/1"]);
    assert_eq!(session.link().payload(0), json!({"clientKeys": "a,b", "sharedKeys": "c"}));

    let response = br#"{"client": {"a": 1}, "shared": {"c": true}}"#;
    session.link_mut().push("v1/devices/me/attributes/response/1", response);
    assert_eq!(
        block_on(session.wait_msg()).unwrap(),
        Routed::AttributeResponse { id: 1, matched: true }
    );
    assert_eq!(
        *log.lock().unwrap(),
        [json!({"client": {"a": 1}, "shared": {"c": true}})]
    );
}

#[test]
fn shared_keys_alone_are_enough() {
    let router = Router::new();
    let mut session = connected(&router);
    block_on(session.request_attributes(&[], &["target"], |_| {})).unwrap();
    assert_eq!(session.link().payload(0), json!({"sharedKeys": "target"}));
}

#[test]
fn rpc_calls_resolve_out_of_order() {
    let router = Router::new();
    let mut session = connected(&router);
    let (log, first) = recorder();
    let second = first.clone();

    let id1 = block_on(session.send_rpc_call("getTime", &json!({}), move |id, value| {
        first.lock().unwrap().push((id, value));
    }))
    .unwrap();
    let id2 = block_on(session.send_rpc_call("getTime", &json!({}), move |id, value| {
        second.lock().unwrap().push((id, value));
    }))
    .unwrap();
    assert!(id2 > id1);
    assert_eq!(
        session.link().topics(),
        ["v1/devices/me/rpc/request/1", "v1/devices/me/rpc/request/2"]
    );
    assert_eq!(session.link().payload(0), json!({"method": "getTime", "params": {}}));

    session.link_mut().push("v1/devices/me/rpc/response/2", br#"{"time": 456}"#);
    block_on(session.wait_msg()).unwrap();
    assert_eq!(*log.lock().unwrap(), [(2, json!({"time": 456}))]);
    assert_eq!(router.pending_rpc_calls(), 1);
}

#[test]
fn rpc_response_is_delivered_exactly_once() {
    let router = Router::new();
    let mut session = connected(&router);
    let (log, seen) = recorder();

    let id = block_on(session.send_rpc_call("getTime", &json!({}), move |id, value| {
        seen.lock().unwrap().push((id, value));
    }))
    .unwrap();
    assert_eq!(id, 1);

    let link = session.link_mut();
    link.push("v1/devices/me/rpc/response/1", br#"{"time": 123}"#);
    link.push("v1/devices/me/rpc/response/1", br#"{"time": 123}"#);
    assert_eq!(
        block_on(session.wait_msg()).unwrap(),
        Routed::RpcResponse { id: 1, matched: true }
    );
    assert_eq!(
        block_on(session.wait_msg()).unwrap(),
        Routed::RpcResponse { id: 1, matched: false }
    );
    assert_eq!(*log.lock().unwrap(), [(1, json!({"time": 123}))]);
}

#[test]
fn failed_publish_forgets_the_request() {
    let router = Router::new();
    let mut session = connected(&router);
    session.link_mut().fail_publish = true;

    assert!(matches!(
        block_on(session.send_rpc_call("getTime", &json!({}), |_, _| {})),
        Err(Error::Transport(LinkDown))
    ));
    assert_eq!(router.pending_rpc_calls(), 0);
    assert!(!session.is_connected());
}

#[test]
fn failed_attribute_request_is_forgotten() {
    let router = Router::new();
    let mut session = connected(&router);
    session.link_mut().fail_publish = true;

    assert!(matches!(
        block_on(session.request_attributes(&["a"], &[], |_| {})),
        Err(Error::Transport(LinkDown))
    ));
    assert_eq!(router.pending_attribute_requests(), 0);
    assert!(!session.is_connected());
}

#[test]
fn server_rpc_reply_is_published() {
    let router = Router::new();
    let mut session = connected(&router);
    session.set_server_side_rpc_request_handler(|_, method, params| {
        (method == "setGpio").then(|| json!({"pin": params["pin"].clone(), "ok": true}))
    });

    session.link_mut().push(
        "v1/devices/me/rpc/request/abc-17",
        br#"{"method": "setGpio", "params": {"pin": 4}}"#,
    );
    let routed = block_on(session.wait_msg()).unwrap();
    assert!(matches!(routed, Routed::RpcRequest { handled: true, .. }));
    assert_eq!(session.link().topics(), ["v1/devices/me/rpc/response/abc-17"]);
    assert_eq!(session.link().payload(0), json!({"pin": 4, "ok": true}));
}

#[test]
fn handler_without_reply_publishes_nothing() {
    let router = Router::new();
    let mut session = connected(&router);
    let (log, seen) = recorder();
    session.set_server_side_rpc_request_handler(move |id, method, _| {
        seen.lock().unwrap().push((String::from(id), String::from(method)));
        None
    });

    session
        .link_mut()
        .push("v1/devices/me/rpc/request/3", br#"{"method": "reboot"}"#);
    block_on(session.wait_msg()).unwrap();
    assert!(session.link().published.is_empty());
    assert_eq!(
        *log.lock().unwrap(),
        [(String::from("3"), String::from("reboot"))]
    );

    block_on(session.send_rpc_reply("3", &json!("done"), QoS::AtMostOnce)).unwrap();
    assert_eq!(session.link().topics(), ["v1/devices/me/rpc/response/3"]);
}

#[test]
fn bad_payload_is_reported_and_session_continues() {
    let router = Router::new();
    let mut session = connected(&router);
    let (log, seen) = recorder();
    session.subscribe_to_all_attributes(move |_| seen.lock().unwrap().push(()));

    let link = session.link_mut();
    link.push("v1/devices/me/attributes", b"{not json");
    link.push("v1/devices/me/attributes", br#"{"a": 1}"#);

    assert!(matches!(
        block_on(session.wait_msg()),
        Err(Error::Decode(DecodeError::InvalidJson))
    ));
    assert!(session.is_connected());
    block_on(session.wait_msg()).unwrap();
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn check_msg_polls_without_waiting() {
    let router = Router::new();
    let mut session = connected(&router);

    assert_eq!(block_on(session.check_msg()).unwrap(), None);
    session.link_mut().push("unrelated/topic", b"?");
    assert_eq!(block_on(session.check_msg()).unwrap(), Some(Routed::Ignored));
}

#[test]
fn lost_link_disconnects_the_session() {
    let router = Router::new();
    let mut session = connected(&router);

    assert!(matches!(block_on(session.wait_msg()), Err(Error::Transport(LinkDown))));
    assert!(!session.is_connected());
    assert!(matches!(block_on(session.wait_msg()), Err(Error::NotConnected)));
}
