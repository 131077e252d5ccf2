//! MQTT transport built on `rumqttc`.
//!
//! Confirmed publishes go out at QoS 1, fire-and-forget ones at QoS 0.
//! `rumqttc` does not hand out packet ids, so acknowledgments are matched by
//! order: requests leave the client queue in submission order, each one shows
//! up as an outgoing publish event carrying its packet id, and the broker's
//! PUBACK resolves the waiter registered under that id.
//!
//! After a connection error `rumqttc` replays unacknowledged publishes with
//! their original packet ids, followed by requests still queued. An outgoing
//! publish whose id is already in flight is such a replay and leaves the
//! submission queue alone, so pairing survives reconnects.

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, QoS,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::{BrokerError, Result};
use crate::message::{DeliveryMode, Message};
use crate::options::LinkOptions;
use crate::transport::{AckSender, BrokerClient, BrokerEvents, Connector, LinkEvent};

/// Opens MQTT transports.
#[derive(Debug, Default, Clone, Copy)]
pub struct MqttConnector;

impl Connector for MqttConnector {
    fn open(&self, options: &LinkOptions) -> Result<(Arc<dyn BrokerClient>, Box<dyn BrokerEvents>)> {
        if options.host.is_empty() {
            return Err(BrokerError::Connect("empty broker host".to_string()));
        }
        if options.identity.trim().is_empty() || options.identity.starts_with(' ') {
            return Err(BrokerError::Connect("invalid client identity".to_string()));
        }

        let mut mqtt = MqttOptions::new(options.identity.clone(), options.host.clone(), options.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(true);
        if let Some(credentials) = &options.credentials {
            mqtt.set_credentials(credentials.username.clone(), credentials.password.clone());
        }

        let (client, eventloop) = AsyncClient::new(mqtt, options.queue_capacity.max(1));
        let acks = Arc::new(Mutex::new(AckTracker::default()));

        let client = MqttClient {
            client,
            acks: acks.clone(),
        };
        let events = MqttEvents { eventloop, acks };
        Ok((Arc::new(client), Box::new(events)))
    }
}

/// Pairs outgoing publishes with their acknowledgments.
#[derive(Default)]
struct AckTracker {
    /// One entry per submitted publish, in submission order.
    queued: VecDeque<Option<AckSender>>,
    /// Waiters keyed by packet id once the publish left the client.
    inflight: HashMap<u16, AckSender>,
}

impl AckTracker {
    fn submitted(&mut self, ack: Option<AckSender>) {
        self.queued.push_back(ack);
    }

    fn sent(&mut self, pkid: u16) {
        if pkid != 0 && self.inflight.contains_key(&pkid) {
            return;
        }
        let Some(entry) = self.queued.pop_front() else {
            return;
        };
        if let Some(ack) = entry {
            if pkid == 0 {
                let _ = ack.send(());
            } else {
                self.inflight.insert(pkid, ack);
            }
        }
    }

    fn acknowledged(&mut self, pkid: u16) {
        if let Some(ack) = self.inflight.remove(&pkid) {
            let _ = ack.send(());
        }
    }

    /// Drop every waiter; their receivers observe the loss. Only for a
    /// transport that will never be polled again.
    fn fail_all(&mut self) {
        self.queued.clear();
        self.inflight.clear();
    }
}

struct MqttClient {
    client: AsyncClient,
    acks: Arc<Mutex<AckTracker>>,
}

#[async_trait]
impl BrokerClient for MqttClient {
    fn try_publish(&self, message: &Message, ack: Option<AckSender>) -> Result<()> {
        let qos = match message.mode {
            DeliveryMode::Confirmed => QoS::AtLeastOnce,
            DeliveryMode::FireAndForget => QoS::AtMostOnce,
        };

        // Hold the tracker across the enqueue so tracker order matches queue order.
        let mut acks = self.acks.lock();
        self.client
            .try_publish(message.topic.clone(), qos, false, message.payload.to_vec())
            .map_err(map_client_error)?;
        acks.submitted(ack);
        Ok(())
    }

    fn try_subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(map_client_error)
    }

    async fn disconnect(&self) -> Result<()> {
        self.acks.lock().fail_all();
        self.client.disconnect().await.map_err(map_client_error)
    }
}

fn map_client_error(err: ClientError) -> BrokerError {
    match err {
        ClientError::TryRequest(_) => BrokerError::QueueFull,
        _ => BrokerError::Closed,
    }
}

struct MqttEvents {
    eventloop: EventLoop,
    acks: Arc<Mutex<AckTracker>>,
}

#[async_trait]
impl BrokerEvents for MqttEvents {
    async fn next(&mut self) -> Result<LinkEvent> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    Ok(LinkEvent::Connected)
                } else {
                    Err(BrokerError::Refused(format!("{:?}", ack.code)))
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                Ok(LinkEvent::Message(Message::new(publish.topic, publish.payload)))
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                self.acks.lock().acknowledged(ack.pkid);
                Ok(LinkEvent::Other)
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                self.acks.lock().sent(pkid);
                Ok(LinkEvent::Other)
            }
            Ok(_) => Ok(LinkEvent::Other),
            // Waiters stay registered: pending requests are replayed on
            // reconnect, and the link's ack timeout bounds the wait.
            Err(ConnectionError::ConnectionRefused(code)) => {
                Err(BrokerError::Refused(format!("{:?}", code)))
            }
            Err(err) => Err(BrokerError::ConnectionLost(err.to_string())),
        }
    }
}
