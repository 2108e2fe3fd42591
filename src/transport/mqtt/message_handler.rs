//! Pure routing of rumqttc events

use crate::transport::ReceivedEvent;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};

/// Routing decisions for events polled from the rumqttc event loop
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted a (re)connect
    ConnectionAcknowledged { session_present: bool },
    /// Inbound publish on a subscribed topic
    MessageReceived(ReceivedEvent),
    /// A QoS 1/2 publish left the client with this packet id
    OutgoingPublish(u16),
    /// PUBACK or PUBCOMP for an outgoing publish
    PublishCompleted(u16),
    SubscriptionConfirmed { packet_id: u16, rejected: bool },
    /// Broker-initiated disconnect
    Disconnected,
    Other,
}

pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(packet) => match packet {
            Packet::ConnAck(ack) => EventRoute::ConnectionAcknowledged {
                session_present: ack.session_present,
            },
            Packet::Publish(publish) => EventRoute::MessageReceived(ReceivedEvent {
                topic: publish.topic.clone(),
                payload: publish.payload.clone(),
                qos: publish.qos,
                retained: publish.retain,
            }),
            Packet::PubAck(ack) => EventRoute::PublishCompleted(ack.pkid),
            Packet::PubComp(comp) => EventRoute::PublishCompleted(comp.pkid),
            Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                packet_id: suback.pkid,
                rejected: suback
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure)),
            },
            Packet::Disconnect => EventRoute::Disconnected,
            _ => EventRoute::Other,
        },
        Event::Outgoing(Outgoing::Publish(pkid)) if *pkid != 0 => {
            EventRoute::OutgoingPublish(*pkid)
        }
        Event::Outgoing(_) => EventRoute::Other,
    }
}
