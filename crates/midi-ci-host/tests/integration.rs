//! Integration tests for midi-ci-host.
//!
//! A `Device` is driven with raw messages, as a remote device would send
//! them, and its output is decoded again.

use std::cell::RefCell;
use std::rc::Rc;

use midi_ci_core::message::{category, nak_status, Discovery, ProfileChannels, PropertyChunk};
use midi_ci_core::{
    parser, Body, ChannelAddress, ChannelInGroup, ChunkCount, DeviceInfo, Header, Muid, Parsed,
    Profile, ProfileAtAddress, PropertyReplyData, PropertyReplyHeader, PropertyRequestData,
    PropertyRequestHeader, PropertySubscriptionHeader, SubscriptionCommand, IMPLEMENTATION_VERSION,
};
use midi_ci_host::{
    ChunkParams, Device, DeviceEvent, EnablementRequest, ProfileControl, ProfileDelegate,
    PropertyChunker, PropertyDelegate, SliceSource, Subscription,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const GM: Profile = Profile([0x7e, 0x00, 0x01, 0x01, 0x00]);

type Sent = Rc<RefCell<Vec<(u8, Vec<u8>)>>>;

fn local() -> Muid {
    Muid::new(0x0123_4567).unwrap()
}

fn remote() -> Muid {
    Muid::new(0x0765_4321).unwrap()
}

/// Accepts every enablement request as asked.
struct EchoProfiles;

impl ProfileDelegate for EchoProfiles {
    fn profile_enablement_requested(&mut self, request: EnablementRequest, control: &mut ProfileControl<'_>) {
        let channels = if request.enabled {
            i32::from(request.num_channels)
        } else {
            0
        };
        control
            .set_profile_enablement(request.profile_at_address, channels)
            .unwrap();
    }

    fn profile_details_inquired(&mut self, _: Muid, _: ProfileAtAddress, _: u8) -> Vec<u8> {
        Vec::new()
    }
}

#[derive(Default)]
struct PropertyLog {
    set: Vec<PropertyRequestData>,
    ended: Vec<Subscription>,
}

struct LoggingProperties(Rc<RefCell<PropertyLog>>);

impl PropertyDelegate for LoggingProperties {
    fn property_get_data_requested(&mut self, _: Muid, _: &PropertyRequestHeader) -> PropertyReplyData {
        PropertyReplyData::default()
    }

    fn property_set_data_requested(&mut self, _: Muid, request: &PropertyRequestData) -> PropertyReplyHeader {
        self.0.borrow_mut().set.push(request.clone());
        PropertyReplyHeader::default()
    }

    fn subscription_start_requested(&mut self, _: Muid, _: &PropertySubscriptionHeader) -> bool {
        true
    }

    fn subscription_did_start(&mut self, _: Muid, _: &str, _: &PropertySubscriptionHeader) {}

    fn subscription_will_end(&mut self, _: Muid, subscription: &Subscription) {
        self.0.borrow_mut().ended.push(subscription.clone());
    }
}

fn device() -> (Device, Sent, Rc<RefCell<PropertyLog>>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let sent: Sent = Rc::default();
    let sink = sent.clone();
    let log = Rc::new(RefCell::new(PropertyLog::default()));
    let device = Device::builder()
        .muid(local())
        .profiles(EchoProfiles)
        .properties(LoggingProperties(log.clone()))
        .output(move |group, bytes| sink.borrow_mut().push((group, bytes.to_vec())))
        .build()
        .unwrap();
    (device, sent, log)
}

fn from_remote(device_id: ChannelInGroup, body: &Body) -> Vec<u8> {
    let header = Header {
        device_id,
        category: body.category(),
        version: IMPLEMENTATION_VERSION,
        source: remote(),
        destination: local(),
    };
    parser::encode(&header, body).unwrap()
}

/// Drains and decodes everything the device sent.
fn drain(sent: &Sent) -> Vec<(u8, Parsed)> {
    sent.borrow_mut()
        .drain(..)
        .map(|(group, bytes)| (group, parser::parse(&bytes).0.unwrap()))
        .collect()
}

fn chunks_from_remote(kind: u8, request_id: u8, header: &[u8], body: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    let params = ChunkParams {
        chunk_size,
        kind,
        request_id,
        source: remote(),
        destination: local(),
    };
    PropertyChunker::new(params, header.to_vec(), SliceSource::new(body))
        .unwrap()
        .collect()
}

fn reply_status(header: &[u8]) -> i64 {
    PropertyReplyHeader::from_bytes(header).unwrap().status
}

// ---------------------------------------------------------------------------
// 1. Profiles
// ---------------------------------------------------------------------------

/// A request for more channels than supported enables the supported count.
#[test]
fn test_profile_on_is_clamped_to_supported_channels() {
    let (mut device, sent, _) = device();
    let address = ChannelAddress::new(0, ChannelInGroup::Channel(2));
    device
        .profiles()
        .unwrap()
        .add_profile(ProfileAtAddress::new(GM, address), 3)
        .unwrap();
    assert!(drain(&sent).is_empty());

    let on = Body::ProfileOn(ProfileChannels {
        profile: GM,
        num_channels: 5,
    });
    device.process_message(0, &from_remote(ChannelInGroup::Channel(2), &on));

    let replies = drain(&sent);
    assert_eq!(replies.len(), 1);
    let (group, reply) = &replies[0];
    assert_eq!(*group, 0);
    assert_eq!(reply.header.device_id, ChannelInGroup::Channel(2));
    assert_eq!(reply.header.destination, Muid::BROADCAST);
    assert_eq!(
        reply.body,
        Some(Body::ProfileEnabledReport(ProfileChannels {
            profile: GM,
            num_channels: 3,
        }))
    );

    let state = device.profile_host().unwrap().state(ProfileAtAddress::new(GM, address));
    assert_eq!((state.supported, state.active), (3, 3));
}

/// Requests for unsupported profiles are rejected.
#[test]
fn test_profile_on_for_unknown_profile_is_nakd() {
    let (mut device, sent, _) = device();
    let on = Body::ProfileOn(ProfileChannels {
        profile: GM,
        num_channels: 1,
    });
    device.process_message(0, &from_remote(ChannelInGroup::Channel(0), &on));

    match &drain(&sent)[0].1.body {
        Some(Body::Nak(nak)) => assert_eq!(nak.original_category, category::PROFILE_ON),
        other => panic!("expected NAK, got {other:?}"),
    }
}

/// A whole-block inquiry reports channels, then groups, then the block.
#[test]
fn test_whole_block_inquiry_ends_with_block_reply() {
    let (mut device, sent, _) = device();
    {
        let mut profiles = device.profiles().unwrap();
        for channel in [ChannelInGroup::Channel(1), ChannelInGroup::WholeGroup, ChannelInGroup::WholeBlock] {
            profiles
                .add_profile(ProfileAtAddress::new(GM, ChannelAddress::new(0, channel)), 1)
                .unwrap();
        }
    }

    device.process_message(0, &from_remote(ChannelInGroup::WholeBlock, &Body::ProfileInquiry));

    let ids: Vec<_> = drain(&sent)
        .into_iter()
        .map(|(_, parsed)| {
            assert_eq!(parsed.header.category, category::PROFILE_INQUIRY_RESPONSE);
            parsed.header.device_id
        })
        .collect();
    assert_eq!(
        ids,
        [ChannelInGroup::Channel(1), ChannelInGroup::WholeGroup, ChannelInGroup::WholeBlock]
    );
    assert!(device.profile_host().unwrap().is_responder());

    // Changes are broadcast once the device has answered an inquiry
    device
        .profiles()
        .unwrap()
        .set_profile_enablement(
            ProfileAtAddress::new(GM, ChannelAddress::new(0, ChannelInGroup::WholeBlock)),
            1,
        )
        .unwrap();
    let broadcast = drain(&sent);
    assert_eq!(broadcast.len(), 1);
    assert_eq!(broadcast[0].1.header.category, category::PROFILE_ENABLED_REPORT);
}

// ---------------------------------------------------------------------------
// 2. Discovery and management
// ---------------------------------------------------------------------------

/// Discovery is answered and the remote device remembered.
#[test]
fn test_discovery_round_trip() {
    let (mut device, sent, _) = device();
    let discovery = Body::Discovery(Discovery {
        device: DeviceInfo {
            manufacturer: [0x00, 0x21, 0x09],
            ..Default::default()
        },
        capabilities: 0x0c,
        max_sysex_size: 1024,
        output_path_id: 3,
    });
    let header = Header {
        device_id: ChannelInGroup::WholeBlock,
        category: category::DISCOVERY,
        version: IMPLEMENTATION_VERSION,
        source: remote(),
        destination: Muid::BROADCAST,
    };
    device.process_message(0, &parser::encode(&header, &discovery).unwrap());

    let replies = drain(&sent);
    assert_eq!(replies.len(), 1);
    match &replies[0].1.body {
        Some(Body::DiscoveryResponse(response)) => {
            assert_eq!(response.capabilities, device.capabilities());
            assert_eq!(response.output_path_id, 3);
            assert_eq!(response.max_sysex_size, 512);
        }
        other => panic!("unexpected {other:?}"),
    }

    let (muid, remote_device) = device.discovered_devices().next().unwrap();
    assert_eq!(muid, remote());
    assert_eq!(remote_device.identity.manufacturer, [0x00, 0x21, 0x09]);
    assert_eq!(device.property_host().unwrap().max_sysex_size_for(remote()), 1024);

    // Invalidation forgets it again
    let invalidate = Body::InvalidateMuid { target: remote() };
    let header = Header {
        category: category::INVALIDATE_MUID,
        ..header
    };
    device.process_message(0, &parser::encode(&header, &invalidate).unwrap());
    assert_eq!(device.discovered_devices().count(), 0);
}

/// Unknown categories addressed to the device get NAK 0x01.
#[test]
fn test_unknown_message_is_nakd() {
    let (mut device, sent, _) = device();
    let mut bytes = from_remote(ChannelInGroup::WholeBlock, &Body::ProfileInquiry);
    bytes[3] = 0x5a;
    device.process_message(0, &bytes);

    match &drain(&sent)[0].1.body {
        Some(Body::Nak(nak)) => {
            assert_eq!(nak.status_code, nak_status::UNSUPPORTED_MESSAGE);
            assert_eq!(nak.original_category, 0x5a);
        }
        other => panic!("expected NAK, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 3. Property exchange
// ---------------------------------------------------------------------------

/// A chunked set request is reassembled and acknowledged once.
#[test]
fn test_chunked_set_data() {
    let (mut device, sent, log) = device();
    let body: Vec<u8> = b"{\"name\":\"Grand Piano\",\"bank\":0,\"program\":1}".repeat(4);
    let header = br#"{"resource":"CurrentProgram"}"#;
    let chunks = chunks_from_remote(category::PE_SET_DATA, 5, header, &body, 128);
    assert!(chunks.len() > 1);

    for chunk in &chunks {
        device.process_message(0, chunk);
    }

    let replies = drain(&sent);
    assert_eq!(replies.len(), 1);
    match &replies[0].1.body {
        Some(Body::PropertySetDataResponse(reply)) => {
            assert_eq!(reply.request_id, 5);
            assert_eq!(reply_status(&reply.header), 200);
        }
        other => panic!("unexpected {other:?}"),
    }

    let log = log.borrow();
    assert_eq!(log.set.len(), 1);
    assert_eq!(log.set[0].header.resource, "CurrentProgram");
    assert_eq!(log.set[0].body, body);
}

/// A subscription ended by the device is removed once the subscriber
/// acknowledges the end.
#[test]
fn test_terminated_subscription_is_removed_on_reply() {
    let (mut device, sent, log) = device();
    let start = PropertySubscriptionHeader {
        command: Some(SubscriptionCommand::Start),
        resource: "ProgramList".into(),
        ..Default::default()
    };
    let chunks = chunks_from_remote(category::PE_SUBSCRIBE, 1, &start.to_bytes().unwrap(), b"", 512);
    device.process_message(0, &chunks[0]);

    let subscribe_id = match &drain(&sent)[0].1.body {
        Some(Body::PropertySubscribeResponse(chunk)) => {
            let reply = PropertyReplyHeader::from_bytes(&chunk.header).unwrap();
            reply.extended["subscribeId"].as_str().unwrap().to_string()
        }
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(subscribe_id, "0");

    let key = device.terminate_subscription(remote(), &subscribe_id).unwrap();
    let end = drain(&sent);
    let request_id = match &end[0].1.body {
        Some(Body::PropertySubscribe(chunk)) => {
            let header = PropertySubscriptionHeader::from_bytes(&chunk.header).unwrap();
            assert_eq!(header.command, Some(SubscriptionCommand::End));
            chunk.request_id
        }
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(device.property_host().unwrap().ongoing_requests(), [key]);
    assert!(log.borrow().ended.is_empty());

    let ack = Body::PropertySubscribeResponse(PropertyChunk {
        request_id,
        header: PropertyReplyHeader::default().to_bytes().unwrap(),
        total_chunks: ChunkCount::Known(1),
        this_chunk: 1,
        data: Vec::new(),
    });
    device.process_message(0, &from_remote(ChannelInGroup::WholeBlock, &ack));

    assert!(drain(&sent).is_empty());
    assert_eq!(log.borrow().ended[0].resource, "ProgramList");
    assert!(device
        .property_host()
        .unwrap()
        .find_subscriptions_for_device(remote())
        .is_empty());
    assert_eq!(device.property_host().unwrap().count_ongoing_transactions(), 0);
}

// ---------------------------------------------------------------------------
// 4. Negotiating with a remote device
// ---------------------------------------------------------------------------

const MPE: Profile = Profile([0x7e, 0x31, 0x00, 0x01, 0x01]);

/// A second device with MUID `remote()` and no hosts of its own.
fn initiator() -> (Device, Sent) {
    let sent: Sent = Rc::default();
    let sink = sent.clone();
    let device = Device::builder()
        .muid(remote())
        .output(move |group, bytes| sink.borrow_mut().push((group, bytes.to_vec())))
        .build()
        .unwrap();
    (device, sent)
}

/// Feeds everything one device sent to another.
fn deliver(from: &Sent, to: &mut Device) {
    let messages: Vec<_> = from.borrow_mut().drain(..).collect();
    for (group, bytes) in messages {
        to.process_message(group, &bytes);
    }
}

/// Discovery, inquiry, enablement, details and disablement between two devices.
#[test]
fn test_mpe_negotiation_between_devices() {
    let (mut responder, responder_sent, _) = device();
    let (mut initiator, initiator_sent) = initiator();
    let channel = ChannelInGroup::Channel(0);
    let address = ChannelAddress::new(0, channel);
    let at = ProfileAtAddress::new(MPE, address);

    responder.profiles().unwrap().add_profile(at, 16).unwrap();

    initiator.send_discovery();
    deliver(&initiator_sent, &mut responder);
    deliver(&responder_sent, &mut initiator);
    assert_eq!(initiator.drain_events(), vec![DeviceEvent::DeviceAdded(local())]);

    initiator.send_profile_inquiry(local(), channel).unwrap();
    deliver(&initiator_sent, &mut responder);
    deliver(&responder_sent, &mut initiator);
    assert_eq!(
        initiator.drain_events(),
        vec![DeviceEvent::ProfileStateReceived {
            muid: local(),
            address
        }]
    );
    let states = initiator.profile_state_for(local(), address).unwrap();
    assert_eq!(states.inactive(), vec![MPE]);

    initiator.send_profile_enablement(local(), channel, MPE, 4).unwrap();
    deliver(&initiator_sent, &mut responder);
    assert_eq!(responder.profile_host().unwrap().state(at).active, 4);
    deliver(&responder_sent, &mut initiator);
    assert_eq!(
        initiator.drain_events(),
        vec![DeviceEvent::ProfileEnablementChanged {
            muid: local(),
            at,
            num_channels: 4
        }]
    );
    assert!(initiator.profile_state_for(local(), address).unwrap().get(&MPE).is_active());

    initiator.send_profile_details_inquiry(local(), channel, MPE, 0).unwrap();
    deliver(&initiator_sent, &mut responder);
    deliver(&responder_sent, &mut initiator);
    assert_eq!(
        initiator.drain_events(),
        vec![DeviceEvent::ProfileDetailsReceived {
            muid: local(),
            at,
            target: 0,
            data: vec![4, 0, 16, 0],
        }]
    );

    initiator.send_profile_enablement(local(), channel, MPE, 0).unwrap();
    deliver(&initiator_sent, &mut responder);
    deliver(&responder_sent, &mut initiator);
    assert_eq!(
        initiator.drain_events(),
        vec![DeviceEvent::ProfileEnablementChanged {
            muid: local(),
            at,
            num_channels: 0
        }]
    );
    let state = initiator.profile_state_for(local(), address).unwrap().get(&MPE);
    assert_eq!((state.supported, state.active), (4, 0));
}

/// A rejected enablement request comes back as an event, not a state change.
#[test]
fn test_rejected_enablement_is_reported() {
    let (mut responder, responder_sent, _) = device();
    let (mut initiator, initiator_sent) = initiator();

    initiator.send_discovery();
    deliver(&initiator_sent, &mut responder);
    deliver(&responder_sent, &mut initiator);
    initiator.drain_events();

    initiator
        .send_profile_enablement(local(), ChannelInGroup::Channel(5), MPE, 2)
        .unwrap();
    deliver(&initiator_sent, &mut responder);
    deliver(&responder_sent, &mut initiator);

    match initiator.drain_events().as_slice() {
        [DeviceEvent::MessageNotAcknowledged { muid, nak }] => {
            assert_eq!(*muid, local());
            assert_eq!(nak.original_category, category::PROFILE_ON);
            assert_eq!(nak.status_code, nak_status::GENERIC);
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert!(initiator
        .profile_state_for(local(), ChannelAddress::new(0, ChannelInGroup::Channel(5)))
        .is_none());
}
