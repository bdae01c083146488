//! Responder-side property exchange.
//!
//! [`PropertyHost`] answers get, set and subscribe inquiries through a
//! [`PropertyDelegate`], reassembling chunked inquiries per remote device. It
//! also tracks the subscriptions remote devices hold, and can push updates
//! to those subscribers.

use std::collections::{BTreeMap, BTreeSet};

use midi_ci_core::encoding;
use midi_ci_core::message::{category, PropertyCapabilities, PropertyChunk, PropertyRequest};
use midi_ci_core::property_header::status;
use midi_ci_core::{
    Body, ChannelInGroup, ChunkCount, FunctionBlock, Header, Muid, Parsed, PropertyReplyData,
    PropertyReplyHeader, PropertyRequestData, PropertyRequestHeader, PropertySubscriptionHeader,
    SubscriptionCommand, IMPLEMENTATION_VERSION,
};

use crate::chunker::{send_chunked, ChunkParams, SliceSource};
use crate::error::{Error, Result};
use crate::exchange_cache::{
    ExchangeError, InitiatorExchangeCache, PropertyExchangeResult, ResponderExchangeCache,
};
use crate::output::{BufferOutput, ResponderOutput};
use crate::subscription::{RequestKey, Subscription, SubscriptionRegistry, SubscriptionToken};

/// Decides how the local device answers property inquiries.
pub trait PropertyDelegate {
    /// Transactions a single remote device may have in flight at once.
    fn simultaneous_requests_supported(&self) -> u8 {
        127
    }

    /// Produces the requested data. Report failures through the reply
    /// header's status and leave the body empty.
    fn property_get_data_requested(&mut self, muid: Muid, header: &PropertyRequestHeader) -> PropertyReplyData;

    /// Applies a set request and describes the outcome.
    fn property_set_data_requested(&mut self, muid: Muid, request: &PropertyRequestData) -> PropertyReplyHeader;

    /// Returns true to accept a subscription.
    fn subscription_start_requested(&mut self, muid: Muid, header: &PropertySubscriptionHeader) -> bool;

    fn subscription_did_start(&mut self, muid: Muid, subscribe_id: &str, header: &PropertySubscriptionHeader);

    fn subscription_will_end(&mut self, muid: Muid, subscription: &Subscription);
}

/// Called once with the outcome of a request this device started.
pub type ResultCallback = Box<dyn FnOnce(&PropertyExchangeResult)>;

struct PendingUpdate {
    /// Set for updates that end a subscription
    ending: Option<SubscriptionToken>,
    on_result: ResultCallback,
}

#[derive(Default)]
struct RemoteState {
    responder: ResponderExchangeCache,
    initiator: InitiatorExchangeCache<PendingUpdate>,
    max_sysex_size: Option<usize>,
}

pub struct PropertyHost {
    function_block: FunctionBlock,
    delegate: Box<dyn PropertyDelegate>,
    registry: SubscriptionRegistry,
    remotes: BTreeMap<Muid, RemoteState>,
    default_max_sysex_size: usize,
}

impl PropertyHost {
    /// `default_max_sysex_size` bounds chunks sent to devices whose own
    /// limit is unknown.
    pub fn new(
        function_block: FunctionBlock,
        delegate: Box<dyn PropertyDelegate>,
        default_max_sysex_size: usize,
    ) -> Self {
        Self {
            function_block,
            delegate,
            registry: SubscriptionRegistry::default(),
            remotes: BTreeMap::new(),
            default_max_sysex_size,
        }
    }

    /// Records the largest message `device` accepts.
    pub fn set_max_sysex_size(&mut self, device: Muid, size: usize) {
        self.remotes.entry(device).or_default().max_sysex_size = Some(size);
    }

    pub fn max_sysex_size_for(&self, device: Muid) -> usize {
        self.remotes
            .get(&device)
            .and_then(|remote| remote.max_sysex_size)
            .unwrap_or(self.default_max_sysex_size)
    }

    /// Drops all state about `device`. Pending callbacks are not called.
    pub fn forget_device(&mut self, device: Muid) {
        self.registry.forget_device(device);
        if self.remotes.remove(&device).is_some() {
            tracing::debug!("Forgot property state for {}", device);
        }
    }

    /// Sends a `partial`, `full`, `notify` or `end` update to a device
    /// subscribed to one of our resources.
    ///
    /// `on_result` runs when the device acknowledges the update. An
    /// acknowledged `end` also removes the subscription.
    pub fn send_subscription_update(
        &mut self,
        output: &mut dyn BufferOutput,
        device: Muid,
        header: &PropertySubscriptionHeader,
        body: &[u8],
        on_result: impl FnOnce(&PropertyExchangeResult) + 'static,
    ) -> Result<RequestKey> {
        if !self.registry.contains_device(device) {
            return Err(Error::UnknownDevice(device));
        }
        let token = SubscriptionToken::from_subscribe_id(&header.subscribe_id)
            .filter(|token| self.registry.resource(device, *token).is_some())
            .ok_or_else(|| Error::UnknownSubscription(header.subscribe_id.clone()))?;
        if self.registry.resource(device, token) != Some(header.resource.as_str()) {
            return Err(Error::ResourceMismatch);
        }
        if header.command == Some(SubscriptionCommand::Start) {
            return Err(Error::CannotStartSubscription);
        }

        let encoded = encoding::encode(body, header.mutual_encoding)?;
        let header_bytes = header.to_bytes()?;

        let max_requests = self.delegate.simultaneous_requests_supported();
        let chunk_size = self.max_sysex_size_for(device);
        let pending = PendingUpdate {
            ending: (header.command == Some(SubscriptionCommand::End)).then_some(token),
            on_result: Box::new(on_result),
        };
        let remote = self.remotes.entry(device).or_default();
        let (request_id, key) = remote
            .initiator
            .prime(max_requests, pending)
            .ok_or(Error::TooManyTransactions)?;

        let params = ChunkParams {
            chunk_size,
            kind: category::PE_SUBSCRIBE,
            request_id,
            source: output.muid(),
            destination: device,
        };
        if let Err(e) = send_chunked(
            output,
            self.function_block.first_group,
            params,
            header_bytes,
            SliceSource::new(&encoded),
        ) {
            remote.initiator.terminate(key);
            return Err(e.into());
        }

        Ok(RequestKey::new(device, key))
    }

    /// Ends a subscription that a remote device started.
    pub fn terminate_subscription(
        &mut self,
        output: &mut dyn BufferOutput,
        device: Muid,
        subscribe_id: &str,
    ) -> Result<RequestKey> {
        let resource = SubscriptionToken::from_subscribe_id(subscribe_id)
            .and_then(|token| self.registry.resource(device, token))
            .ok_or_else(|| Error::UnknownSubscription(subscribe_id.to_string()))?;

        let header = PropertySubscriptionHeader {
            command: Some(SubscriptionCommand::End),
            subscribe_id: subscribe_id.to_string(),
            resource: resource.to_string(),
            ..Default::default()
        };
        self.send_subscription_update(output, device, &header, &[], |_| {})
    }

    /// Stops waiting for a reply. The request's callback is dropped uncalled.
    pub fn abort_request(&mut self, key: RequestKey) -> bool {
        self.remotes
            .get_mut(&key.muid)
            .and_then(|remote| remote.initiator.terminate(key.key))
            .is_some()
    }

    pub fn find_subscriptions_for_device(&self, device: Muid) -> BTreeSet<Subscription> {
        self.registry.subscriptions_for(device)
    }

    /// Inquiries from remote devices still waiting for more chunks.
    pub fn count_ongoing_transactions(&self) -> usize {
        self.remotes
            .values()
            .map(|remote| remote.responder.count_ongoing())
            .sum()
    }

    /// Requests this device started that are still unanswered.
    pub fn ongoing_requests(&self) -> Vec<RequestKey> {
        self.remotes
            .iter()
            .flat_map(|(muid, remote)| {
                remote
                    .initiator
                    .ongoing_keys()
                    .map(move |key| RequestKey::new(*muid, key))
            })
            .collect()
    }

    pub fn function_block(&self) -> FunctionBlock {
        self.function_block
    }

    /// Handles property-exchange messages. Returns false for anything else
    /// and for inquiries that cannot be answered.
    pub fn try_respond(&mut self, output: &mut ResponderOutput<'_>, parsed: &Parsed) -> bool {
        match &parsed.body {
            Some(Body::PropertyCapabilities(_)) => {
                output.reply(&Body::PropertyCapabilitiesResponse(PropertyCapabilities {
                    simultaneous_requests: self.delegate.simultaneous_requests_supported(),
                    major_version: 0,
                    minor_version: 0,
                }));
                true
            }
            Some(Body::PropertyGetData(request)) => self.handle_get_data(output, request),
            Some(Body::PropertySetData(chunk)) => {
                self.handle_set_data(output, chunk);
                true
            }
            Some(Body::PropertySubscribe(chunk)) => self.handle_subscribe(output, chunk),
            Some(Body::PropertySubscribeResponse(chunk)) => {
                self.handle_subscribe_response(output.incoming_header().source, chunk)
            }
            Some(Body::PropertyNotify(chunk)) => {
                self.handle_notify(output.incoming_header().source, chunk)
            }
            _ => false,
        }
    }

    fn handle_get_data(&mut self, output: &mut ResponderOutput<'_>, request: &PropertyRequest) -> bool {
        let source = output.incoming_header().source;
        let header = PropertyRequestHeader::from_bytes(&request.header).unwrap_or_else(|e| {
            tracing::warn!("Unreadable get-data header from {}: {}", source, e);
            PropertyRequestHeader::default()
        });

        let reply = self.delegate.property_get_data_requested(source, &header);
        let encoded = match encoding::encode(&reply.body, reply.header.mutual_encoding) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!("Reply body for {:?} cannot be encoded: {}", header.resource, e);
                return false;
            }
        };
        let header_bytes = match reply.header.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Reply header for {:?} cannot be encoded: {}", header.resource, e);
                return false;
            }
        };

        self.send_chunked_reply(
            output,
            category::PE_GET_DATA_RESPONSE,
            request.request_id,
            header_bytes,
            &encoded,
        );
        true
    }

    fn handle_set_data(&mut self, output: &mut ResponderOutput<'_>, chunk: &PropertyChunk) {
        let source = output.incoming_header().source;
        let max_requests = self.delegate.simultaneous_requests_supported();
        let remote = self.remotes.entry(source).or_default();

        let result = match remote.responder.prime(chunk.request_id, max_requests) {
            Ok(()) => remote.responder.add_chunk(chunk),
            Err(e) => Some(Err(e)),
        };
        let Some(result) = result else {
            return;
        };

        let reply = match result {
            Ok(response) => {
                tracing::debug!("Set-data request {} from {} complete", chunk.request_id, source);
                let request = PropertyRequestData {
                    header: response.request_header(),
                    body: response.body,
                };
                self.delegate.property_set_data_requested(source, &request)
            }
            Err(ExchangeError::TooManyTransactions) => PropertyReplyHeader {
                message: "The device has initiated too many simultaneous requests".into(),
                ..PropertyReplyHeader::with_status(status::TOO_MANY_REQUESTS)
            },
            Err(ExchangeError::Partial | ExchangeError::InconsistentChunks) => PropertyReplyHeader {
                message: "Request was incomplete".into(),
                ..PropertyReplyHeader::with_status(status::BAD_REQUEST)
            },
            Err(ExchangeError::Notify) => return,
        };

        let header_bytes = match reply.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Set-data reply header cannot be encoded: {}", e);
                return;
            }
        };
        let header = Header {
            device_id: ChannelInGroup::WholeBlock,
            category: category::PE_SET_DATA_RESPONSE,
            version: IMPLEMENTATION_VERSION,
            source: output.muid(),
            destination: source,
        };
        let body = Body::PropertySetDataResponse(PropertyRequest {
            request_id: chunk.request_id,
            header: header_bytes,
        });
        let group = output.incoming_group();
        output.send_message(group, &header, &body);
    }

    fn handle_subscribe(&mut self, output: &mut ResponderOutput<'_>, chunk: &PropertyChunk) -> bool {
        if chunk.header.is_empty() || chunk.this_chunk != 1 || chunk.total_chunks != ChunkCount::Known(1) {
            return false;
        }
        let source = output.incoming_header().source;
        let Ok(header) = PropertySubscriptionHeader::from_bytes(&chunk.header) else {
            return false;
        };

        let reply = match header.command {
            Some(SubscriptionCommand::Start) => {
                if self.delegate.subscription_start_requested(source, &header) {
                    let token = self.registry.add(source, header.resource.clone());
                    let subscribe_id = token.to_subscribe_id();
                    tracing::debug!(
                        "{} subscribed to {:?} as {}",
                        source,
                        header.resource,
                        subscribe_id
                    );
                    self.delegate
                        .subscription_did_start(source, &subscribe_id, &header);

                    let mut reply = PropertyReplyHeader::default();
                    reply.extended.insert("subscribeId".into(), subscribe_id.into());
                    reply
                } else {
                    PropertyReplyHeader::with_status(status::NOT_ALLOWED)
                }
            }
            Some(SubscriptionCommand::End) => {
                let Some(token) = SubscriptionToken::from_subscribe_id(&header.subscribe_id) else {
                    return false;
                };
                let Some(resource) = self.registry.resource(source, token) else {
                    return false;
                };
                let subscription = Subscription {
                    subscribe_id: header.subscribe_id.clone(),
                    resource: resource.to_string(),
                };
                self.delegate.subscription_will_end(source, &subscription);
                self.registry.remove(source, token);
                tracing::debug!("{} ended subscription {}", source, subscription.subscribe_id);
                PropertyReplyHeader::default()
            }
            _ => return false,
        };

        match reply.to_bytes() {
            Ok(bytes) => self.send_chunked_reply(
                output,
                category::PE_SUBSCRIBE_RESPONSE,
                chunk.request_id,
                bytes,
                &[],
            ),
            Err(e) => tracing::warn!("Subscription reply header cannot be encoded: {}", e),
        }
        true
    }

    fn handle_subscribe_response(&mut self, source: Muid, chunk: &PropertyChunk) -> bool {
        let Some(remote) = self.remotes.get_mut(&source) else {
            return false;
        };
        if remote.initiator.key_for_id(chunk.request_id).is_none() {
            return false;
        }
        if let Some((pending, result)) = remote.initiator.add_chunk(chunk) {
            self.complete_update(source, pending, result);
        }
        true
    }

    fn handle_notify(&mut self, source: Muid, chunk: &PropertyChunk) -> bool {
        let Some(remote) = self.remotes.get_mut(&source) else {
            return false;
        };
        remote.responder.notify(chunk.request_id, &chunk.header);
        if let Some((pending, result)) = remote.initiator.notify(chunk.request_id, &chunk.header) {
            self.complete_update(source, pending, result);
        }
        true
    }

    fn complete_update(&mut self, device: Muid, pending: PendingUpdate, result: PropertyExchangeResult) {
        if let (Ok(_), Some(token)) = (&result, pending.ending) {
            if let Some(subscription) = self.registry.remove(device, token) {
                self.delegate.subscription_will_end(device, &subscription);
                tracing::debug!("Subscription {} of {} ended", subscription.subscribe_id, device);
            }
        }
        (pending.on_result)(&result);
    }

    fn send_chunked_reply(
        &self,
        output: &mut ResponderOutput<'_>,
        kind: u8,
        request_id: u8,
        header: Vec<u8>,
        body: &[u8],
    ) {
        let destination = output.incoming_header().source;
        let group = output.incoming_group();
        let params = ChunkParams {
            chunk_size: self.max_sysex_size_for(destination),
            kind,
            request_id,
            source: output.muid(),
            destination,
        };
        if let Err(e) = send_chunked(output, group, params, header, SliceSource::new(body)) {
            tracing::warn!("Could not send {:#04x} reply to {}: {}", kind, destination, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::PropertyChunker;
    use crate::output::CollectingOutput;
    use midi_ci_core::parser;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn local() -> Muid {
        Muid::new(0x0aaa).unwrap()
    }

    fn remote() -> Muid {
        Muid::new(0x0bbb).unwrap()
    }

    #[derive(Default)]
    struct Log {
        set_bodies: Vec<Vec<u8>>,
        started: Vec<String>,
        ended: Vec<Subscription>,
    }

    struct TestDelegate {
        log: Rc<RefCell<Log>>,
        max_requests: u8,
        accept: bool,
    }

    impl PropertyDelegate for TestDelegate {
        fn simultaneous_requests_supported(&self) -> u8 {
            self.max_requests
        }

        fn property_get_data_requested(&mut self, _: Muid, header: &PropertyRequestHeader) -> PropertyReplyData {
            PropertyReplyData {
                header: PropertyReplyHeader::default(),
                body: format!("[\"{}\"]", header.resource).into_bytes(),
            }
        }

        fn property_set_data_requested(&mut self, _: Muid, request: &PropertyRequestData) -> PropertyReplyHeader {
            self.log.borrow_mut().set_bodies.push(request.body.clone());
            PropertyReplyHeader::default()
        }

        fn subscription_start_requested(&mut self, _: Muid, _: &PropertySubscriptionHeader) -> bool {
            self.accept
        }

        fn subscription_did_start(&mut self, _: Muid, subscribe_id: &str, _: &PropertySubscriptionHeader) {
            self.log.borrow_mut().started.push(subscribe_id.to_string());
        }

        fn subscription_will_end(&mut self, _: Muid, subscription: &Subscription) {
            self.log.borrow_mut().ended.push(subscription.clone());
        }
    }

    fn host(max_requests: u8, accept: bool) -> (PropertyHost, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let delegate = TestDelegate {
            log: log.clone(),
            max_requests,
            accept,
        };
        (PropertyHost::new(FunctionBlock::default(), Box::new(delegate), 512), log)
    }

    /// Messages as the remote device would send them.
    fn incoming(kind: u8, request_id: u8, header: &[u8], body: &[u8], chunk_size: usize) -> Vec<Parsed> {
        let params = ChunkParams {
            chunk_size,
            kind,
            request_id,
            source: remote(),
            destination: local(),
        };
        PropertyChunker::new(params, header.to_vec(), SliceSource::new(body))
            .unwrap()
            .map(|bytes| parser::parse(&bytes).0.unwrap())
            .collect()
    }

    fn respond(host: &mut PropertyHost, sink: &mut CollectingOutput, parsed: &Parsed) -> bool {
        let mut out = ResponderOutput::new(sink, parsed.header, 0);
        host.try_respond(&mut out, parsed)
    }

    fn reply_status(sink: &CollectingOutput) -> Vec<i64> {
        sink.parsed()
            .into_iter()
            .filter_map(|(_, p)| match p.body {
                Some(Body::PropertySetDataResponse(r)) => Some(r.header),
                Some(Body::PropertySubscribeResponse(c)) => Some(c.header),
                _ => None,
            })
            .map(|h| PropertyReplyHeader::from_bytes(&h).unwrap().status)
            .collect()
    }

    fn subscribe(host: &mut PropertyHost, sink: &mut CollectingOutput, resource: &str) -> String {
        let header = PropertySubscriptionHeader {
            command: Some(SubscriptionCommand::Start),
            resource: resource.into(),
            ..Default::default()
        };
        let msg = &incoming(category::PE_SUBSCRIBE, 1, &header.to_bytes().unwrap(), b"", 512)[0];
        assert!(respond(host, sink, msg));
        let Some((_, parsed)) = sink.parsed().pop() else {
            panic!("no reply");
        };
        match parsed.body {
            Some(Body::PropertySubscribeResponse(c)) => {
                let reply = PropertyReplyHeader::from_bytes(&c.header).unwrap();
                reply.extended["subscribeId"].as_str().unwrap().to_string()
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_capabilities_reply() {
        let (mut host, _) = host(4, true);
        let mut sink = CollectingOutput::new(local());
        let parsed = Parsed {
            header: Header {
                device_id: ChannelInGroup::WholeBlock,
                category: category::PE_CAPABILITIES,
                version: IMPLEMENTATION_VERSION,
                source: remote(),
                destination: local(),
            },
            body: Some(Body::PropertyCapabilities(PropertyCapabilities {
                simultaneous_requests: 8,
                major_version: 0,
                minor_version: 0,
            })),
        };
        assert!(respond(&mut host, &mut sink, &parsed));
        assert_eq!(
            sink.parsed()[0].1.body,
            Some(Body::PropertyCapabilitiesResponse(PropertyCapabilities {
                simultaneous_requests: 4,
                major_version: 0,
                minor_version: 0,
            }))
        );
    }

    #[test]
    fn test_get_data_reply() {
        let (mut host, _) = host(4, true);
        let mut sink = CollectingOutput::new(local());
        let request = PropertyRequestHeader {
            resource: "DeviceInfo".into(),
            ..Default::default()
        };
        let parsed = Parsed {
            header: Header {
                device_id: ChannelInGroup::WholeBlock,
                category: category::PE_GET_DATA,
                version: IMPLEMENTATION_VERSION,
                source: remote(),
                destination: local(),
            },
            body: Some(Body::PropertyGetData(PropertyRequest {
                request_id: 9,
                header: request.to_bytes().unwrap(),
            })),
        };
        assert!(respond(&mut host, &mut sink, &parsed));

        let sent = sink.parsed();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.header.destination, remote());
        match &sent[0].1.body {
            Some(Body::PropertyGetDataResponse(chunk)) => {
                assert_eq!(chunk.request_id, 9);
                assert!(chunk.is_last());
                assert_eq!(chunk.data, b"[\"DeviceInfo\"]");
                assert_eq!(PropertyReplyHeader::from_bytes(&chunk.header).unwrap().status, 200);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_set_data_reassembled() {
        let (mut host, log) = host(4, true);
        let mut sink = CollectingOutput::new(local());
        let body: Vec<u8> = (0..100u8).collect();
        let header = br#"{"resource":"X"}"#;
        let messages = incoming(category::PE_SET_DATA, 2, header, &body, 64);
        assert!(messages.len() > 2);

        for msg in &messages[..messages.len() - 1] {
            assert!(respond(&mut host, &mut sink, msg));
            assert_eq!(host.count_ongoing_transactions(), 1);
        }
        assert!(sink.sent.is_empty());
        respond(&mut host, &mut sink, &messages[messages.len() - 1]);

        assert_eq!(host.count_ongoing_transactions(), 0);
        assert_eq!(log.borrow().set_bodies, [body]);
        assert_eq!(reply_status(&sink), [200]);
        assert_eq!(sink.parsed()[0].1.header.device_id, ChannelInGroup::WholeBlock);
    }

    #[test]
    fn test_set_data_over_limit_replies_343() {
        let (mut host, log) = host(1, true);
        let mut sink = CollectingOutput::new(local());
        let body = vec![0x11; 100];
        let first = incoming(category::PE_SET_DATA, 0, b"{}", &body, 64);
        let second = incoming(category::PE_SET_DATA, 1, b"{}", &body, 64);

        respond(&mut host, &mut sink, &first[0]);
        respond(&mut host, &mut sink, &second[0]);

        assert_eq!(reply_status(&sink), [status::TOO_MANY_REQUESTS]);
        assert_eq!(host.count_ongoing_transactions(), 1);
        assert!(log.borrow().set_bodies.is_empty());
    }

    #[test]
    fn test_set_data_out_of_order_replies_400() {
        let (mut host, _) = host(4, true);
        let mut sink = CollectingOutput::new(local());
        let messages = incoming(category::PE_SET_DATA, 0, b"{}", &[0x22; 200], 64);
        assert!(messages.len() >= 3);

        respond(&mut host, &mut sink, &messages[0]);
        respond(&mut host, &mut sink, &messages[2]);
        assert_eq!(reply_status(&sink), [status::BAD_REQUEST]);
        assert_eq!(host.count_ongoing_transactions(), 0);
    }

    #[test]
    fn test_subscription_start_and_end() {
        let (mut host, log) = host(4, true);
        let mut sink = CollectingOutput::new(local());

        assert_eq!(subscribe(&mut host, &mut sink, "ProgramList"), "0");
        assert_eq!(subscribe(&mut host, &mut sink, "ChannelList"), "1");
        assert_eq!(log.borrow().started, ["0", "1"]);
        assert_eq!(host.find_subscriptions_for_device(remote()).len(), 2);

        let end = PropertySubscriptionHeader {
            command: Some(SubscriptionCommand::End),
            subscribe_id: "0".into(),
            ..Default::default()
        };
        sink.take();
        let msg = &incoming(category::PE_SUBSCRIBE, 2, &end.to_bytes().unwrap(), b"", 512)[0];
        assert!(respond(&mut host, &mut sink, msg));
        assert_eq!(reply_status(&sink), [200]);
        assert_eq!(log.borrow().ended[0].resource, "ProgramList");

        let remaining = host.find_subscriptions_for_device(remote());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.iter().next().unwrap().resource, "ChannelList");

        // Ending it again is not handled
        sink.take();
        assert!(!respond(&mut host, &mut sink, msg));
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn test_refused_subscription_replies_405() {
        let (mut host, log) = host(4, false);
        let mut sink = CollectingOutput::new(local());
        let header = PropertySubscriptionHeader {
            command: Some(SubscriptionCommand::Start),
            resource: "X".into(),
            ..Default::default()
        };
        let msg = &incoming(category::PE_SUBSCRIBE, 1, &header.to_bytes().unwrap(), b"", 512)[0];
        assert!(respond(&mut host, &mut sink, msg));
        assert_eq!(reply_status(&sink), [status::NOT_ALLOWED]);
        assert!(log.borrow().started.is_empty());
        assert!(host.find_subscriptions_for_device(remote()).is_empty());
    }

    #[test]
    fn test_update_validation() {
        let (mut host, _) = host(4, true);
        let mut sink = CollectingOutput::new(local());
        let mut header = PropertySubscriptionHeader {
            command: Some(SubscriptionCommand::Full),
            resource: "X".into(),
            subscribe_id: "0".into(),
            ..Default::default()
        };

        let err = host
            .send_subscription_update(&mut sink, remote(), &header, b"", |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDevice(_)));

        subscribe(&mut host, &mut sink, "X");
        sink.take();

        header.subscribe_id = "7".into();
        let err = host
            .send_subscription_update(&mut sink, remote(), &header, b"", |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSubscription(_)));

        header.subscribe_id = "0".into();
        header.resource = "Y".into();
        let err = host
            .send_subscription_update(&mut sink, remote(), &header, b"", |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::ResourceMismatch));

        header.resource = "X".into();
        header.command = Some(SubscriptionCommand::Start);
        let err = host
            .send_subscription_update(&mut sink, remote(), &header, b"", |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::CannotStartSubscription));

        header.command = Some(SubscriptionCommand::Full);
        let err = host
            .send_subscription_update(&mut sink, remote(), &header, &[0x80], |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn test_abort_drops_callback() {
        let (mut host, _) = host(4, true);
        let mut sink = CollectingOutput::new(local());
        subscribe(&mut host, &mut sink, "X");
        sink.take();

        let called = Rc::new(RefCell::new(false));
        let flag = called.clone();
        let key = host
            .terminate_subscription(&mut sink, remote(), "0")
            .unwrap();
        assert_eq!(host.ongoing_requests(), [key]);

        let key2 = {
            let header = PropertySubscriptionHeader {
                command: Some(SubscriptionCommand::Notify),
                resource: "X".into(),
                subscribe_id: "0".into(),
                ..Default::default()
            };
            host.send_subscription_update(&mut sink, remote(), &header, b"", move |_| {
                *flag.borrow_mut() = true;
            })
            .unwrap()
        };
        assert!(host.abort_request(key2));
        assert!(!host.abort_request(key2));
        assert!(!*called.borrow());
        assert_eq!(host.ongoing_requests(), [key]);
    }
}
