//! Subscriptions that remote devices hold on local properties.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use midi_ci_core::Muid;

/// Identifies a transaction this device started with a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    pub muid: Muid,
    pub key: u64,
}

impl RequestKey {
    pub fn new(muid: Muid, key: u64) -> Self {
        Self { muid, key }
    }
}

/// Numeric form of a subscribe id, unique per remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubscriptionToken(pub u64);

impl SubscriptionToken {
    /// Parses the decimal `subscribeId` string used on the wire.
    pub fn from_subscribe_id(id: &str) -> Option<Self> {
        id.parse().ok().map(Self)
    }

    pub fn to_subscribe_id(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An active subscription: its id and the resource it watches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subscription {
    pub subscribe_id: String,
    pub resource: String,
}

/// Subscribed resources per remote device.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    devices: BTreeMap<Muid, BTreeMap<SubscriptionToken, String>>,
}

impl SubscriptionRegistry {
    /// Smallest token not in use for `device`.
    pub fn find_unused_token(&self, device: Muid) -> SubscriptionToken {
        let Some(used) = self.devices.get(&device) else {
            return SubscriptionToken(0);
        };
        let mut candidate = 0;
        for token in used.keys() {
            if token.0 != candidate {
                break;
            }
            candidate += 1;
        }
        SubscriptionToken(candidate)
    }

    /// Registers a subscription under the first free token.
    pub fn add(&mut self, device: Muid, resource: impl Into<String>) -> SubscriptionToken {
        let token = self.find_unused_token(device);
        self.devices
            .entry(device)
            .or_default()
            .insert(token, resource.into());
        token
    }

    pub fn resource(&self, device: Muid, token: SubscriptionToken) -> Option<&str> {
        self.devices.get(&device)?.get(&token).map(String::as_str)
    }

    pub fn contains_device(&self, device: Muid) -> bool {
        self.devices.get(&device).is_some_and(|subs| !subs.is_empty())
    }

    /// Removes a subscription, returning what it was.
    pub fn remove(&mut self, device: Muid, token: SubscriptionToken) -> Option<Subscription> {
        let subs = self.devices.get_mut(&device)?;
        let resource = subs.remove(&token)?;
        if subs.is_empty() {
            self.devices.remove(&device);
        }
        Some(Subscription {
            subscribe_id: token.to_subscribe_id(),
            resource,
        })
    }

    pub fn forget_device(&mut self, device: Muid) {
        self.devices.remove(&device);
    }

    pub fn subscriptions_for(&self, device: Muid) -> BTreeSet<Subscription> {
        self.devices
            .get(&device)
            .into_iter()
            .flatten()
            .map(|(token, resource)| Subscription {
                subscribe_id: token.to_subscribe_id(),
                resource: resource.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Muid {
        Muid::new(0x1234).unwrap()
    }

    #[test]
    fn test_first_unused_token_is_reused() {
        let mut registry = SubscriptionRegistry::default();
        assert_eq!(registry.add(device(), "A"), SubscriptionToken(0));
        assert_eq!(registry.add(device(), "B"), SubscriptionToken(1));
        assert_eq!(registry.add(device(), "C"), SubscriptionToken(2));

        registry.remove(device(), SubscriptionToken(1)).unwrap();
        assert_eq!(registry.add(device(), "D"), SubscriptionToken(1));
        assert_eq!(registry.add(device(), "E"), SubscriptionToken(3));
    }

    #[test]
    fn test_tokens_are_per_device() {
        let mut registry = SubscriptionRegistry::default();
        let other = Muid::new(0x99).unwrap();
        registry.add(device(), "A");
        assert_eq!(registry.add(other, "A"), SubscriptionToken(0));
    }

    #[test]
    fn test_subscriptions_for_device() {
        let mut registry = SubscriptionRegistry::default();
        registry.add(device(), "ProgramList");
        registry.add(device(), "ChannelList");

        let subs = registry.subscriptions_for(device());
        let ids: Vec<_> = subs.iter().map(|s| (s.subscribe_id.as_str(), s.resource.as_str())).collect();
        assert_eq!(ids, [("0", "ProgramList"), ("1", "ChannelList")]);

        assert!(registry.subscriptions_for(Muid::new(1).unwrap()).is_empty());
    }

    #[test]
    fn test_remove_last_forgets_device() {
        let mut registry = SubscriptionRegistry::default();
        let token = registry.add(device(), "A");
        assert!(registry.contains_device(device()));

        let removed = registry.remove(device(), token).unwrap();
        assert_eq!(removed.resource, "A");
        assert!(!registry.contains_device(device()));
        assert!(registry.remove(device(), token).is_none());
    }

    #[test]
    fn test_subscribe_id_parsing() {
        assert_eq!(SubscriptionToken::from_subscribe_id("12"), Some(SubscriptionToken(12)));
        assert_eq!(SubscriptionToken::from_subscribe_id("sub-1"), None);
        assert_eq!(SubscriptionToken(7).to_subscribe_id(), "7");
    }
}
