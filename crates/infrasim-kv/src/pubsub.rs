//! Pub/sub registries and subscriber mailboxes.
//!
//! Delivery is synchronous: `publish` pushes the message into the mailbox
//! of every reached client before returning. Mailboxes are bounded; the
//! oldest message is dropped when a slow subscriber falls behind.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use infrasim_core::GlobPattern;
use serde::{Deserialize, Serialize};

/// A message delivered to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSubMessage {
    /// The pattern that matched, for pattern deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub channel: String,
    pub payload: String,
    pub published_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel: String,
    pub subscribers: usize,
    /// Messages published to this channel since the engine started.
    pub messages: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternInfo {
    pub pattern: String,
    pub subscribers: usize,
}

/// Snapshot of the pub/sub registries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSubInfo {
    pub channels: Vec<ChannelInfo>,
    pub patterns: Vec<PatternInfo>,
}

struct PatternSubscription {
    glob: GlobPattern,
    clients: BTreeSet<u64>,
}

/// Channel and pattern registries keyed by client id.
pub struct PubSub {
    channels: BTreeMap<String, BTreeSet<u64>>,
    patterns: BTreeMap<String, PatternSubscription>,
    published: HashMap<String, u64>,
    mailboxes: HashMap<u64, VecDeque<PubSubMessage>>,
    mailbox_capacity: usize,
}

impl PubSub {
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            channels: BTreeMap::new(),
            patterns: BTreeMap::new(),
            published: HashMap::new(),
            mailboxes: HashMap::new(),
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    pub fn set_mailbox_capacity(&mut self, capacity: usize) {
        self.mailbox_capacity = capacity.max(1);
    }

    /// Subscribe `client` to `channel`. Returns the client's total
    /// subscription count afterwards.
    pub fn subscribe(&mut self, client: u64, channel: &str) -> usize {
        self.channels.entry(channel.to_string()).or_default().insert(client);
        self.subscription_count(client)
    }

    /// Remove one channel subscription. Returns the remaining count.
    pub fn unsubscribe(&mut self, client: u64, channel: &str) -> usize {
        if let Some(clients) = self.channels.get_mut(channel) {
            clients.remove(&client);
            if clients.is_empty() {
                self.channels.remove(channel);
            }
        }
        self.subscription_count(client)
    }

    pub fn psubscribe(&mut self, client: u64, pattern: &str) -> usize {
        self.patterns
            .entry(pattern.to_string())
            .or_insert_with(|| PatternSubscription {
                glob: GlobPattern::new(pattern),
                clients: BTreeSet::new(),
            })
            .clients
            .insert(client);
        self.subscription_count(client)
    }

    pub fn punsubscribe(&mut self, client: u64, pattern: &str) -> usize {
        if let Some(sub) = self.patterns.get_mut(pattern) {
            sub.clients.remove(&client);
            if sub.clients.is_empty() {
                self.patterns.remove(pattern);
            }
        }
        self.subscription_count(client)
    }

    /// Channels `client` is subscribed to, sorted.
    pub fn channels_of(&self, client: u64) -> Vec<String> {
        self.channels
            .iter()
            .filter(|(_, c)| c.contains(&client))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Patterns `client` is subscribed to, sorted.
    pub fn patterns_of(&self, client: u64) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|(_, s)| s.clients.contains(&client))
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn subscription_count(&self, client: u64) -> usize {
        let exact = self.channels.values().filter(|c| c.contains(&client)).count();
        let pattern = self
            .patterns
            .values()
            .filter(|s| s.clients.contains(&client))
            .count();
        exact + pattern
    }

    /// Deliver `payload` to every exact and pattern subscriber.
    ///
    /// Returns the number of deliveries: exact subscribers of `channel`
    /// plus pattern subscribers whose pattern matches it. A client reached
    /// through two subscriptions counts twice, and receives two messages.
    pub fn publish(&mut self, channel: &str, payload: &str, now_ms: u64) -> usize {
        *self.published.entry(channel.to_string()).or_insert(0) += 1;

        let mut deliveries: Vec<(u64, PubSubMessage)> = Vec::new();
        if let Some(clients) = self.channels.get(channel) {
            for &client in clients {
                deliveries.push((
                    client,
                    PubSubMessage {
                        pattern: None,
                        channel: channel.to_string(),
                        payload: payload.to_string(),
                        published_at_ms: now_ms,
                    },
                ));
            }
        }
        for (pattern, sub) in &self.patterns {
            if !sub.glob.matches(channel) {
                continue;
            }
            for &client in &sub.clients {
                deliveries.push((
                    client,
                    PubSubMessage {
                        pattern: Some(pattern.clone()),
                        channel: channel.to_string(),
                        payload: payload.to_string(),
                        published_at_ms: now_ms,
                    },
                ));
            }
        }

        let reached = deliveries.len();
        for (client, message) in deliveries {
            let mailbox = self.mailboxes.entry(client).or_default();
            if mailbox.len() == self.mailbox_capacity {
                mailbox.pop_front();
            }
            mailbox.push_back(message);
        }
        reached
    }

    /// Drain a client's mailbox, oldest first.
    pub fn take_messages(&mut self, client: u64) -> Vec<PubSubMessage> {
        self.mailboxes
            .remove(&client)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Active channels, optionally filtered by a glob pattern
    /// (`PUBSUB CHANNELS [pattern]`).
    pub fn active_channels(&self, pattern: Option<&str>) -> Vec<String> {
        let glob = pattern.map(GlobPattern::new);
        self.channels
            .keys()
            .filter(|c| glob.as_ref().is_none_or(|g| g.matches(c)))
            .cloned()
            .collect()
    }

    /// Exact subscriber count for one channel.
    pub fn num_subscribers(&self, channel: &str) -> usize {
        self.channels.get(channel).map(BTreeSet::len).unwrap_or(0)
    }

    /// Number of distinct active patterns.
    pub fn num_patterns(&self) -> usize {
        self.patterns.len()
    }

    pub fn info(&self) -> PubSubInfo {
        PubSubInfo {
            channels: self
                .channels
                .iter()
                .map(|(name, clients)| ChannelInfo {
                    channel: name.clone(),
                    subscribers: clients.len(),
                    messages: self.published.get(name).copied().unwrap_or(0),
                })
                .collect(),
            patterns: self
                .patterns
                .iter()
                .map(|(pattern, sub)| PatternInfo {
                    pattern: pattern.clone(),
                    subscribers: sub.clients.len(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Subscribe ────────────────────────────────────────────────────

    #[test]
    fn subscription_counts_are_per_client() {
        let mut ps = PubSub::new(16);
        assert_eq!(ps.subscribe(1, "news"), 1);
        assert_eq!(ps.subscribe(1, "sports"), 2);
        assert_eq!(ps.psubscribe(1, "news.*"), 3);
        assert_eq!(ps.subscribe(2, "news"), 1);
        assert_eq!(ps.num_subscribers("news"), 2);
    }

    #[test]
    fn unsubscribe_drops_empty_channels() {
        let mut ps = PubSub::new(16);
        ps.subscribe(1, "news");
        assert_eq!(ps.unsubscribe(1, "news"), 0);
        assert!(ps.info().channels.is_empty());
    }

    #[test]
    fn registries_persist_until_unsubscribed() {
        let mut ps = PubSub::new(16);
        ps.psubscribe(1, "log.*");
        ps.publish("log.a", "x", 0);
        ps.take_messages(1);
        assert_eq!(ps.num_patterns(), 1);
        ps.punsubscribe(1, "log.*");
        assert_eq!(ps.num_patterns(), 0);
    }

    // ── Publish ──────────────────────────────────────────────────────

    #[test]
    fn publish_counts_exact_plus_pattern() {
        let mut ps = PubSub::new(16);
        ps.subscribe(1, "news.tech");
        ps.subscribe(2, "news.tech");
        ps.psubscribe(3, "news.*");
        ps.psubscribe(4, "sports.*");
        assert_eq!(ps.publish("news.tech", "hello", 0), 3);
        assert_eq!(ps.publish("nobody", "hello", 0), 0);
    }

    #[test]
    fn messages_land_in_mailboxes() {
        let mut ps = PubSub::new(16);
        ps.subscribe(1, "a");
        ps.psubscribe(1, "*");
        ps.publish("a", "one", 5);

        let msgs = ps.take_messages(1);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].pattern, None);
        assert_eq!(msgs[1].pattern.as_deref(), Some("*"));
        assert_eq!(msgs[1].published_at_ms, 5);
        assert!(ps.take_messages(1).is_empty());
    }

    #[test]
    fn mailbox_drops_oldest_when_full() {
        let mut ps = PubSub::new(2);
        ps.subscribe(1, "a");
        for i in 0..3 {
            ps.publish("a", &i.to_string(), 0);
        }
        let payloads: Vec<String> = ps.take_messages(1).into_iter().map(|m| m.payload).collect();
        assert_eq!(payloads, vec!["1", "2"]);
    }

    #[test]
    fn info_reports_message_counts() {
        let mut ps = PubSub::new(16);
        ps.subscribe(1, "a");
        ps.publish("a", "x", 0);
        ps.publish("a", "y", 0);
        let info = ps.info();
        assert_eq!(info.channels[0].messages, 2);
        assert_eq!(info.channels[0].subscribers, 1);
    }

    #[test]
    fn active_channels_filter() {
        let mut ps = PubSub::new(16);
        ps.subscribe(1, "news.a");
        ps.subscribe(1, "sports.b");
        assert_eq!(ps.active_channels(Some("news.*")), vec!["news.a"]);
        assert_eq!(ps.active_channels(None).len(), 2);
    }
}
