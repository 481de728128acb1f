//! Subscription trie resolving published topics to subscriber sets.
//!
//! Nodes live in an arena (`Vec<Node>` plus a free list) and are keyed by
//! topic element; wildcards are stored under their literal `*`, `>` and `+`
//! keys. Branches left without subscribers or children are pruned on
//! unsubscribe.

use bytestring::ByteString;

use crate::topic::{Topic, TopicError};
use crate::types::{ClientId, HashMap, HashSet};

type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error(transparent)]
    InvalidTopic(#[from] TopicError),
    #[error("already subscribed to `{0}`")]
    AlreadySubscribed(String),
    #[error("connection is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Node {
    parent: Option<(NodeId, ByteString)>,
    children: HashMap<ByteString, NodeId>,
    subscribers: HashSet<ClientId>,
}

impl Node {
    #[inline]
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.subscribers.is_empty()
    }
}

#[derive(Debug)]
pub struct Distributor {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    topics: usize,
    routes: usize,
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new()
    }
}

impl Distributor {
    pub fn new() -> Self {
        Distributor { nodes: vec![Node::default()], free: Vec::new(), topics: 0, routes: 0 }
    }

    /// Adds `client` to the node for `topic`, creating the path as needed.
    pub fn subscribe(&mut self, client: ClientId, topic: &str) -> Result<Topic, SubscribeError> {
        let parsed = Topic::parse_subscription(topic)?;
        let mut id = ROOT;
        for level in parsed.levels() {
            id = match self.nodes[id].children.get(level.as_str()) {
                Some(child) => *child,
                None => {
                    let key = ByteString::from(level.as_str());
                    let child = self.alloc(id, key.clone());
                    self.nodes[id].children.insert(key, child);
                    child
                }
            };
        }

        let subscribers = &mut self.nodes[id].subscribers;
        if !subscribers.insert(client) {
            return Err(SubscribeError::AlreadySubscribed(topic.to_owned()));
        }
        if subscribers.len() == 1 {
            self.topics += 1;
        }
        self.routes += 1;
        Ok(parsed)
    }

    /// Removes `client` from the node for `topic` and prunes emptied branches.
    ///
    /// Returns `false` if the client was not subscribed.
    pub fn unsubscribe(&mut self, client: ClientId, topic: &str) -> Result<bool, SubscribeError> {
        let parsed = Topic::parse_subscription(topic)?;
        let id = match self.find(&parsed) {
            Some(id) if self.nodes[id].subscribers.contains(&client) => id,
            _ => {
                log::warn!("unsubscribe, client {} has no subscription to {}", client, topic);
                return Ok(false);
            }
        };
        let subscribers = &mut self.nodes[id].subscribers;
        subscribers.remove(&client);
        if subscribers.is_empty() {
            self.topics -= 1;
        }
        self.routes -= 1;
        self.prune(id);
        Ok(true)
    }

    /// Every subscriber whose pattern selects the published `topic`.
    pub fn publish(&self, topic: &str) -> Result<HashSet<ClientId>, TopicError> {
        let elements = Topic::split(topic);
        Topic::validate(&elements, false)?;
        let mut out = HashSet::default();
        self.collect(ROOT, &elements, &mut out);
        Ok(out)
    }

    fn collect(&self, id: NodeId, elements: &[&str], out: &mut HashSet<ClientId>) {
        let node = &self.nodes[id];
        let (element, rest) = match elements.split_first() {
            Some(split) => split,
            None => {
                out.extend(node.subscribers.iter().copied());
                return;
            }
        };

        for key in [*element, "*"] {
            if let Some(&child) = node.children.get(key) {
                // `X.+` also selects the bare prefix `X`
                if rest.is_empty() {
                    if let Some(&plus) = self.nodes[child].children.get("+") {
                        out.extend(self.nodes[plus].subscribers.iter().copied());
                    }
                }
                self.collect(child, rest, out);
            }
        }

        if let Some(&gt) = node.children.get(">") {
            out.extend(self.nodes[gt].subscribers.iter().copied());
        }
    }

    fn find(&self, topic: &Topic) -> Option<NodeId> {
        let mut id = ROOT;
        for level in topic.levels() {
            id = *self.nodes[id].children.get(level.as_str())?;
        }
        Some(id)
    }

    fn alloc(&mut self, parent: NodeId, key: ByteString) -> NodeId {
        let node = Node { parent: Some((parent, key)), ..Default::default() };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn prune(&mut self, mut id: NodeId) {
        while id != ROOT && self.nodes[id].is_empty() {
            let parent = self.nodes[id].parent.take();
            self.nodes[id] = Node::default();
            self.free.push(id);
            match parent {
                Some((parent, key)) => {
                    self.nodes[parent].children.remove(&key);
                    id = parent;
                }
                None => break,
            }
        }
    }

    /// Number of distinct patterns with at least one subscriber.
    #[inline]
    pub fn topics(&self) -> usize {
        self.topics
    }

    /// Number of (client, pattern) subscriptions.
    #[inline]
    pub fn routes(&self) -> usize {
        self.routes
    }

    /// Live trie nodes, the root included.
    #[inline]
    pub fn nodes(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Subscribed patterns, sorted, at most `limit` of them.
    pub fn list_topics(&self, limit: usize) -> Vec<String> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        self.walk(ROOT, &mut path, &mut out, limit);
        out.sort();
        out
    }

    fn walk<'a>(&'a self, id: NodeId, path: &mut Vec<&'a str>, out: &mut Vec<String>, limit: usize) {
        if out.len() >= limit {
            return;
        }
        let node = &self.nodes[id];
        if !node.subscribers.is_empty() {
            out.push(path.join("."));
        }
        for (key, child) in node.children.iter() {
            path.push(key);
            self.walk(*child, path, out, limit);
            path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(d: &Distributor, topic: &str) -> Vec<ClientId> {
        let mut v: Vec<_> = d.publish(topic).unwrap().into_iter().collect();
        v.sort();
        v
    }

    #[test]
    fn test_literal_and_single_wildcard() {
        let mut d = Distributor::new();
        d.subscribe(1, "A.*.C").unwrap();
        d.subscribe(2, "A.B.C").unwrap();
        assert_eq!(hits(&d, "A.B.C"), vec![1, 2]);
        assert_eq!(hits(&d, "A.X.C"), vec![1]);
        assert!(hits(&d, "A.B.B.C").is_empty());
        assert!(hits(&d, "A.C").is_empty());
    }

    #[test]
    fn test_multi_wildcard() {
        let mut d = Distributor::new();
        d.subscribe(1, "A.>").unwrap();
        assert_eq!(hits(&d, "A.B"), vec![1]);
        assert_eq!(hits(&d, "A.B.C"), vec![1]);
        assert!(hits(&d, "A").is_empty());

        d.subscribe(2, ">").unwrap();
        assert_eq!(hits(&d, "Z"), vec![2]);
        assert_eq!(hits(&d, "A.Q"), vec![1, 2]);
    }

    #[test]
    fn test_prefix_wildcard() {
        let mut d = Distributor::new();
        d.subscribe(1, "A.+").unwrap();
        d.subscribe(2, "A.*.+").unwrap();
        assert_eq!(hits(&d, "A"), vec![1]);
        assert_eq!(hits(&d, "A.B"), vec![2]);
        assert!(hits(&d, "A.B.C").is_empty());
    }

    #[test]
    fn test_fan_out_is_a_set() {
        let mut d = Distributor::new();
        d.subscribe(7, "A.*").unwrap();
        d.subscribe(7, "A.B").unwrap();
        d.subscribe(7, "A.>").unwrap();
        assert_eq!(hits(&d, "A.B"), vec![7]);
        assert_eq!(d.routes(), 3);
        assert_eq!(d.topics(), 3);
    }

    #[test]
    fn test_duplicate_subscription() {
        let mut d = Distributor::new();
        d.subscribe(1, "A.B").unwrap();
        assert_eq!(d.subscribe(1, "A.B"), Err(SubscribeError::AlreadySubscribed("A.B".into())));
        d.subscribe(2, "A.B").unwrap();
        assert_eq!(d.topics(), 1);
        assert_eq!(d.routes(), 2);
    }

    #[test]
    fn test_invalid_topics() {
        let mut d = Distributor::new();
        assert!(matches!(d.subscribe(1, "A.>.B"), Err(SubscribeError::InvalidTopic(_))));
        assert!(matches!(d.subscribe(1, "A..B"), Err(SubscribeError::InvalidTopic(_))));
        assert!(d.publish("A.*").is_err());
        assert_eq!(d.nodes(), 1);
    }

    #[test]
    fn test_unsubscribe_prunes() {
        let mut d = Distributor::new();
        d.subscribe(1, "A.B.C").unwrap();
        d.subscribe(2, "A.B").unwrap();
        assert_eq!(d.nodes(), 4);

        assert!(d.unsubscribe(1, "A.B.C").unwrap());
        assert_eq!(d.nodes(), 3);
        assert!(hits(&d, "A.B.C").is_empty());
        assert_eq!(hits(&d, "A.B"), vec![2]);

        assert!(d.unsubscribe(2, "A.B").unwrap());
        assert_eq!(d.nodes(), 1);
        assert_eq!(d.topics(), 0);
        assert_eq!(d.routes(), 0);

        // freed nodes are reused
        d.subscribe(3, "X.Y").unwrap();
        assert_eq!(d.nodes(), 3);
        assert_eq!(hits(&d, "X.Y"), vec![3]);
    }

    #[test]
    fn test_unsubscribe_absent_is_not_an_error() {
        let mut d = Distributor::new();
        d.subscribe(1, "A.B").unwrap();
        assert!(!d.unsubscribe(2, "A.B").unwrap());
        assert!(!d.unsubscribe(1, "A.C").unwrap());
        assert_eq!(hits(&d, "A.B"), vec![1]);
    }

    #[test]
    fn test_list_topics() {
        let mut d = Distributor::new();
        for t in ["A.B", "A.*", "C.>", "A.B.+"] {
            d.subscribe(1, t).unwrap();
        }
        assert_eq!(d.list_topics(10), vec!["A.*", "A.B", "A.B.+", "C.>"]);
        assert_eq!(d.list_topics(2).len(), 2);
    }

    #[test]
    fn test_agrees_with_topic_matching() {
        let patterns = ["A", "A.B", "A.*", "*.B", "A.>", ">", "A.+", "A.B.+", "*.*.C", "A.*.+", "*.>"];
        let topics = ["A", "B", "A.B", "A.C", "B.B", "A.B.C", "X.Y.C", "A.B.C.D"];

        let mut d = Distributor::new();
        for (id, p) in patterns.iter().enumerate() {
            d.subscribe(id as ClientId, p).unwrap();
        }
        for t in topics {
            let expected: Vec<ClientId> = patterns
                .iter()
                .enumerate()
                .filter(|(_, p)| p.parse::<Topic>().unwrap().matches_str(t))
                .map(|(id, _)| id as ClientId)
                .collect();
            assert_eq!(hits(&d, t), expected, "topic {}", t);
        }
    }
}
