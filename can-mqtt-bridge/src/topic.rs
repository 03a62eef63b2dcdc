//! Topic mapping between cataloged messages and MQTT topics
//!
//! A mapper joins a fixed prefix with one trailing level naming the message,
//! either by symbolic name or by hexadecimal identifier. Mapping is stateless
//! and deterministic, and `from_topic(to_topic(m))` yields `m`'s identity for
//! every cataloged message.

use crate::config::NamingConvention;
use crate::signals::{MessageDefinition, SignalCatalog};
use crate::types::{BridgeError, MessageRef, Result};

/// Maps message identities to topics under one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMapper {
    /// Topic prefix without trailing separator (may be empty)
    prefix: String,
    /// Naming convention for the trailing level
    naming: NamingConvention,
}

impl TopicMapper {
    /// Create a mapper; trailing `/` on the prefix is ignored
    pub fn new(prefix: impl Into<String>, naming: NamingConvention) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            naming,
        }
    }

    /// Topic for a cataloged message
    pub fn to_topic(&self, message: &MessageDefinition) -> String {
        let level = match self.naming {
            NamingConvention::ByName => message.name.clone(),
            NamingConvention::ById => format!("0x{:X}", message.id),
        };
        self.join(&level)
    }

    /// Identity of the cataloged message a topic refers to
    pub fn from_topic(&self, topic: &str, catalog: &SignalCatalog) -> Result<MessageRef> {
        self.resolve(topic, catalog)
            .map(|message| message.identity(self.naming == NamingConvention::ById))
    }

    /// Definition of the cataloged message a topic refers to
    pub fn resolve<'c>(&self, topic: &str, catalog: &'c SignalCatalog) -> Result<&'c MessageDefinition> {
        let reference = self.parse(topic)?;
        catalog
            .lookup(&reference)
            .ok_or_else(|| BridgeError::UnrecognizedTopic(topic.to_string()))
    }

    /// Topic filter matching every topic this mapper can produce
    pub fn subscription_filter(&self) -> String {
        self.join("+")
    }

    /// True if a broker would deliver `topic` to `subscription_filter()`
    pub fn filter_matches(&self, topic: &str) -> bool {
        let level = if self.prefix.is_empty() {
            Some(topic).filter(|t| !t.starts_with('$'))
        } else {
            topic
                .strip_prefix(self.prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
        };
        level.is_some_and(|level| !level.contains('/'))
    }

    /// Split a topic into the message reference it names, without catalog lookup
    fn parse(&self, topic: &str) -> Result<MessageRef> {
        let unrecognized = || BridgeError::UnrecognizedTopic(topic.to_string());

        let level = if self.prefix.is_empty() {
            topic
        } else {
            topic
                .strip_prefix(self.prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .ok_or_else(unrecognized)?
        };

        if level.is_empty() || level.contains('/') {
            return Err(unrecognized());
        }

        match self.naming {
            NamingConvention::ByName => Ok(MessageRef::Name(level.to_string())),
            NamingConvention::ById => parse_can_id(level)
                .map(MessageRef::Id)
                .ok_or_else(unrecognized),
        }
    }

    fn join(&self, level: &str) -> String {
        if self.prefix.is_empty() {
            level.to_string()
        } else {
            format!("{}/{}", self.prefix, level)
        }
    }
}

/// Parse `0x`-prefixed hexadecimal or plain decimal identifiers
fn parse_can_id(level: &str) -> Option<u32> {
    match level
        .strip_prefix("0x")
        .or_else(|| level.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => level.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalDefinition;

    fn catalog() -> SignalCatalog {
        SignalCatalog::new(vec![
            MessageDefinition::new(0x100, "EngineStatus", 8)
                .with_signal(SignalDefinition::new("RPM", 0, 16)),
            MessageDefinition::new(0x1ABCDEF, "BodyControl", 8).extended(),
        ])
        .unwrap()
    }

    #[test]
    fn test_to_topic_by_name() {
        let catalog = catalog();
        let mapper = TopicMapper::new("can/received/", NamingConvention::ByName);
        let msg = catalog.lookup_by_id(0x100).unwrap();
        assert_eq!(mapper.to_topic(msg), "can/received/EngineStatus");
        assert_eq!(mapper.subscription_filter(), "can/received/+");
    }

    #[test]
    fn test_to_topic_by_id() {
        let catalog = catalog();
        let mapper = TopicMapper::new("bus", NamingConvention::ById);
        let msg = catalog.lookup_by_name("BodyControl").unwrap();
        assert_eq!(mapper.to_topic(msg), "bus/0x1ABCDEF");
    }

    #[test]
    fn test_round_trip_is_identity() {
        let catalog = catalog();
        for naming in [NamingConvention::ByName, NamingConvention::ById] {
            for prefix in ["can/send", ""] {
                let mapper = TopicMapper::new(prefix, naming);
                for msg in catalog.messages() {
                    let topic = mapper.to_topic(msg);
                    let identity = mapper.from_topic(&topic, &catalog).unwrap();
                    assert_eq!(identity, msg.identity(naming == NamingConvention::ById));
                }
            }
        }
    }

    #[test]
    fn test_decimal_ids_accepted() {
        let catalog = catalog();
        let mapper = TopicMapper::new("bus", NamingConvention::ById);
        assert_eq!(
            mapper.from_topic("bus/256", &catalog).unwrap(),
            MessageRef::Id(0x100)
        );
    }

    #[test]
    fn test_unrecognized_topics() {
        let catalog = catalog();
        let mapper = TopicMapper::new("can/send", NamingConvention::ByName);

        for topic in [
            "other/EngineStatus",
            "can/send",
            "can/send/",
            "can/sendEngineStatus",
            "can/send/EngineStatus/extra",
            "can/send/NotInCatalog",
        ] {
            let err = mapper.from_topic(topic, &catalog).unwrap_err();
            assert!(
                matches!(err, BridgeError::UnrecognizedTopic(ref t) if t == topic),
                "{} should be unrecognized",
                topic
            );
        }

        let by_id = TopicMapper::new("can/send", NamingConvention::ById);
        assert!(by_id.from_topic("can/send/0xZZ", &catalog).is_err());
        assert!(by_id.from_topic("can/send/0x999", &catalog).is_err());
    }

    #[test]
    fn test_filter_matches() {
        let mapper = TopicMapper::new("can/send", NamingConvention::ById);
        assert!(mapper.filter_matches("can/send/raw"));
        assert!(mapper.filter_matches("can/send/0x100"));
        assert!(!mapper.filter_matches("can/send/raw/frames"));
        assert!(!mapper.filter_matches("can/raw"));
        assert!(!mapper.filter_matches("can/sendraw"));

        let bare = TopicMapper::new("", NamingConvention::ByName);
        assert!(bare.filter_matches("raw"));
        assert!(!bare.filter_matches("$SYS"));
        assert!(!bare.filter_matches("can/raw"));
    }
}
