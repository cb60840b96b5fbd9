//! Direction classification properties over generated telegrams.

use proptest::prelude::*;
use trdp_runtime::{classify_direction, ExchangeType, PdDirection, TelegramConfig, TelegramEndpoint};

const HOST: &str = "10.0.0.1";

fn other_host() -> impl Strategy<Value = String> {
    (2u8..=254).prop_map(|last| format!("10.0.0.{last}"))
}

fn exchange_type() -> impl Strategy<Value = ExchangeType> {
    prop_oneof![
        Just(ExchangeType::Source),
        Just(ExchangeType::Sink),
        Just(ExchangeType::SourceSink),
        Just(ExchangeType::Unset),
    ]
}

fn endpoints(hosts: Vec<String>) -> Vec<TelegramEndpoint> {
    hosts.into_iter().map(TelegramEndpoint::host).collect()
}

fn telegram(
    exchange_type: ExchangeType,
    create_endpoint: bool,
    sources: Vec<String>,
    destinations: Vec<String>,
) -> TelegramConfig {
    TelegramConfig {
        com_id: 1,
        exchange_type,
        create_endpoint,
        sources: endpoints(sources),
        destinations: endpoints(destinations),
        ..TelegramConfig::default()
    }
}

proptest! {
    #[test]
    fn source_match_only_is_outgoing(
        tag in exchange_type(),
        create in any::<bool>(),
        mut sources in prop::collection::vec(other_host(), 0..4),
        destinations in prop::collection::vec(other_host(), 0..4),
        at in 0usize..4,
    ) {
        sources.insert(at.min(sources.len()), HOST.to_string());
        let cfg = telegram(tag, create, sources, destinations);
        prop_assert_eq!(classify_direction(HOST, &cfg), PdDirection::Outgoing);
    }

    #[test]
    fn destination_match_only_is_incoming(
        tag in exchange_type(),
        create in any::<bool>(),
        sources in prop::collection::vec(other_host(), 0..4),
        mut destinations in prop::collection::vec(other_host(), 0..4),
        at in 0usize..4,
    ) {
        destinations.insert(at.min(destinations.len()), HOST.to_string());
        let cfg = telegram(tag, create, sources, destinations);
        prop_assert_eq!(classify_direction(HOST, &cfg), PdDirection::Incoming);
    }

    #[test]
    fn both_matches_is_loopback(
        tag in exchange_type(),
        create in any::<bool>(),
        mut sources in prop::collection::vec(other_host(), 0..4),
        mut destinations in prop::collection::vec(other_host(), 0..4),
    ) {
        sources.push(HOST.to_string());
        destinations.insert(0, HOST.to_string());
        let cfg = telegram(tag, create, sources, destinations);
        prop_assert_eq!(classify_direction(HOST, &cfg), PdDirection::Loopback);
    }

    #[test]
    fn no_match_follows_the_tag(
        tag in exchange_type(),
        create in any::<bool>(),
        sources in prop::collection::vec(other_host(), 0..4),
        destinations in prop::collection::vec(other_host(), 0..4),
    ) {
        let cfg = telegram(tag, create, sources, destinations);
        let is_source = matches!(tag, ExchangeType::Source | ExchangeType::SourceSink) || create;
        let is_sink = matches!(tag, ExchangeType::Sink | ExchangeType::SourceSink);
        let expected = match (is_source, is_sink) {
            (true, true) => PdDirection::Loopback,
            (true, false) => PdDirection::Outgoing,
            (false, true) => PdDirection::Incoming,
            (false, false) => PdDirection::Unknown,
        };
        prop_assert_eq!(classify_direction(HOST, &cfg), expected);
    }

    #[test]
    fn only_outgoing_and_loopback_transmit(
        tag in exchange_type(),
        create in any::<bool>(),
        sources in prop::collection::vec(prop_oneof![other_host(), Just(HOST.to_string())], 0..3),
        destinations in prop::collection::vec(prop_oneof![other_host(), Just(HOST.to_string())], 0..3),
    ) {
        let direction = classify_direction(HOST, &telegram(tag, create, sources, destinations));
        prop_assert_eq!(
            direction.can_transmit(),
            matches!(direction, PdDirection::Outgoing | PdDirection::Loopback)
        );
        prop_assert_eq!(
            direction.can_receive(),
            matches!(direction, PdDirection::Incoming | PdDirection::Loopback)
        );
    }
}
