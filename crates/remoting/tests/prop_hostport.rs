//! Property 1 of `spec.md` §8: for any `host:port` (or bracketed-IPv6, or
//! with defaults) string built from the parser's own grammar, parsing
//! succeeds and the result's port always lies in `[0, 65535]`; an empty
//! component takes the supplied default.

use proptest::prelude::*;
use remoting_agent::hostport::HostPort;

fn hostname() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,12}(\\.[a-z][a-z0-9-]{0,8}){0,2}"
}

fn port() -> impl Strategy<Value = u16> {
    0..=65535u16
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn plain_host_port_always_parses_in_range(host in hostname(), port in port()) {
        let s = format!("{host}:{port}");
        let parsed = HostPort::parse(&s, None, None).unwrap();
        prop_assert_eq!(parsed.host, host);
        prop_assert_eq!(parsed.port, port);
    }

    #[test]
    fn bracketed_ipv6_always_parses_in_range(port in port()) {
        let s = format!("[::1]:{port}");
        let parsed = HostPort::parse(&s, None, None).unwrap();
        prop_assert_eq!(parsed.host, "::1");
        prop_assert_eq!(parsed.port, port);
    }

    #[test]
    fn empty_host_component_takes_the_default(default_host in hostname(), port in port()) {
        let s = format!(":{port}");
        let parsed = HostPort::parse(&s, Some(&default_host), None).unwrap();
        prop_assert_eq!(parsed.host, default_host);
        prop_assert_eq!(parsed.port, port);
    }

    #[test]
    fn empty_port_component_takes_the_default(host in hostname(), default_port in port()) {
        let s = format!("{host}:");
        let parsed = HostPort::parse(&s, None, Some(default_port)).unwrap();
        prop_assert_eq!(parsed.host, host);
        prop_assert_eq!(parsed.port, default_port);
    }

    #[test]
    fn out_of_range_ports_always_fail(extra_digits in 1u32..9999) {
        let huge_port = 65536u64 + extra_digits as u64;
        let s = format!("host:{huge_port}");
        prop_assert!(HostPort::parse(&s, None, None).is_err());
    }
}
