// tests/property/parsing_test.rs

//! Credential lines and ensemble addresses parse the same way whatever their content.

use proptest::prelude::*;
use zksession::core::auth::AuthCredential;
use zksession::core::transport::{parse_servers, server_host};

proptest! {
    #[test]
    fn test_credential_splits_on_first_colon(
        scheme in "[a-z]{1,16}",
        secret in "[ -~]{0,64}",
        newlines in "[\r\n]{0,3}",
    ) {
        let line = format!("{scheme}:{secret}{newlines}");
        let credential: AuthCredential = line.parse().unwrap();
        prop_assert_eq!(&credential.scheme, &scheme);
        // Printable ASCII never ends in a newline, so the secret survives intact.
        prop_assert_eq!(&credential.secret[..], secret.as_bytes());
    }

    #[test]
    fn test_credential_without_colon_is_rejected(line in "[a-zA-Z0-9 _-]{0,64}") {
        prop_assert!(line.parse::<AuthCredential>().is_err());
    }

    #[test]
    fn test_every_server_gets_a_port(
        hosts in prop::collection::vec(("[a-z][a-z0-9-]{0,20}", prop::option::of(1u16..=u16::MAX)), 1..8)
    ) {
        let address = hosts
            .iter()
            .map(|(host, port)| match port {
                Some(port) => format!("{host}:{port}"),
                None => host.clone(),
            })
            .collect::<Vec<_>>()
            .join(",");
        let servers = parse_servers(&address).unwrap();
        prop_assert_eq!(servers.len(), hosts.len());
        for (server, (host, port)) in servers.iter().zip(&hosts) {
            prop_assert_eq!(server_host(server), host.as_str());
            let expected_port = port.unwrap_or(2181);
            let expected_suffix = format!(":{expected_port}");
            prop_assert!(server.ends_with(&expected_suffix));
        }
    }
}
