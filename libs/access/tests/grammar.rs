//! Property tests for the access spec grammar.

use nsp_access::{AccessControlSpec, AccessTag, Caller, Principal};
use proptest::prelude::*;

fn names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z][a-z0-9_]{0,7}", 1..5)
}

proptest! {
    #[test]
    fn custom_spec_keeps_every_listed_name(users in names(), groups in names()) {
        let text = format!("users={};groups={}", users.join(","), groups.join(","));
        let spec = AccessControlSpec::parse(&text).unwrap();

        prop_assert_eq!(spec.tag(), AccessTag::Custom);
        prop_assert_eq!(spec.as_str(), text.as_str());
        for user in &users {
            prop_assert!(spec.users().contains(user));
        }
        for group in &groups {
            prop_assert!(spec.groups().contains(group));
        }
        prop_assert!(spec.tokens().is_empty());
    }

    #[test]
    fn custom_spec_never_resolves_to_the_caller(users in names(), caller in "[A-Z]{3,6}") {
        let spec = AccessControlSpec::parse(&format!("users={}", users.join(","))).unwrap();
        let principals = spec.resolve_principals(&Caller::new(caller.clone()));
        prop_assert!(!principals.contains(&Principal::User(caller)));
    }

    #[test]
    fn clause_order_changes_equality_but_not_equivalence(users in names(), tokens in names()) {
        let forward = AccessControlSpec::parse(
            &format!("users={};tokens={}", users.join(","), tokens.join(",")),
        ).unwrap();
        let reverse = AccessControlSpec::parse(
            &format!("tokens={};users={}", tokens.join(","), users.join(",")),
        ).unwrap();

        prop_assert_ne!(&forward, &reverse);
        prop_assert!(forward.is_equivalent(&reverse));
    }
}
