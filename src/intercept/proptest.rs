//! Property-Based Tests for Key Templates and Interception
//!
//! # Test Properties
//!
//! 1. **Literal Fidelity**: templates without placeholders resolve to themselves
//! 2. **Substitution**: `prefix{#id}suffix` resolves to `prefix<id>suffix`
//! 3. **Escaping**: doubled braces always come out as single braces
//! 4. **Read Idempotence**: the operation runs once however often it is called

#![cfg(test)]

use std::cell::Cell;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use super::args::CallArgs;
use super::descriptor::CacheDescriptor;
use super::interceptor::CacheInterceptor;
use super::key::KeyTemplate;
use crate::adapters::InMemoryBackend;
use crate::client::KvClient;
use crate::config::CacheSettings;

// =============================================================================
// Property Strategies
// =============================================================================

/// Literal key text: no braces, no '#'
fn literal_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9:_./-]{1,24}"
}

/// Argument values that render to non-empty text
fn arg_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,16}"
}

// =============================================================================
// Template Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_literal_template_is_identity(literal in literal_strategy()) {
        let template = KeyTemplate::parse(&literal).unwrap();
        prop_assert!(template.is_static());
        prop_assert_eq!(template.resolve(&CallArgs::new()).unwrap(), literal);
    }

    #[test]
    fn prop_substitution(
        prefix in literal_strategy(),
        suffix in literal_strategy(),
        value in arg_strategy(),
    ) {
        let args = CallArgs::new().with_value("id", json!(value));
        let expected = format!("{}{}{}", prefix, value, suffix);

        for form in ["{id}", "{#id}", "#{#id}"] {
            let template = KeyTemplate::parse(&format!("{}{}{}", prefix, form, suffix)).unwrap();
            prop_assert_eq!(template.resolve(&args).unwrap(), expected.clone(), "form {}", form);
        }
    }

    #[test]
    fn prop_numeric_arguments_render_canonically(id in any::<i64>()) {
        let args = CallArgs::new().with_value("id", json!(id));
        let key = KeyTemplate::parse("n:{#id}").unwrap().resolve(&args).unwrap();
        prop_assert_eq!(key, format!("n:{}", id));
    }

    #[test]
    fn prop_escaped_braces(inner in literal_strategy()) {
        let template = KeyTemplate::parse(&format!("{{{{{}}}}}", inner)).unwrap();
        prop_assert_eq!(template.resolve(&CallArgs::new()).unwrap(), format!("{{{}}}", inner));
    }

    #[test]
    fn prop_parse_never_panics(text in "\\PC{0,32}") {
        let _ = KeyTemplate::parse(&text);
    }
}

// =============================================================================
// Interception Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_read_runs_operation_once(id in any::<u32>(), repeats in 1usize..8) {
        let interceptor = CacheInterceptor::new(
            KvClient::new(Arc::new(InMemoryBackend::new())),
            CacheSettings::default(),
        );
        let descriptor = CacheDescriptor::read("item:{#id}").unwrap();
        let args = CallArgs::new().with_value("id", json!(id));
        let calls = Cell::new(0usize);

        for _ in 0..repeats {
            let value = interceptor
                .intercept(Some(&descriptor), &args, || {
                    calls.set(calls.get() + 1);
                    Ok(Some(id as u64 * 2))
                })
                .unwrap();
            prop_assert_eq!(value, Some(id as u64 * 2));
        }

        prop_assert_eq!(calls.get(), 1);
        let cached_key = format!("CACHE:item:{}", id);
        prop_assert!(interceptor.client().has_key(&cached_key).unwrap());
    }
}
