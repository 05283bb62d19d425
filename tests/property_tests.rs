//! Property tests over the token codec, the signature linker, and the
//! directory's uniqueness guarantee.

use ed25519_dalek::SigningKey;
use overlay_discovery::{
    sign_token_fields, verify_token_linkage, DirectoryEngine, LockingScript, LookupQuestion,
    MemoryDirectoryStore, Outpoint, ProtocolFamily,
};
use proptest::prelude::*;
use std::sync::Arc;

fn arb_fields() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..=5)
}

fn arb_signed_fields() -> impl Strategy<Value = (SigningKey, Vec<Vec<u8>>)> {
    (
        any::<[u8; 32]>(),
        prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..=4),
    )
        .prop_map(|(seed, mut fields)| {
            let key = SigningKey::from_bytes(&seed);
            fields.push(sign_token_fields(&key, &fields));
            (key, fields)
        })
}

proptest! {
    #[test]
    fn codec_round_trips(seed in any::<[u8; 32]>(), fields in arb_fields()) {
        let key = SigningKey::from_bytes(&seed);
        let public_key = key.verifying_key().to_bytes();
        let script = LockingScript::encode(&public_key, &fields);
        let decoded = script.decode().unwrap();
        prop_assert_eq!(decoded.locking_public_key, public_key);
        prop_assert_eq!(decoded.fields, fields);
    }

    #[test]
    fn decode_never_panics_on_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = LockingScript::from_bytes(bytes).decode();
    }

    #[test]
    fn signed_fields_always_link((key, fields) in arb_signed_fields()) {
        let linked = verify_token_linkage(&key.verifying_key().to_bytes(), &fields).unwrap();
        prop_assert!(linked);
    }

    #[test]
    fn any_signed_byte_flip_breaks_linkage(
        (key, fields) in arb_signed_fields(),
        field_choice in any::<prop::sample::Index>(),
        byte_choice in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut mutated = fields.clone();
        let field_index = field_choice.index(mutated.len() - 1);
        let byte_index = byte_choice.index(mutated[field_index].len());
        mutated[field_index][byte_index] ^= 1 << bit;

        let linked = verify_token_linkage(&key.verifying_key().to_bytes(), &mutated).unwrap();
        prop_assert!(!linked);
    }

    /// However admissions interleave origins and claims, at most one live
    /// record exists per (identity, domain, label) tuple.
    #[test]
    fn directory_never_holds_two_records_for_one_claim(
        admissions in prop::collection::vec((0usize..3, 0u32..8), 1..24),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let engine = DirectoryEngine::new(
                ProtocolFamily::TopicHost,
                Arc::new(MemoryDirectoryStore::new()),
            );
            let labels = ["tm_meter", "tm_widgets", "tm_uhrp_files"];
            let scripts: Vec<LockingScript> = labels
                .iter()
                .enumerate()
                .map(|(n, label)| {
                    let key = SigningKey::from_bytes(&[n as u8 + 1; 32]);
                    let mut fields = vec![
                        b"SHIP".to_vec(),
                        key.verifying_key().to_bytes().to_vec(),
                        b"https://h.example".to_vec(),
                        label.as_bytes().to_vec(),
                    ];
                    fields.push(sign_token_fields(&key, &fields));
                    LockingScript::encode(&key.verifying_key().to_bytes(), &fields)
                })
                .collect();

            for (claim, origin_n) in &admissions {
                let origin = Outpoint::new(format!("tx{origin_n:02}"), *claim as u32);
                // re-admitting a live origin is an upstream replay and may
                // error; the uniqueness guarantee must hold regardless
                let _ = engine
                    .on_admission("tm_ship", &scripts[*claim], origin)
                    .await;
            }

            for label in labels {
                let found = engine
                    .lookup(&LookupQuestion::new(
                        "ls_ship",
                        serde_json::json!({ "topics": [label] }),
                    ))
                    .await
                    .unwrap();
                prop_assert!(
                    found.len() <= 1,
                    "claim {} backed by {} records",
                    label,
                    found.len()
                );
            }
            Ok(())
        })?;
    }
}
