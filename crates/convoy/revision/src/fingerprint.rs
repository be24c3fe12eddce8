//! Content fingerprints for render output
//!
//! The fingerprint is a blake3 hash over a canonical JSON encoding: components
//! and policies sorted by name, object keys sorted. Reordering components in a
//! spec therefore never produces a new revision. Workflow step order is
//! significant and kept as-is.

use convoy_types::{Fingerprint, RenderOutput, RenderedComponent};
use serde::Serialize;
use serde_json::Value;

const RENDER_DOMAIN: &[u8] = b"convoy-render-v1:";
const COMPONENT_DOMAIN: &[u8] = b"convoy-component-v1:";

/// Fingerprint of a complete render
pub fn fingerprint(render: &RenderOutput) -> Fingerprint {
    let mut canonical = render.clone();
    canonical.components.sort_by(|a, b| a.name.cmp(&b.name));
    canonical.policies.sort_by(|a, b| a.name.cmp(&b.name));
    hash_canonical(RENDER_DOMAIN, &canonical)
}

/// Hash of one rendered component, used for component revision numbering
pub fn component_hash(component: &RenderedComponent) -> Fingerprint {
    hash_canonical(COMPONENT_DOMAIN, component)
}

fn hash_canonical<T: Serialize>(domain: &[u8], value: &T) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain);

    // Serialize to JSON for deterministic hashing
    if let Ok(value) = serde_json::to_value(value) {
        write_canonical(&mut hasher, &value);
    }

    Fingerprint::from_hex(hasher.finalize().to_hex().to_string())
}

/// Feed `value` into the hasher with object keys in sorted order and a type
/// tag in front of every node, so `"1"` and `1` never collide.
fn write_canonical(hasher: &mut blake3::Hasher, value: &Value) {
    match value {
        Value::Null => {
            hasher.update(b"n");
        }
        Value::Bool(b) => {
            hasher.update(if *b { b"t" } else { b"f" });
        }
        Value::Number(n) => {
            hasher.update(b"d");
            write_str(hasher, &n.to_string());
        }
        Value::String(s) => {
            hasher.update(b"s");
            write_str(hasher, s);
        }
        Value::Array(items) => {
            hasher.update(b"a");
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                write_canonical(hasher, item);
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"o");
            hasher.update(&(keys.len() as u64).to_le_bytes());
            for key in keys {
                write_str(hasher, key);
                if let Some(v) = map.get(key) {
                    write_canonical(hasher, v);
                }
            }
        }
    }
}

fn write_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}
